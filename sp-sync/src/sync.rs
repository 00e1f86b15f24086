//! Entrypoint for sync engine

use std::sync::Arc;

use bitcoin::{OutPoint, XOnlyPublicKey};
use futures::future::join_all;
use tokio::sync::{mpsc::UnboundedSender, RwLock};
use tokio_util::sync::CancellationToken;

use sp_status::UtxoState;
use spconfig::ScanConfig;

use crate::{
    client::{
        self,
        oracle::{script_hash, OracleError, ScriptBalance, SpendStateOracle},
        FetchRequest,
    },
    error::SyncError,
    persist::PersistError,
    primitives::OwnedUtxo,
    scan::{error::ScanError, spent::spent_outpoints, sync_block, BlockScanner},
    traits::WalletStore,
    wallet::Wallet,
};

/// What a sync pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Heights fully processed
    pub heights_scanned: u32,
    /// Outputs newly added to the wallet
    pub utxos_found: usize,
    /// Outputs moved to [`UtxoState::Spent`] by spent detection
    pub utxos_spent: usize,
    /// Outputs whose state changed during the balance refresh
    pub states_refreshed: usize,
    /// Wallet scan height when the pass ended
    pub scan_height: u32,
}

/// Drives the wallet from its last scanned height to the chain tip.
///
/// Results of a height are computed from a snapshot of the wallet and committed under a
/// short write lock once the height is complete, so an interrupted height leaves no trace.
pub struct Syncer {
    config: ScanConfig,
    scanner: BlockScanner,
    wallet: Arc<RwLock<Wallet>>,
    fetch_request_sender: UnboundedSender<FetchRequest>,
    oracle: Option<Arc<dyn SpendStateOracle>>,
    store: Arc<dyn WalletStore>,
}

impl Syncer {
    /// Takes ownership of `wallet`. Indexer requests are sent to a running
    /// [`crate::client::fetch::fetch`] task through `fetch_request_sender`.
    pub fn new(
        config: ScanConfig,
        wallet: Wallet,
        fetch_request_sender: UnboundedSender<FetchRequest>,
        oracle: Option<Arc<dyn SpendStateOracle>>,
        store: Arc<dyn WalletStore>,
    ) -> Self {
        Self {
            config,
            scanner: BlockScanner::from_wallet(&wallet),
            wallet: Arc::new(RwLock::new(wallet)),
            fetch_request_sender,
            oracle,
            store,
        }
    }

    /// Shared wallet. Readers take the read lock; only the syncer writes.
    pub fn wallet(&self) -> Arc<RwLock<Wallet>> {
        Arc::clone(&self.wallet)
    }

    /// Scan configuration
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Returns true if a spend-state oracle is configured.
    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Last fully processed height
    pub async fn scan_height(&self) -> u32 {
        self.wallet.read().await.last_scan_height()
    }

    /// Current tip as reported by the indexer.
    pub async fn chain_tip(&self) -> Result<u32, SyncError> {
        Ok(client::get_chain_tip(&self.fetch_request_sender).await?)
    }

    /// Scans every height after the last scanned height up to `chain_tip`, then refreshes
    /// output states with the oracle. A `chain_tip` of 0 means the indexer's current tip.
    pub async fn sync_to_tip(
        &self,
        chain_tip: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let chain_tip = if chain_tip == 0 {
            self.chain_tip().await?
        } else {
            chain_tip
        };

        let start = {
            let wallet = self.wallet.read().await;
            wallet
                .birth_height()
                .max(wallet.last_scan_height().saturating_add(1))
                .max(1)
        };
        tracing::debug!(start, chain_tip, "Trying to sync to height.");

        self.sync_range(start, chain_tip, cancel).await
    }

    /// Rescans from `height` to the current tip regardless of scan progress. Scan height
    /// is never lowered and outputs already owned are not added twice.
    pub async fn force_sync_from(
        &self,
        height: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let chain_tip = self.chain_tip().await?;
        tracing::info!(height, chain_tip, "Rescanning wallet.");
        self.sync_range(height.max(1), chain_tip, cancel).await
    }

    /// Rewinds scan progress to the birth height, persists it, then syncs to the current
    /// tip. Unlike [`Syncer::force_sync_from`] an interrupted pass resumes from where the
    /// rescan stopped. Owned outputs are kept.
    pub async fn rescan_from_birth(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let birth_height = {
            let mut wallet = self.wallet.write().await;
            wallet.reset_to_birth();
            wallet.birth_height()
        };
        tracing::info!(birth_height, "Rescanning wallet from birth.");
        self.persist().await?;
        self.sync_to_tip(0, cancel).await
    }

    async fn sync_range(
        &self,
        start: u32,
        chain_tip: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let mut summary = if start > chain_tip {
            tracing::debug!(start, chain_tip, "Wallet is synced.");
            SyncSummary::default()
        } else {
            tracing::info!("Syncing wallet...");
            self.scan_heights(start, chain_tip, cancel).await?
        };

        summary.states_refreshed = self.check_unspent_utxos().await?;
        summary.scan_height = self.scan_height().await;
        Ok(summary)
    }

    async fn scan_heights(
        &self,
        start: u32,
        end: u32,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let mut summary = SyncSummary::default();

        for height in start..=end {
            if cancel.is_cancelled() {
                return Err(self.interrupted().await);
            }

            let (spent, found) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.interrupted().await),
                result = self.process_height(height) => {
                    result.map_err(|source| SyncError::ScanError { height, source })?
                }
            };

            let (marked, added) = {
                let mut wallet = self.wallet.write().await;
                let marked = wallet.mark_spent(spent.iter());
                let added = wallet.add_utxos(found);
                wallet.advance_scan_height(height);
                (marked, added)
            };
            summary.heights_scanned += 1;
            summary.utxos_spent += marked;
            summary.utxos_found += added;

            if added > 0 {
                tracing::info!(height, added, "Added UTXOs to wallet.");
            }
            let checkpoint =
                self.config.persist_interval != 0 && height % self.config.persist_interval == 0;
            if added > 0 || marked > 0 || checkpoint {
                self.persist().await?;
            }
        }

        tracing::info!(
            heights = summary.heights_scanned,
            found = summary.utxos_found,
            spent = summary.utxos_spent,
            "Sync complete."
        );
        Ok(summary)
    }

    // spent outpoints and new outputs of one height. reads the wallet, never writes it
    async fn process_height(
        &self,
        height: u32,
    ) -> Result<(Vec<OutPoint>, Vec<OwnedUtxo>), ScanError> {
        let tracked: Vec<OutPoint> = {
            let wallet = self.wallet.read().await;
            wallet
                .utxos()
                .iter()
                .filter(|utxo| !utxo.state().is_spent())
                .map(OwnedUtxo::outpoint)
                .collect()
        };

        let spent = match spent_outpoints(&self.fetch_request_sender, height, &tracked).await {
            Ok(spent) => spent,
            Err(ScanError::FilterError(e)) => {
                tracing::error!(height, error = %e, "Spent filter could not be decoded.");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(height, "Syncing block.");
        let found = sync_block(
            &self.fetch_request_sender,
            &self.scanner,
            height,
            self.config.dust_limit,
        )
        .await?;

        Ok((spent, found))
    }

    /// Re-checks every [`UtxoState::Unspent`] and [`UtxoState::UnconfirmedSpent`] output
    /// against the spend-state oracle and returns the number of outputs that changed.
    ///
    /// Skipped without an oracle. Outputs with a failed query keep their state and the
    /// first failure is returned after the successful answers are applied.
    pub async fn check_unspent_utxos(&self) -> Result<usize, SyncError> {
        let Some(oracle) = self.oracle.as_ref() else {
            return Ok(0);
        };

        let watched: Vec<(OutPoint, XOnlyPublicKey)> = {
            let wallet = self.wallet.read().await;
            wallet
                .utxos()
                .iter()
                .filter(|utxo| utxo.state().is_watched())
                .map(|utxo| (utxo.outpoint(), utxo.output_key()))
                .collect()
        };
        if watched.is_empty() {
            return Ok(0);
        }

        let timeout = self.config.request_timeout;
        let balances = join_all(watched.iter().map(|(outpoint, output_key)| {
            let oracle = Arc::clone(oracle);
            let script_hash = script_hash(output_key);
            async move {
                let balance = tokio::time::timeout(timeout, oracle.get_balance(&script_hash))
                    .await
                    .unwrap_or(Err(OracleError::Timeout));
                (*outpoint, balance)
            }
        }))
        .await;

        let mut changed = 0;
        let mut first_error = None;
        {
            let mut wallet = self.wallet.write().await;
            for (outpoint, balance) in balances {
                match balance {
                    Ok(balance) => {
                        if let Some(state) = refreshed_state(&balance) {
                            if wallet.set_utxo_state(&outpoint, state) {
                                tracing::info!(%outpoint, %state, "UTXO state updated.");
                                changed += 1;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(%outpoint, error = %e, "Could not check UTXO state.");
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
            }
        }

        if changed > 0 {
            self.persist().await?;
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(changed),
        }
    }

    /// Writes the wallet to the store.
    pub async fn persist(&self) -> Result<(), SyncError> {
        let bytes = self
            .wallet
            .read()
            .await
            .serialize()
            .map_err(PersistError::from)?;
        self.store.save(&bytes).map_err(|e| {
            tracing::error!(error = %e, "Failed to persist wallet.");
            SyncError::from(e)
        })
    }

    async fn interrupted(&self) -> SyncError {
        let last_scan_height = self.scan_height().await;
        tracing::info!(last_scan_height, "Aborted sync.");
        SyncError::Interrupted { last_scan_height }
    }
}

// state implied by an oracle balance, if it implies a change
fn refreshed_state(balance: &ScriptBalance) -> Option<UtxoState> {
    if balance.is_empty() {
        Some(UtxoState::Spent)
    } else if balance.unconfirmed < 0 {
        Some(UtxoState::UnconfirmedSpent)
    } else {
        None
    }
}

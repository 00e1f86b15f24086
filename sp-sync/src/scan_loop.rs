//! Long running scan coordinator for one wallet.
//!
//! Every trigger funnels into a single `select!` loop, so sync passes never overlap and the
//! wallet has exactly one writer. Callers interact through a cloneable [`ScanLoopHandle`].

use std::sync::Arc;

use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        RwLock,
    },
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use spconfig::ScanConfig;

use crate::{
    client::{fetch::fetch, oracle::SpendStateOracle, BlockIndexer, FetchRequest},
    error::SyncError,
    primitives::OwnedUtxo,
    sync::Syncer,
    traits::WalletStore,
    wallet::Wallet,
};

/// The coordinator. Consumed by [`ScanLoop::run`].
pub struct ScanLoop {
    syncer: Syncer,
    indexer: Arc<dyn BlockIndexer>,
    fetch_request_receiver: UnboundedReceiver<FetchRequest>,
    new_block_receiver: UnboundedReceiver<u32>,
    rescan_receiver: UnboundedReceiver<Rescan>,
    shutdown: CancellationToken,
}

enum Rescan {
    From(u32),
    Birth,
}

/// Triggers and point-in-time reads for a running [`ScanLoop`].
#[derive(Clone)]
pub struct ScanLoopHandle {
    wallet: Arc<RwLock<Wallet>>,
    new_block_sender: UnboundedSender<u32>,
    rescan_sender: UnboundedSender<Rescan>,
    shutdown: CancellationToken,
}

impl ScanLoop {
    /// Sets up the coordinator for `wallet`. Nothing runs until [`ScanLoop::run`] is awaited.
    ///
    /// Without an `oracle` the spent-check ticker is disabled and the fallback poll runs
    /// more often.
    pub fn new(
        config: ScanConfig,
        wallet: Wallet,
        indexer: Arc<dyn BlockIndexer>,
        oracle: Option<Arc<dyn SpendStateOracle>>,
        store: Arc<dyn WalletStore>,
    ) -> (Self, ScanLoopHandle) {
        let (fetch_request_sender, fetch_request_receiver) = mpsc::unbounded_channel();
        let (new_block_sender, new_block_receiver) = mpsc::unbounded_channel();
        let (rescan_sender, rescan_receiver) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let syncer = Syncer::new(config, wallet, fetch_request_sender, oracle, store);
        let handle = ScanLoopHandle {
            wallet: syncer.wallet(),
            new_block_sender,
            rescan_sender,
            shutdown: shutdown.clone(),
        };

        (
            Self {
                syncer,
                indexer,
                fetch_request_receiver,
                new_block_receiver,
                rescan_receiver,
                shutdown,
            },
            handle,
        )
    }

    /// Runs until shutdown. Failed passes are logged and retried on the next trigger.
    /// The wallet is persisted once more before returning.
    pub async fn run(self) -> Result<(), SyncError> {
        let ScanLoop {
            syncer,
            indexer,
            fetch_request_receiver,
            mut new_block_receiver,
            mut rescan_receiver,
            shutdown,
        } = self;

        let config = syncer.config().clone();
        let fetcher = tokio::spawn(fetch(
            fetch_request_receiver,
            indexer,
            config.request_timeout,
        ));

        let has_oracle = syncer.has_oracle();
        let scan_interval = config.scan_interval(has_oracle);
        let mut scan_ticker = time::interval_at(Instant::now() + scan_interval, scan_interval);
        scan_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut spent_ticker = time::interval_at(
            Instant::now() + config.spent_check_interval,
            config.spent_check_interval,
        );
        spent_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(has_oracle, "Starting continuous scan.");
        let mut startup = true;

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let balance_before = free_balance(&syncer).await;

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = async {}, if startup => {
                    startup = false;
                    Some(syncer.sync_to_tip(0, &shutdown).await.map(drop))
                }
                Some(height) = new_block_receiver.recv() => {
                    tracing::debug!(height, "New block notified.");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = time::sleep(config.new_block_delay) => {}
                    }
                    Some(syncer.sync_to_tip(height, &shutdown).await.map(drop))
                }
                Some(rescan) = rescan_receiver.recv() => {
                    let result = match rescan {
                        Rescan::From(height) => syncer.force_sync_from(height, &shutdown).await,
                        Rescan::Birth => syncer.rescan_from_birth(&shutdown).await,
                    };
                    Some(result.map(drop))
                }
                _ = scan_ticker.tick() => poll_chain_tip(&syncer, &shutdown).await,
                _ = spent_ticker.tick(), if has_oracle => {
                    Some(syncer.check_unspent_utxos().await.map(drop))
                }
            };

            match outcome {
                Some(Err(e)) if e.is_interrupted() => break,
                Some(Err(e)) => tracing::error!(error = %e, "Could not sync wallet."),
                Some(Ok(())) => {
                    let balance = free_balance(&syncer).await;
                    if balance != balance_before {
                        tracing::info!(balance, "Balance updated.");
                    }
                }
                None => (),
            }
        }

        tracing::info!("Aborted continuous scan.");
        let persisted = syncer.persist().await;

        // closing the fetch request channel lets the fetcher finish
        drop(syncer);
        if let Err(e) = fetcher.await {
            tracing::error!(error = %e, "Fetch task failed.");
        }
        persisted
    }
}

// fallback for missed block notifications
async fn poll_chain_tip(
    syncer: &Syncer,
    shutdown: &CancellationToken,
) -> Option<Result<(), SyncError>> {
    let chain_tip = match syncer.chain_tip().await {
        Ok(chain_tip) => chain_tip,
        Err(e) => {
            tracing::error!(error = %e, "Could not get chain tip.");
            return None;
        }
    };
    if chain_tip <= syncer.scan_height().await {
        return None;
    }
    Some(
        syncer
            .sync_to_tip(chain_tip, shutdown)
            .await
            .map(drop),
    )
}

async fn free_balance(syncer: &Syncer) -> u64 {
    syncer.wallet().read().await.free_balance()
}

impl ScanLoopHandle {
    /// Last fully processed height
    pub async fn scan_height(&self) -> u32 {
        self.wallet.read().await.last_scan_height()
    }

    /// Every owned output, in discovery order
    pub async fn utxos(&self) -> Vec<OwnedUtxo> {
        self.wallet.read().await.utxos().clone()
    }

    /// Sum of unspent amounts
    pub async fn free_balance(&self) -> u64 {
        self.wallet.read().await.free_balance()
    }

    /// Unlabelled receiving address
    pub async fn address(&self) -> String {
        self.wallet.read().await.generate_address()
    }

    /// Requests a rescan from `height` to the tip.
    pub fn rescan_from(&self, height: u32) -> Result<(), SyncError> {
        if height == 0 {
            return Err(SyncError::InvalidRescanHeight);
        }
        self.rescan_sender
            .send(Rescan::From(height))
            .map_err(|_| SyncError::LoopStopped)
    }

    /// Requests a rescan of every height since the wallet birthday. Scan height drops back
    /// to the birthday, so a shutdown mid rescan resumes it on the next start.
    pub fn rescan_from_birth(&self) -> Result<(), SyncError> {
        self.rescan_sender
            .send(Rescan::Birth)
            .map_err(|_| SyncError::LoopStopped)
    }

    /// Reports a new block at `height`.
    pub fn notify_new_block(&self, height: u32) -> Result<(), SyncError> {
        self.new_block_sender
            .send(height)
            .map_err(|_| SyncError::LoopStopped)
    }

    /// Stops the loop. A pass in flight stops before committing its current height.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Returns true once shutdown was requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

//! The wallet entity: scanning identity, owned outputs and scan progress.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{
    secp256k1::{PublicKey, Secp256k1, SecretKey},
    Network, OutPoint,
};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use sp_status::UtxoState;

use crate::{
    keys::{KeyError, Label, ScanKeys},
    primitives::OwnedUtxo,
};

/// Scanning identity and result set.
///
/// The JSON encoding produced by [`Wallet::serialize`] includes the scan secret. Storage
/// writers are expected to encrypt these bytes when encryption at rest is wanted.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct Wallet {
    #[getset(get = "pub")]
    scan_secret_key: SecretKey,
    #[getset(get_copy = "pub")]
    scan_pubkey: PublicKey,
    #[getset(get_copy = "pub")]
    spend_pubkey: PublicKey,
    #[getset(get_copy = "pub")]
    network: Network,
    #[getset(get_copy = "pub")]
    birth_height: u32,
    /// Last height fully processed
    #[getset(get_copy = "pub")]
    last_scan_height: u32,
    #[getset(get = "pub")]
    utxos: Vec<OwnedUtxo>,
    /// Outpoints ever added. Only grows.
    #[getset(get = "pub")]
    utxo_index: BTreeSet<OutPoint>,
    #[getset(get = "pub")]
    labels: BTreeMap<PublicKey, Label>,
}

impl Wallet {
    /// Sets up a fresh wallet with labels `0..label_count`. A birth height below 1 is
    /// raised to 1 since genesis is never scanned.
    pub fn new(
        scan_secret_key: SecretKey,
        spend_pubkey: PublicKey,
        birth_height: u32,
        label_count: u32,
        network: Network,
    ) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let keys = ScanKeys::new(&secp, scan_secret_key, spend_pubkey);
        let birth_height = birth_height.max(1);

        let mut labels = BTreeMap::new();
        for m in 0..label_count {
            let label = Label::new(&secp, &keys, m, network)?;
            labels.insert(label.pubkey(), label);
        }

        Ok(Wallet {
            scan_secret_key,
            scan_pubkey: keys.scan_pubkey(),
            spend_pubkey,
            network,
            birth_height,
            last_scan_height: initial_scan_height(birth_height),
            utxos: Vec::new(),
            utxo_index: BTreeSet::new(),
            labels,
        })
    }

    /// Read-only key material for the scanner.
    pub fn scan_keys(&self) -> ScanKeys {
        ScanKeys::new(
            &Secp256k1::signing_only(),
            self.scan_secret_key,
            self.spend_pubkey,
        )
    }

    /// Unlabelled receiving address.
    pub fn generate_address(&self) -> String {
        self.scan_keys().address(self.network)
    }

    /// Label with index `m`, if the wallet holds it.
    pub fn label(&self, m: u32) -> Option<&Label> {
        self.labels.values().find(|label| label.m() == m)
    }

    /// Adds outputs not seen before and returns how many were new. Re-adding an
    /// outpoint is a no-op, even if the state differs.
    pub fn add_utxos(&mut self, utxos: impl IntoIterator<Item = OwnedUtxo>) -> usize {
        let mut added = 0;
        for utxo in utxos {
            if self.utxo_index.insert(utxo.outpoint()) {
                tracing::info!(
                    outpoint = %utxo.outpoint(),
                    amount = utxo.amount(),
                    "New UTXO."
                );
                self.utxos.push(utxo);
                added += 1;
            }
        }
        added
    }

    /// Moves the output at `outpoint` to `state`. Returns whether anything changed.
    pub fn set_utxo_state(&mut self, outpoint: &OutPoint, state: UtxoState) -> bool {
        self.utxos
            .iter_mut()
            .find(|utxo| &utxo.outpoint() == outpoint)
            .map(|utxo| utxo.transition(state))
            .unwrap_or(false)
    }

    /// Marks every listed outpoint spent. Returns the number of outputs that changed.
    pub fn mark_spent<'a>(&mut self, outpoints: impl IntoIterator<Item = &'a OutPoint>) -> usize {
        outpoints
            .into_iter()
            .filter(|outpoint| self.set_utxo_state(outpoint, UtxoState::Spent))
            .count()
    }

    /// Records `height` as processed. Never moves backwards.
    pub fn advance_scan_height(&mut self, height: u32) {
        self.last_scan_height = self.last_scan_height.max(height);
    }

    /// Rewinds scan progress to the birth height so the next pass rescans from scratch.
    /// Owned outputs are kept; rediscovered outputs are deduplicated.
    pub fn reset_to_birth(&mut self) {
        self.last_scan_height = initial_scan_height(self.birth_height);
    }

    /// Sum of all [`UtxoState::Unspent`] amounts.
    pub fn free_balance(&self) -> u64 {
        self.utxos
            .iter()
            .filter(|utxo| utxo.state().is_free())
            .map(|utxo| utxo.amount())
            .sum()
    }

    /// Outputs currently in any of `states`, in discovery order.
    pub fn utxos_by_states(&self, states: &[UtxoState]) -> Vec<&OwnedUtxo> {
        self.utxos
            .iter()
            .filter(|utxo| states.contains(&utxo.state()))
            .collect()
    }

    /// Spendable outputs, optionally including those with a spend sitting in the mempool.
    pub fn free_utxos(&self, include_unconfirmed_spent: bool) -> Vec<&OwnedUtxo> {
        if include_unconfirmed_spent {
            self.utxos_by_states(&[UtxoState::Unspent, UtxoState::UnconfirmedSpent])
        } else {
            self.utxos_by_states(&[UtxoState::Unspent])
        }
    }

    /// Structured encoding of every field.
    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Inverse of [`Wallet::serialize`]. The outpoint index is extended over the stored
    /// outputs so it always covers them.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let mut wallet: Wallet = serde_json::from_slice(bytes)?;
        let outpoints: Vec<OutPoint> = wallet.utxos.iter().map(OwnedUtxo::outpoint).collect();
        wallet.utxo_index.extend(outpoints);
        Ok(wallet)
    }
}

// height 0 is never scanned, so a wallet born at 1 starts from nothing scanned
fn initial_scan_height(birth_height: u32) -> u32 {
    birth_height.saturating_sub(1)
}

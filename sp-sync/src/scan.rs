//! Block scanning: which outputs at a height newly belong to the wallet.

use std::collections::{BTreeMap, HashMap, HashSet};

use bitcoin::{
    secp256k1::{All, PublicKey, Secp256k1},
    OutPoint, Txid, XOnlyPublicKey,
};
use tokio::sync::mpsc::UnboundedSender;

use sp_status::UtxoState;

use crate::{
    client::{self, FetchRequest, FilterType, UtxoServed},
    keys::{Label, ScanKeys},
    primitives::{OutputKeyBytes, OwnedUtxo, TweakCandidate},
    scan::{candidates::candidate_map, error::ScanError, filter::match_filter},
    wallet::Wallet,
};

pub mod candidates;
pub mod error;
pub mod filter;
pub mod receive;
pub mod spent;

/// Read-only scanning context: keys, labels and a secp256k1 context.
#[derive(Debug, Clone)]
pub struct BlockScanner {
    secp: Secp256k1<All>,
    keys: ScanKeys,
    labels: Vec<Label>,
    label_lookup: BTreeMap<PublicKey, Label>,
}

impl BlockScanner {
    /// Creates a scanner for a wallet's keys and labels.
    pub fn new(keys: ScanKeys, labels: BTreeMap<PublicKey, Label>) -> Self {
        Self {
            secp: Secp256k1::new(),
            keys,
            labels: labels.values().cloned().collect(),
            label_lookup: labels,
        }
    }

    /// Creates a scanner for `wallet`.
    pub fn from_wallet(wallet: &Wallet) -> Self {
        Self::new(wallet.scan_keys(), wallet.labels().clone())
    }

    /// Key material
    pub fn keys(&self) -> &ScanKeys {
        &self.keys
    }

    /// Candidate output keys for every tweak of a block.
    pub fn candidates(&self, tweaks: &[PublicKey]) -> HashMap<OutputKeyBytes, TweakCandidate> {
        candidate_map(&self.secp, &self.keys, &self.labels, tweaks)
    }

    /// Exact verification of the block outputs against the candidates. Every transaction
    /// holding a candidate is scanned in full with the candidate's tweak.
    pub fn resolve_owned_utxos(
        &self,
        candidates: &HashMap<OutputKeyBytes, TweakCandidate>,
        utxos: &[UtxoServed],
    ) -> Result<Vec<OwnedUtxo>, ScanError> {
        let mut txid_groups: HashMap<Txid, Vec<&UtxoServed>> = HashMap::new();
        let mut output_to_txid: HashMap<OutputKeyBytes, Txid> = HashMap::new();
        for utxo in utxos {
            let Some(output_key) = output_key_bytes(utxo) else {
                continue;
            };
            txid_groups.entry(utxo.txid).or_default().push(utxo);
            output_to_txid.insert(output_key, utxo.txid);
        }

        // one scan per (transaction, tweak)
        let mut to_scan: HashSet<(Txid, PublicKey)> = HashSet::new();
        for (output_key, candidate) in candidates {
            if let Some(txid) = output_to_txid.get(output_key) {
                to_scan.insert((*txid, candidate.tweak()));
            }
        }

        let mut owned = Vec::new();
        for (txid, tweak) in to_scan {
            let group = txid_groups
                .get(&txid)
                .ok_or(ScanError::MisalignedOutputs { txid })?;
            // keys off the curve can sit in a script but can never be ours
            let outputs: Vec<(OutPoint, XOnlyPublicKey)> = group
                .iter()
                .filter_map(|utxo| {
                    XOnlyPublicKey::from_slice(&utxo.scriptpubkey.as_bytes()[2..34])
                        .ok()
                        .map(|key| (OutPoint::new(utxo.txid, utxo.vout), key))
                })
                .collect();

            let found = match receive::scan_transaction(
                &self.secp,
                &self.keys,
                &self.label_lookup,
                &tweak,
                &outputs,
            ) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(%txid, %tweak, error = %e, "Transaction scan failed, skipping.");
                    continue;
                }
            };

            for output in found {
                let Some(served) = group
                    .iter()
                    .find(|utxo| OutPoint::new(utxo.txid, utxo.vout) == output.outpoint())
                else {
                    return Err(ScanError::MisalignedOutputs { txid });
                };
                owned.push(OwnedUtxo::from_parts(
                    output,
                    served.value,
                    served.timestamp,
                    served_state(served),
                ));
            }
        }

        Ok(owned)
    }
}

/// The 32 byte output key of a taproot output, `None` for any other script.
fn output_key_bytes(utxo: &UtxoServed) -> Option<OutputKeyBytes> {
    if !utxo.scriptpubkey.is_p2tr() {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&utxo.scriptpubkey.as_bytes()[2..34]);
    Some(key)
}

fn served_state(utxo: &UtxoServed) -> UtxoState {
    if utxo.spent {
        UtxoState::Spent
    } else if !utxo.confirmed {
        UtxoState::Unconfirmed
    } else {
        UtxoState::Unspent
    }
}

/// Owned outputs created at `height`.
///
/// The block's output set is only fetched when a candidate matches the new-output filter.
pub async fn sync_block(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    scanner: &BlockScanner,
    height: u32,
    dust_limit: u64,
) -> Result<Vec<OwnedUtxo>, ScanError> {
    let tweaks = client::get_tweaks(fetch_request_sender, height, dust_limit).await?;
    if tweaks.is_empty() {
        return Ok(Vec::new());
    }

    let candidates = scanner.candidates(&tweaks);
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let filter = client::get_filter(fetch_request_sender, height, FilterType::NewUtxos).await?;
    if !match_filter(&filter, candidates.keys().map(|key| key.as_slice()))? {
        return Ok(Vec::new());
    }
    tracing::debug!(height, "New output filter matched.");

    let utxos = client::get_utxos(fetch_request_sender, height).await?;
    scanner.resolve_owned_utxos(&candidates, &utxos)
}

//! Detects spends of tracked outputs from a block's spent-outpoint filter.

use std::collections::HashMap;

use bitcoin::{
    hashes::{sha256, Hash, HashEngine},
    BlockHash, OutPoint,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    client::{self, FetchRequest, FilterType},
    primitives::OutpointHash,
    scan::{error::ScanError, filter::match_filter},
};

/// `sha256(txid || vout_le || block_hash)[..8]`, txid and block hash in internal byte order.
/// This is the element the indexer puts in its spent-outpoint filter.
pub fn outpoint_hash(outpoint: &OutPoint, block_hash: &BlockHash) -> OutpointHash {
    let mut eng = sha256::Hash::engine();
    eng.input(outpoint.txid.as_byte_array());
    eng.input(&outpoint.vout.to_le_bytes());
    eng.input(block_hash.as_byte_array());
    let hash = sha256::Hash::from_engine(eng).to_byte_array();

    let mut short = [0u8; 8];
    short.copy_from_slice(&hash[..8]);
    short
}

/// Short hashes of `outpoints` for one block.
pub fn local_outpoint_hashes<'a>(
    outpoints: impl IntoIterator<Item = &'a OutPoint>,
    block_hash: &BlockHash,
) -> HashMap<OutpointHash, OutPoint> {
    outpoints
        .into_iter()
        .map(|outpoint| (outpoint_hash(outpoint, block_hash), *outpoint))
        .collect()
}

/// Which of the `tracked` (not yet spent) outpoints were spent at `height`.
///
/// Nothing is fetched when nothing is tracked. The exact index is only fetched after a
/// filter match.
pub async fn spent_outpoints(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    height: u32,
    tracked: &[OutPoint],
) -> Result<Vec<OutPoint>, ScanError> {
    if tracked.is_empty() {
        return Ok(Vec::new());
    }

    let filter = client::get_filter(fetch_request_sender, height, FilterType::Spent).await?;
    let hashes = local_outpoint_hashes(tracked, &filter.block_hash);

    if !match_filter(&filter, hashes.keys().map(|hash| hash.as_slice()))? {
        return Ok(Vec::new());
    }

    let index = client::get_spent_index(fetch_request_sender, height).await?;
    let spent: Vec<OutPoint> = index
        .data
        .iter()
        .filter_map(|hash| hashes.get(hash).copied())
        .collect();

    if !spent.is_empty() {
        tracing::info!(height, count = spent.len(), "Spent UTXOs detected.");
    }
    Ok(spent)
}

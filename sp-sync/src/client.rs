//! Module for handling all connections to the indexer

use async_trait::async_trait;
use bitcoin::{secp256k1::PublicKey, BlockHash, ScriptBuf, Txid};
use serde::Deserialize;
use tokio::sync::{mpsc::UnboundedSender, oneshot};

use crate::primitives::OutpointHash;

pub mod blindbit;
pub mod fetch;
pub mod oracle;

/// Errors talking to the block indexer.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// Transport failure
    #[error("Request failed. {0}")]
    Http(#[from] reqwest::Error),
    /// Invalid base URL or request path
    #[error("Invalid url. {0}")]
    Url(#[from] url::ParseError),
    /// The response body was not the expected JSON
    #[error("Malformed response. {0}")]
    Json(#[from] serde_json::Error),
    /// A hex field in the response did not decode
    #[error("Malformed hex in response. {0}")]
    Hex(#[from] hex::FromHexError),
    /// A field decoded but has the wrong shape
    #[error("Invalid response data. {0}")]
    InvalidData(String),
    /// The request did not finish within its timeout
    #[error("Request timed out")]
    Timeout,
    /// The fetch task is no longer running
    #[error("Fetcher is not running")]
    FetcherStopped,
}

/// Block filters served per height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    /// Taproot output keys created in the block
    NewUtxos,
    /// Short hashes of outpoints spent in the block
    Spent,
}

/// A serialized filter together with the hash of the block it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterData {
    /// Block hash, keying the filter's SipHash
    pub block_hash: BlockHash,
    /// Golomb-Rice coded set, prefixed by its element count
    pub data: Vec<u8>,
}

/// An output created in a block, as served by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UtxoServed {
    /// Creating transaction
    pub txid: Txid,
    /// Output index
    pub vout: u32,
    /// Satoshis
    #[serde(alias = "amount")]
    pub value: u64,
    /// Output script
    pub scriptpubkey: ScriptBuf,
    /// Already spent according to the indexer
    #[serde(default)]
    pub spent: bool,
    /// Block time of inclusion
    #[serde(default)]
    pub timestamp: u64,
    /// Whether the creating transaction is mined
    #[serde(default = "confirmed_default")]
    pub confirmed: bool,
}

fn confirmed_default() -> bool {
    true
}

/// The exact spent-outpoint hashes for a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpentIndex {
    /// Block the index belongs to
    pub block_hash: BlockHash,
    /// 8-byte outpoint hashes
    pub data: Vec<OutpointHash>,
}

/// Data source for the scan engine.
#[async_trait]
pub trait BlockIndexer: Send + Sync {
    /// Height of the best block
    async fn chain_tip(&self) -> Result<u32, IndexerError>;

    /// ECDH tweaks of the transactions at `height` holding an output of at least
    /// `dust_limit` satoshis
    async fn tweaks(&self, height: u32, dust_limit: u64) -> Result<Vec<PublicKey>, IndexerError>;

    /// Filter of the given type for the block at `height`
    async fn filter(&self, height: u32, filter_type: FilterType)
        -> Result<FilterData, IndexerError>;

    /// Taproot outputs created at `height`
    async fn utxos(&self, height: u32) -> Result<Vec<UtxoServed>, IndexerError>;

    /// Exact spent-outpoint hashes for `height`
    async fn spent_index(&self, height: u32) -> Result<SpentIndex, IndexerError>;
}

/// Fetch requests are created and sent to the [`crate::client::fetch::fetch`] task when a connection to the indexer is required.
///
/// Each variant includes a [`tokio::sync::oneshot::Sender`] for returning the fetched data to the requester.
#[derive(Debug)]
pub enum FetchRequest {
    /// Gets the height of the blockchain from the indexer.
    ChainTip(oneshot::Sender<Result<u32, IndexerError>>),
    /// Gets the tweaks for a block height above a dust limit.
    Tweaks(oneshot::Sender<Result<Vec<PublicKey>, IndexerError>>, u32, u64),
    /// Gets a block filter.
    Filter(oneshot::Sender<Result<FilterData, IndexerError>>, u32, FilterType),
    /// Gets the taproot outputs of a block.
    Utxos(oneshot::Sender<Result<Vec<UtxoServed>, IndexerError>>, u32),
    /// Gets the spent-outpoint index of a block.
    SpentIndex(oneshot::Sender<Result<SpentIndex, IndexerError>>, u32),
}

async fn request<T>(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    fetch_request: impl FnOnce(oneshot::Sender<Result<T, IndexerError>>) -> FetchRequest,
) -> Result<T, IndexerError> {
    let (sender, receiver) = oneshot::channel();
    fetch_request_sender
        .send(fetch_request(sender))
        .map_err(|_| IndexerError::FetcherStopped)?;
    receiver.await.map_err(|_| IndexerError::FetcherStopped)?
}

/// Gets the height of the blockchain from the indexer.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_chain_tip(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
) -> Result<u32, IndexerError> {
    request(fetch_request_sender, FetchRequest::ChainTip).await
}

/// Gets the tweaks for a block height.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_tweaks(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    height: u32,
    dust_limit: u64,
) -> Result<Vec<PublicKey>, IndexerError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::Tweaks(sender, height, dust_limit)
    })
    .await
}

/// Gets a block filter.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_filter(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    height: u32,
    filter_type: FilterType,
) -> Result<FilterData, IndexerError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::Filter(sender, height, filter_type)
    })
    .await
}

/// Gets the taproot outputs of a block.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_utxos(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    height: u32,
) -> Result<Vec<UtxoServed>, IndexerError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::Utxos(sender, height)
    })
    .await
}

/// Gets the spent-outpoint index of a block.
///
/// Requires [`crate::client::fetch::fetch`] to be running concurrently, connected via the `fetch_request` channel.
pub async fn get_spent_index(
    fetch_request_sender: &UnboundedSender<FetchRequest>,
    height: u32,
) -> Result<SpentIndex, IndexerError> {
    request(fetch_request_sender, |sender| {
        FetchRequest::SpentIndex(sender, height)
    })
    .await
}

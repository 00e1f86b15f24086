//! HTTP client for a BlindBit style silent payment indexer.

use std::time::Duration;

use async_trait::async_trait;
use bitcoin::{secp256k1::PublicKey, BlockHash};
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    client::{BlockIndexer, FilterData, FilterType, IndexerError, SpentIndex, UtxoServed},
    primitives::OutpointHash,
};

#[derive(Debug, Deserialize)]
struct BlockHeightResponse {
    #[serde(alias = "height")]
    block_height: u32,
}

#[derive(Debug, Deserialize)]
struct FilterResponse {
    block_hash: BlockHash,
    data: String,
}

#[derive(Debug, Deserialize)]
struct SpentIndexResponse {
    block_hash: BlockHash,
    data: Vec<String>,
}

/// An indexer reached over HTTP at a base url.
#[derive(Debug, Clone)]
pub struct BlindbitClient {
    host_url: Url,
    client: Client,
    chain_tip_timeout: Duration,
}

impl BlindbitClient {
    /// Creates a client for `host_url`. Every request is bounded by `request_timeout`,
    /// chain tip requests by `chain_tip_timeout`.
    pub fn new(
        host_url: &str,
        request_timeout: Duration,
        chain_tip_timeout: Duration,
    ) -> Result<Self, IndexerError> {
        let mut host_url = Url::parse(host_url)?;
        let client = Client::builder().timeout(request_timeout).build()?;

        // we need a trailing slash, if not present we append it
        if !host_url.path().ends_with('/') {
            host_url.set_path(&format!("{}/", host_url.path()));
        }

        tracing::info!("Using indexer {}", host_url);

        Ok(BlindbitClient {
            host_url,
            client,
            chain_tip_timeout,
        })
    }

    /// Creates a client from the indexer uri and timeouts of `config`.
    pub fn from_config(config: &spconfig::ScanConfig) -> Result<Self, IndexerError> {
        Self::new(
            &config.indexer_uri.to_string(),
            config.request_timeout,
            config.chain_tip_timeout,
        )
    }

    /// Base url, always with a trailing slash.
    pub fn host_url(&self) -> &Url {
        &self.host_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, IndexerError> {
        Ok(self.host_url.join(path)?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Option<Duration>,
    ) -> Result<T, IndexerError> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let res = request.send().await?.error_for_status()?;
        Ok(serde_json::from_str(&res.text().await?)?)
    }
}

fn filter_path(height: u32, filter_type: FilterType) -> String {
    match filter_type {
        FilterType::NewUtxos => format!("filter/new-utxos/{}", height),
        FilterType::Spent => format!("filter/spent/{}", height),
    }
}

fn decode_outpoint_hash(hash: &str) -> Result<OutpointHash, IndexerError> {
    let bytes = hex::decode(hash)?;
    OutpointHash::try_from(bytes.as_slice()).map_err(|_| {
        IndexerError::InvalidData(format!(
            "spent index entry has {} bytes, expected 8",
            bytes.len()
        ))
    })
}

#[async_trait]
impl BlockIndexer for BlindbitClient {
    async fn chain_tip(&self) -> Result<u32, IndexerError> {
        let url = self.endpoint("block-height")?;
        let res: BlockHeightResponse = self.get(url, Some(self.chain_tip_timeout)).await?;
        Ok(res.block_height)
    }

    async fn tweaks(&self, height: u32, dust_limit: u64) -> Result<Vec<PublicKey>, IndexerError> {
        let mut url = self.endpoint(&format!("tweaks/{}", height))?;
        url.query_pairs_mut()
            .append_pair("dustLimit", &dust_limit.to_string());
        // the indexer answers `null` for heights without tweaks
        let tweaks: Option<Vec<PublicKey>> = self.get(url, None).await?;
        Ok(tweaks.unwrap_or_default())
    }

    async fn filter(
        &self,
        height: u32,
        filter_type: FilterType,
    ) -> Result<FilterData, IndexerError> {
        let url = self.endpoint(&filter_path(height, filter_type))?;
        let res: FilterResponse = self.get(url, None).await?;
        Ok(FilterData {
            block_hash: res.block_hash,
            data: hex::decode(res.data)?,
        })
    }

    async fn utxos(&self, height: u32) -> Result<Vec<UtxoServed>, IndexerError> {
        let url = self.endpoint(&format!("utxos/{}", height))?;
        let utxos: Option<Vec<UtxoServed>> = self.get(url, None).await?;
        Ok(utxos.unwrap_or_default())
    }

    async fn spent_index(&self, height: u32) -> Result<SpentIndex, IndexerError> {
        let url = self.endpoint(&format!("spent-index/{}", height))?;
        let res: SpentIndexResponse = self.get(url, None).await?;
        Ok(SpentIndex {
            block_hash: res.block_hash,
            data: res
                .data
                .iter()
                .map(|hash| decode_outpoint_hash(hash))
                .collect::<Result<_, _>>()?,
        })
    }
}

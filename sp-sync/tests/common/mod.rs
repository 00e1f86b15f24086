#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bitcoin::{
    hashes::Hash,
    key::TweakedPublicKey,
    secp256k1::{PublicKey, Secp256k1, SecretKey},
    BlockHash, Network, OutPoint, ScriptBuf, Txid, XOnlyPublicKey,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use sp_sync::{
    client::{
        fetch::fetch,
        oracle::{script_hash, OracleError, ScriptBalance, SpendStateOracle},
        BlockIndexer, FilterData, FilterType, IndexerError, SpentIndex, UtxoServed,
    },
    persist::MemoryStore,
    scan::{candidates::derive_candidates, filter::build_filter, spent::outpoint_hash},
    sync::Syncer,
    traits::WalletStore,
    wallet::Wallet,
};
use spconfig::{ChainType, ScanConfig};

pub const SCAN_SECRET: [u8; 32] = [0x11; 32];
pub const SPEND_SECRET: [u8; 32] = [0x22; 32];

pub fn test_wallet(birth_height: u32) -> Wallet {
    let secp = Secp256k1::new();
    Wallet::new(
        SecretKey::from_slice(&SCAN_SECRET).unwrap(),
        SecretKey::from_slice(&SPEND_SECRET)
            .unwrap()
            .public_key(&secp),
        birth_height,
        1,
        Network::Signet,
    )
    .unwrap()
}

pub fn test_config() -> ScanConfig {
    let mut config = ScanConfig::create_unconnected(ChainType::Signet, None);
    config.new_block_delay = Duration::from_millis(10);
    config.request_timeout = Duration::from_secs(5);
    config
}

pub fn tweak(seed: u8) -> PublicKey {
    SecretKey::from_slice(&[seed; 32])
        .unwrap()
        .public_key(&Secp256k1::new())
}

/// Output key the wallet receives at for `tweak`, with no label and k = 0.
pub fn owned_output_key(wallet: &Wallet, tweak: &PublicKey) -> XOnlyPublicKey {
    let candidates = derive_candidates(&Secp256k1::new(), &wallet.scan_keys(), &[], tweak).unwrap();
    XOnlyPublicKey::from_slice(&candidates[0].0).unwrap()
}

pub fn foreign_output_key(seed: u8) -> XOnlyPublicKey {
    tweak(seed).x_only_public_key().0
}

pub fn served(txid: Txid, vout: u32, key: XOnlyPublicKey, value: u64) -> UtxoServed {
    UtxoServed {
        txid,
        vout,
        value,
        scriptpubkey: ScriptBuf::new_p2tr_tweaked(TweakedPublicKey::dangerous_assume_tweaked(key)),
        spent: false,
        timestamp: 1_700_000_000,
        confirmed: true,
    }
}

pub fn txid(seed: u8) -> Txid {
    Txid::from_byte_array([seed; 32])
}

fn block_hash(height: u32) -> BlockHash {
    let mut bytes = [0xb1; 32];
    bytes[..4].copy_from_slice(&height.to_le_bytes());
    BlockHash::from_byte_array(bytes)
}

#[derive(Debug, Clone, Default)]
pub struct MockBlock {
    pub tweaks: Vec<PublicKey>,
    pub utxos: Vec<UtxoServed>,
    pub spent: Vec<OutPoint>,
}

/// In memory indexer. Heights without a block have no tweaks, outputs or spends.
#[derive(Default)]
pub struct MockIndexer {
    tip: AtomicU32,
    blocks: Mutex<HashMap<u32, MockBlock>>,
    tweak_calls: Mutex<HashMap<u32, usize>>,
    utxo_calls: Mutex<HashMap<u32, usize>>,
    cancel_at: Mutex<Option<(u32, CancellationToken)>>,
    failing: Mutex<HashSet<u32>>,
    corrupt: Mutex<Vec<(u32, FilterType)>>,
}

impl MockIndexer {
    pub fn new(tip: u32) -> Arc<Self> {
        let indexer = Self::default();
        indexer.tip.store(tip, Ordering::SeqCst);
        Arc::new(indexer)
    }

    pub fn set_tip(&self, tip: u32) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn block_mut<F: FnOnce(&mut MockBlock)>(&self, height: u32, f: F) {
        f(self.blocks.lock().unwrap().entry(height).or_default());
    }

    /// Adds a transaction at `height` paying `amount` to the wallet, next to a foreign
    /// output. Returns the owned outpoint.
    pub fn pay_wallet(&self, wallet: &Wallet, height: u32, seed: u8, amount: u64) -> OutPoint {
        let tweak = tweak(seed);
        let key = owned_output_key(wallet, &tweak);
        let txid = txid(seed);
        self.block_mut(height, |block| {
            block.tweaks.push(tweak);
            block
                .utxos
                .push(served(txid, 0, foreign_output_key(seed.wrapping_add(100)), 1_234));
            block.utxos.push(served(txid, 1, key, amount));
        });
        OutPoint::new(txid, 1)
    }

    pub fn spend(&self, height: u32, outpoint: OutPoint) {
        self.block_mut(height, |block| block.spent.push(outpoint));
    }

    /// Cancels `token` when the tweaks of `height` are requested.
    pub fn cancel_at(&self, height: u32, token: CancellationToken) {
        *self.cancel_at.lock().unwrap() = Some((height, token));
    }

    /// Fails every tweak request for `height` until [`MockIndexer::recover`] is called.
    pub fn fail_at(&self, height: u32) {
        self.failing.lock().unwrap().insert(height);
    }

    pub fn recover(&self, height: u32) {
        self.failing.lock().unwrap().remove(&height);
    }

    /// Serves a filter at `height` whose header claims elements the body does not hold.
    pub fn corrupt_filter(&self, height: u32, filter_type: FilterType) {
        self.corrupt.lock().unwrap().push((height, filter_type));
    }

    pub fn tweak_calls(&self, height: u32) -> usize {
        self.tweak_calls.lock().unwrap().get(&height).copied().unwrap_or(0)
    }

    pub fn total_tweak_calls(&self) -> usize {
        self.tweak_calls.lock().unwrap().values().sum()
    }

    pub fn utxo_calls(&self, height: u32) -> usize {
        self.utxo_calls.lock().unwrap().get(&height).copied().unwrap_or(0)
    }

    fn block(&self, height: u32) -> MockBlock {
        self.blocks
            .lock()
            .unwrap()
            .get(&height)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl BlockIndexer for MockIndexer {
    async fn chain_tip(&self) -> Result<u32, IndexerError> {
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn tweaks(&self, height: u32, _dust_limit: u64) -> Result<Vec<PublicKey>, IndexerError> {
        *self.tweak_calls.lock().unwrap().entry(height).or_default() += 1;
        if let Some((cancel_height, token)) = self.cancel_at.lock().unwrap().as_ref() {
            if *cancel_height == height {
                token.cancel();
            }
        }
        if self.failing.lock().unwrap().contains(&height) {
            return Err(IndexerError::InvalidData(format!(
                "block {height} unavailable"
            )));
        }
        Ok(self.block(height).tweaks)
    }

    async fn filter(
        &self,
        height: u32,
        filter_type: FilterType,
    ) -> Result<FilterData, IndexerError> {
        let block = self.block(height);
        let block_hash = block_hash(height);
        if self
            .corrupt
            .lock()
            .unwrap()
            .contains(&(height, filter_type))
        {
            return Ok(FilterData {
                block_hash,
                data: vec![0x05],
            });
        }
        let data = match filter_type {
            FilterType::NewUtxos => build_filter(
                &block_hash,
                block
                    .utxos
                    .iter()
                    .map(|utxo| utxo.scriptpubkey.as_bytes()[2..].to_vec()),
            ),
            FilterType::Spent => build_filter(
                &block_hash,
                block
                    .spent
                    .iter()
                    .map(|outpoint| outpoint_hash(outpoint, &block_hash)),
            ),
        }
        .map_err(|e| IndexerError::InvalidData(e.to_string()))?;
        Ok(FilterData { block_hash, data })
    }

    async fn utxos(&self, height: u32) -> Result<Vec<UtxoServed>, IndexerError> {
        *self.utxo_calls.lock().unwrap().entry(height).or_default() += 1;
        Ok(self.block(height).utxos)
    }

    async fn spent_index(&self, height: u32) -> Result<SpentIndex, IndexerError> {
        let block_hash = block_hash(height);
        Ok(SpentIndex {
            block_hash,
            data: self
                .block(height)
                .spent
                .iter()
                .map(|outpoint| outpoint_hash(outpoint, &block_hash))
                .collect(),
        })
    }
}

/// Oracle answering from a fixed table of script balances.
#[derive(Default)]
pub struct MockOracle {
    balances: Mutex<HashMap<String, ScriptBalance>>,
}

impl MockOracle {
    pub fn set_balance(&self, output_key: &XOnlyPublicKey, confirmed: i64, unconfirmed: i64) {
        self.balances.lock().unwrap().insert(
            script_hash(output_key),
            ScriptBalance {
                confirmed,
                unconfirmed,
            },
        );
    }
}

#[async_trait]
impl SpendStateOracle for MockOracle {
    async fn get_balance(&self, script_hash: &str) -> Result<ScriptBalance, OracleError> {
        self.balances
            .lock()
            .unwrap()
            .get(script_hash)
            .copied()
            .ok_or_else(|| OracleError::Request(format!("unknown script {script_hash}")))
    }
}

/// A syncer wired to `indexer` through a running fetch task.
pub fn syncer(
    indexer: Arc<MockIndexer>,
    wallet: Wallet,
    store: Arc<dyn WalletStore>,
    oracle: Option<Arc<dyn SpendStateOracle>>,
) -> Syncer {
    let config = test_config();
    let (fetch_request_sender, fetch_request_receiver) = mpsc::unbounded_channel();
    tokio::spawn(fetch(
        fetch_request_receiver,
        indexer,
        config.request_timeout,
    ));
    Syncer::new(config, wallet, fetch_request_sender, oracle, store)
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

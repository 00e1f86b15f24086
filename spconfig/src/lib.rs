#![forbid(unsafe_code)]
use std::{
    io::{self, Error, ErrorKind},
    path::{Path, PathBuf},
    time::Duration,
};

use bitcoin::Network;
use log::LevelFilter;
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
    Config,
};

pub const DEFAULT_INDEXER_SERVER: &str = "http://localhost:8000";
pub const DEFAULT_WALLET_NAME: &str = "spscan-wallet.json";
pub const DEFAULT_LOGFILE_NAME: &str = "spscan-wallet.debug.log";
pub const DEFAULT_DUST_LIMIT: u64 = 1000;
pub const DEFAULT_LABEL_COUNT: u32 = 1;
pub const DEFAULT_BIRTH_HEIGHT: u32 = 840_000;
/// Heights scanned without a find before progress is written anyway.
pub const DEFAULT_PERSIST_INTERVAL: u32 = 100;

pub const AUTOMATIC_SCAN_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Used instead of [`AUTOMATIC_SCAN_INTERVAL`] when no spend-state oracle is configured.
pub const AUTOMATIC_SCAN_INTERVAL_NO_ORACLE: Duration = Duration::from_secs(60);
pub const SPENT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Grace period granted to the indexer after a new block is announced.
pub const NEW_BLOCK_DELAY: Duration = Duration::from_secs(5);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const CHAIN_TIP_TIMEOUT: Duration = Duration::from_secs(5);

pub fn construct_indexer_uri(server: Option<String>) -> Result<http::Uri, http::uri::InvalidUri> {
    match server {
        Some(s) => {
            if s.starts_with("http") {
                s
            } else {
                "http://".to_string() + &s
            }
        }
        None => DEFAULT_INDEXER_SERVER.to_string(),
    }
    .parse()
}

/// Everything the scan engine needs that is not key material.
#[derive(Clone, Debug)]
pub struct ScanConfig {
    pub indexer_uri: http::Uri,
    pub chain: ChainType,
    /// Outputs below this many satoshis are filtered out by the indexer.
    pub dust_limit: u64,
    pub label_count: u32,
    pub persist_interval: u32,
    pub new_block_delay: Duration,
    pub automatic_scan_interval: Duration,
    pub spent_check_interval: Duration,
    pub request_timeout: Duration,
    pub chain_tip_timeout: Duration,
    pub wallet_dir: Option<PathBuf>,
    pub wallet_name: PathBuf,
    pub logfile_name: PathBuf,
}

impl ScanConfig {
    pub fn create_unconnected(chain: ChainType, dir: Option<PathBuf>) -> ScanConfig {
        ScanConfig {
            indexer_uri: http::Uri::from_static(DEFAULT_INDEXER_SERVER),
            chain,
            dust_limit: DEFAULT_DUST_LIMIT,
            label_count: DEFAULT_LABEL_COUNT,
            persist_interval: DEFAULT_PERSIST_INTERVAL,
            new_block_delay: NEW_BLOCK_DELAY,
            automatic_scan_interval: AUTOMATIC_SCAN_INTERVAL,
            spent_check_interval: SPENT_CHECK_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
            chain_tip_timeout: CHAIN_TIP_TIMEOUT,
            wallet_dir: dir,
            wallet_name: DEFAULT_WALLET_NAME.into(),
            logfile_name: DEFAULT_LOGFILE_NAME.into(),
        }
    }

    pub fn with_indexer_uri(mut self, uri: http::Uri) -> Self {
        self.indexer_uri = uri;
        self
    }

    /// The coarse polling interval, which tightens when no oracle backs the spent check.
    pub fn scan_interval(&self, has_oracle: bool) -> Duration {
        if has_oracle {
            self.automatic_scan_interval
        } else {
            self.automatic_scan_interval.min(AUTOMATIC_SCAN_INTERVAL_NO_ORACLE)
        }
    }

    pub fn network(&self) -> Network {
        self.chain.network()
    }

    pub fn get_log_config(&self) -> io::Result<Config> {
        let window_size = 3; // log0, log1, log2
        let fixed_window_roller = FixedWindowRoller::builder()
            .build("spscan-wallet-log{}", window_size)
            .map_err(|e| Error::new(ErrorKind::Other, format!("{}", e)))?;
        let size_limit = 5 * 1024 * 1024; // 5MB as max log file size to roll
        let size_trigger = SizeTrigger::new(size_limit);
        let compound_policy =
            CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

        Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(LevelFilter::Info)))
                    .build(
                        "logfile",
                        Box::new(
                            RollingFileAppender::builder()
                                .encoder(Box::new(PatternEncoder::new("{d} {l}::{m}{n}")))
                                .build(self.get_log_path(), Box::new(compound_policy))?,
                        ),
                    ),
            )
            .build(
                Root::builder()
                    .appender("logfile")
                    .build(LevelFilter::Debug),
            )
            .map_err(|e| Error::new(ErrorKind::Other, format!("{}", e)))
    }

    /// An explicit `wallet_dir` is used as given. Otherwise `~/.spscan`, with a
    /// subdirectory per non-mainnet chain.
    pub fn get_wallet_dir(&self) -> Box<Path> {
        let mut data_location;
        if let Some(dir) = &self.wallet_dir {
            data_location = dir.clone();
        } else {
            #[cfg(any(target_os = "macos", target_os = "windows"))]
            {
                data_location = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
                data_location.push("spscan");
            }

            #[cfg(not(any(target_os = "macos", target_os = "windows")))]
            {
                if dirs::home_dir().is_none() {
                    log::info!("Couldn't determine home dir!");
                }
                data_location = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
                data_location.push(".spscan");
            }

            match &self.chain {
                ChainType::Mainnet => {}
                other => data_location.push(other.to_string()),
            };
        }

        data_location.into_boxed_path()
    }

    pub fn get_wallet_path(&self) -> Box<Path> {
        let mut wallet_location = self.get_wallet_dir().into_path_buf();
        wallet_location.push(&self.wallet_name);

        wallet_location.into_boxed_path()
    }

    pub fn wallet_exists(&self) -> bool {
        self.get_wallet_path().exists()
    }

    pub fn backup_existing_wallet(&self) -> Result<String, String> {
        if !self.wallet_exists() {
            return Err(format!(
                "Couldn't find existing wallet to backup. Looked in {:?}",
                self.get_wallet_path().to_str()
            ));
        }
        use std::time::{SystemTime, UNIX_EPOCH};

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let mut backup_file_path = self.get_wallet_dir().into_path_buf();
        backup_file_path.push(format!("spscan-wallet.backup.{}.json", timestamp));

        let backup_file_str = backup_file_path.to_string_lossy().to_string();
        std::fs::copy(self.get_wallet_path(), backup_file_path).map_err(|e| format!("{}", e))?;

        Ok(backup_file_str)
    }

    pub fn get_log_path(&self) -> Box<Path> {
        let mut log_path = self.get_wallet_dir().into_path_buf();
        log_path.push(&self.logfile_name);

        log_path.into_boxed_path()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainType {
    Mainnet,
    Testnet,
    Signet,
    Regtest,
}

impl ChainType {
    pub fn network(&self) -> Network {
        use ChainType::*;
        match self {
            Mainnet => Network::Bitcoin,
            Testnet => Network::Testnet,
            Signet => Network::Signet,
            Regtest => Network::Regtest,
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use ChainType::*;
        let name = match self {
            Mainnet => "main",
            Testnet => "testnet",
            Signet => "signet",
            Regtest => "regtest",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for ChainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ChainType::*;
        match s {
            "main" | "mainnet" | "bitcoin" => Ok(Mainnet),
            "test" | "testnet" => Ok(Testnet),
            "signet" => Ok(Signet),
            "regtest" => Ok(Regtest),
            other => Err(format!(
                "unknown chain \"{other}\", expected one of main, testnet, signet, regtest"
            )),
        }
    }
}

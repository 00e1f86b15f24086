#![forbid(unsafe_code)]
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Once};

use bitcoin::secp256k1::{PublicKey, SecretKey};
use clap::{self, Arg};
use log::{error, info, warn};

use sp_sync::{
    client::{blindbit::BlindbitClient, IndexerError},
    error::SyncError,
    keys::KeyError,
    persist::{FileStore, PersistError},
    scan_loop::ScanLoop,
    traits::WalletStore,
    wallet::Wallet,
};
use spconfig::{ChainType, ScanConfig};

static LOG_INIT: Once = Once::new();

pub fn build_clap_app() -> clap::Command {
    clap::Command::new("spscan").version(env!("CARGO_PKG_VERSION"))
            .about("Scans the chain for silent payments received by a wallet")
            .arg(Arg::new("scan-secret")
                .long("scan-secret")
                .value_name("scan-secret")
                .value_parser(parse_secret_key)
                .help("Hex encoded scan secret key. Creates the wallet if none exists, otherwise must match the stored wallet."))
            .arg(Arg::new("spend-pub")
                .long("spend-pub")
                .value_name("spend-pub")
                .value_parser(parse_public_key)
                .requires("scan-secret")
                .help("Hex encoded compressed spend public key. Required together with --scan-secret."))
            .arg(Arg::new("birthday")
                .long("birthday")
                .value_name("birthday")
                .value_parser(clap::value_parser!(u32))
                .help("Earliest block height that may hold a payment to the wallet. Only used when creating a wallet."))
            .arg(Arg::new("server")
                .long("server")
                .value_name("server")
                .help("Indexer server to connect to.")
                .default_value(spconfig::DEFAULT_INDEXER_SERVER))
            .arg(Arg::new("chain")
                .long("chain").short('c')
                .value_name("chain")
                .default_value("signet")
                .help(r#"Chain to scan. One of "mainnet", "testnet", "signet" or "regtest""#))
            .arg(Arg::new("data-dir")
                .long("data-dir")
                .value_name("data-dir")
                .help("Absolute path to use as data directory"))
            .arg(Arg::new("labels")
                .long("labels")
                .value_name("labels")
                .value_parser(clap::value_parser!(u32))
                .help("Number of labels to scan for, including the change label. Only used when creating a wallet."))
            .arg(Arg::new("dust-limit")
                .long("dust-limit")
                .value_name("dust-limit")
                .value_parser(clap::value_parser!(u64))
                .help("Ignore outputs below this many satoshis."))
            .arg(Arg::new("replace-wallet")
                .long("replace-wallet")
                .requires("scan-secret")
                .help("Back up a stored wallet whose keys differ from --scan-secret and --spend-pub, then create a new one")
                .action(clap::ArgAction::SetTrue))
            .arg(Arg::new("log-file")
                .long("log-file")
                .help("Log to a rolling file in the data directory instead of stdout")
                .action(clap::ArgAction::SetTrue))
}

fn parse_secret_key(s: &str) -> Result<SecretKey, String> {
    SecretKey::from_str(s).map_err(|e| e.to_string())
}

fn parse_public_key(s: &str) -> Result<PublicKey, String> {
    PublicKey::from_str(s).map_err(|e| e.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum TemplateFillError {
    #[error("Invalid chain {0}")]
    InvalidChain(String),
    #[error("Malformed server url. {0}")]
    MalformedServerUrl(String),
    #[error("--scan-secret requires --spend-pub")]
    MissingSpendKey,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Indexer(#[from] IndexerError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("No wallet found at {0}. Pass --scan-secret and --spend-pub to create one")]
    NoWallet(String),
    #[error("The stored wallet belongs to different keys. Pass --replace-wallet to back it up and start over")]
    KeyMismatch,
    #[error("Could not back up the stored wallet. {0}")]
    Backup(String),
    #[error("Could not initialize logging. {0}")]
    Logging(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Keys and settings for one run.
#[derive(Debug)]
pub struct ConfigTemplate {
    pub server: http::Uri,
    pub chain: ChainType,
    pub data_dir: Option<PathBuf>,
    pub keys: Option<(SecretKey, PublicKey)>,
    pub birthday: u32,
    pub label_count: u32,
    pub dust_limit: u64,
    pub replace_wallet: bool,
    pub log_file: bool,
}

impl ConfigTemplate {
    pub fn fill(matches: clap::ArgMatches) -> Result<Self, TemplateFillError> {
        let chain = matches
            .get_one::<String>("chain")
            .map(|chain| {
                ChainType::from_str(chain).map_err(|_| TemplateFillError::InvalidChain(chain.clone()))
            })
            .transpose()?
            .unwrap_or(ChainType::Signet);

        let server = spconfig::construct_indexer_uri(matches.get_one::<String>("server").cloned())
            .map_err(|e| TemplateFillError::MalformedServerUrl(e.to_string()))?;
        if server.scheme_str().is_none() || server.host().is_none() {
            return Err(TemplateFillError::MalformedServerUrl(format!(
                "Please provide the --server parameter as [scheme]://[host]:[port].\nYou provided: {}",
                server
            )));
        }

        let keys = match (
            matches.get_one::<SecretKey>("scan-secret"),
            matches.get_one::<PublicKey>("spend-pub"),
        ) {
            (Some(scan_secret), Some(spend_pubkey)) => Some((*scan_secret, *spend_pubkey)),
            (Some(_), None) => return Err(TemplateFillError::MissingSpendKey),
            _ => None,
        };

        Ok(Self {
            server,
            chain,
            data_dir: matches.get_one::<String>("data-dir").map(PathBuf::from),
            keys,
            birthday: matches
                .get_one::<u32>("birthday")
                .copied()
                .unwrap_or(spconfig::DEFAULT_BIRTH_HEIGHT),
            label_count: matches
                .get_one::<u32>("labels")
                .copied()
                .unwrap_or(spconfig::DEFAULT_LABEL_COUNT),
            dust_limit: matches
                .get_one::<u64>("dust-limit")
                .copied()
                .unwrap_or(spconfig::DEFAULT_DUST_LIMIT),
            replace_wallet: matches.get_flag("replace-wallet"),
            log_file: matches.get_flag("log-file"),
        })
    }

    pub fn scan_config(&self) -> ScanConfig {
        let mut config = ScanConfig::create_unconnected(self.chain, self.data_dir.clone())
            .with_indexer_uri(self.server.clone());
        config.dust_limit = self.dust_limit;
        config.label_count = self.label_count;
        config
    }
}

/// Reads the stored wallet, or creates and stores one from the template's keys.
///
/// A stored wallet for other keys is an error unless the template asks to replace it. The
/// wallet file, if there is one, is backed up before it is overwritten.
pub fn load_or_create_wallet(
    template: &ConfigTemplate,
    config: &ScanConfig,
    store: &dyn WalletStore,
) -> Result<Wallet, StartupError> {
    if let Some(bytes) = store.load()? {
        let wallet = Wallet::deserialize(&bytes).map_err(PersistError::from)?;
        let mismatch = template.keys.is_some_and(|(scan_secret, spend_pubkey)| {
            *wallet.scan_secret_key() != scan_secret || wallet.spend_pubkey() != spend_pubkey
        });
        if !mismatch {
            info!("Loaded wallet at height {}", wallet.last_scan_height());
            return Ok(wallet);
        }
        if !template.replace_wallet {
            return Err(StartupError::KeyMismatch);
        }
        if config.wallet_exists() {
            let backup = config.backup_existing_wallet().map_err(StartupError::Backup)?;
            println!("Backed up the previous wallet to {backup}");
        } else {
            warn!("Replacing a stored wallet that has no file to back up");
        }
    }

    let (scan_secret, spend_pubkey) = template.keys.ok_or_else(|| {
        StartupError::NoWallet(config.get_wallet_path().to_string_lossy().into_owned())
    })?;
    println!("Creating a new wallet");
    let wallet = Wallet::new(
        scan_secret,
        spend_pubkey,
        template.birthday,
        config.label_count,
        config.network(),
    )?;
    store.save(&wallet.serialize().map_err(PersistError::from)?)?;
    Ok(wallet)
}

fn init_logging(config: &ScanConfig, log_file: bool) -> Result<(), StartupError> {
    if log_file {
        std::fs::create_dir_all(config.get_wallet_dir())?;
        let log_config = config.get_log_config()?;
        log4rs::init_config(log_config).map_err(|e| StartupError::Logging(e.to_string()))?;
    } else {
        LOG_INIT.call_once(tracing_subscriber::fmt::init);
    }
    Ok(())
}

pub async fn run(template: ConfigTemplate) -> Result<(), StartupError> {
    let config = template.scan_config();
    init_logging(&config, template.log_file)?;

    let store = Arc::new(FileStore::new(config.get_wallet_path().to_path_buf()));
    let wallet = load_or_create_wallet(&template, &config, store.as_ref())?;
    let indexer = Arc::new(BlindbitClient::from_config(&config)?);

    info!("Starting spscan");
    info!("Scan config {:?}", config);
    info!("Indexer {}", indexer.host_url());
    println!("Receiving address: {}", wallet.generate_address());

    let (scan_loop, handle) = ScanLoop::new(config, wallet, indexer, None, store);

    let interrupt = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for ctrl-c: {e}");
        }
        interrupt.shutdown();
    });

    scan_loop.run().await?;
    println!(
        "Scanned to height {} with a balance of {} sats",
        handle.scan_height().await,
        handle.free_balance().await
    );
    Ok(())
}

pub fn run_cli() {
    let template = match ConfigTemplate::fill(build_clap_app().get_matches()) {
        Ok(template) => template,
        Err(e) => {
            eprintln!("Error filling config template: {e}");
            std::process::exit(1);
        }
    };
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Could not start runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(template)) {
        eprintln!("Error during startup:\n{e}\n");
        error!("{e}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::secp256k1::Secp256k1;
    use sp_sync::persist::MemoryStore;
    use test_case::test_case;

    const SCAN_SECRET: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn spend_pub() -> String {
        SecretKey::from_slice(&[0x22; 32])
            .unwrap()
            .public_key(&Secp256k1::new())
            .to_string()
    }

    fn template(args: &[&str]) -> Result<ConfigTemplate, TemplateFillError> {
        let matches = build_clap_app()
            .try_get_matches_from(std::iter::once("spscan").chain(args.iter().copied()))
            .unwrap();
        ConfigTemplate::fill(matches)
    }

    #[test]
    fn defaults() {
        let template = template(&[]).unwrap();
        assert_eq!(template.chain, ChainType::Signet);
        assert_eq!(template.server, http::Uri::from_static("http://localhost:8000/"));
        assert_eq!(template.birthday, spconfig::DEFAULT_BIRTH_HEIGHT);
        assert_eq!(template.dust_limit, spconfig::DEFAULT_DUST_LIMIT);
        assert!(template.keys.is_none());
        assert!(!template.log_file);
    }

    #[test_case("mainnet" => ChainType::Mainnet)]
    #[test_case("testnet" => ChainType::Testnet)]
    #[test_case("regtest" => ChainType::Regtest)]
    fn chain_flag(chain: &str) -> ChainType {
        template(&["--chain", chain]).unwrap().chain
    }

    #[test]
    fn unknown_chain_is_rejected() {
        assert!(matches!(
            template(&["--chain", "litecoin"]),
            Err(TemplateFillError::InvalidChain(_))
        ));
    }

    #[test]
    fn scan_secret_needs_spend_key() {
        assert!(matches!(
            template(&["--scan-secret", SCAN_SECRET]),
            Err(TemplateFillError::MissingSpendKey)
        ));
    }

    #[test]
    fn spend_key_needs_scan_secret() {
        let spend = spend_pub();
        assert!(build_clap_app()
            .try_get_matches_from(["spscan", "--spend-pub", spend.as_str()])
            .is_err());
    }

    #[test]
    fn wallet_is_created_once_and_reloaded() {
        let spend = spend_pub();
        let template = template(&[
            "--scan-secret",
            SCAN_SECRET,
            "--spend-pub",
            spend.as_str(),
            "--birthday",
            "100",
            "--labels",
            "3",
        ])
        .unwrap();
        let config = template.scan_config();
        let store = MemoryStore::new();

        let created = load_or_create_wallet(&template, &config, &store).unwrap();
        assert_eq!(created.birth_height(), 100);
        assert_eq!(created.labels().len(), 3);
        assert_eq!(store.save_count(), 1);

        let loaded = load_or_create_wallet(&template, &config, &store).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn stored_wallet_must_match_keys() {
        let spend = spend_pub();
        let store = MemoryStore::new();
        let first = template(&["--scan-secret", SCAN_SECRET, "--spend-pub", spend.as_str()]).unwrap();
        load_or_create_wallet(&first, &first.scan_config(), &store).unwrap();

        let other_secret = "3333333333333333333333333333333333333333333333333333333333333333";
        let second =
            template(&["--scan-secret", other_secret, "--spend-pub", spend.as_str()]).unwrap();
        assert!(matches!(
            load_or_create_wallet(&second, &second.scan_config(), &store),
            Err(StartupError::KeyMismatch)
        ));
    }

    #[test]
    fn replace_wallet_needs_scan_secret() {
        assert!(build_clap_app()
            .try_get_matches_from(["spscan", "--replace-wallet"])
            .is_err());
    }

    #[test]
    fn mismatched_wallet_is_backed_up_and_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let spend = spend_pub();
        let first = template(&[
            "--data-dir",
            data_dir,
            "--scan-secret",
            SCAN_SECRET,
            "--spend-pub",
            spend.as_str(),
        ])
        .unwrap();
        let config = first.scan_config();
        let store = FileStore::new(config.get_wallet_path().to_path_buf());
        let original = load_or_create_wallet(&first, &config, &store).unwrap();

        let other_secret = "3333333333333333333333333333333333333333333333333333333333333333";
        let second = template(&[
            "--data-dir",
            data_dir,
            "--scan-secret",
            other_secret,
            "--spend-pub",
            spend.as_str(),
            "--replace-wallet",
        ])
        .unwrap();
        let replaced = load_or_create_wallet(&second, &config, &store).unwrap();

        assert_ne!(replaced.scan_secret_key(), original.scan_secret_key());
        assert_eq!(
            Wallet::deserialize(&store.load().unwrap().unwrap()).unwrap(),
            replaced
        );
        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("spscan-wallet.backup."))
            .collect();
        assert_eq!(backups.len(), 1);
        let backed_up = std::fs::read(dir.path().join(&backups[0])).unwrap();
        assert_eq!(Wallet::deserialize(&backed_up).unwrap(), original);
    }

    #[test]
    fn missing_wallet_without_keys() {
        let dir = tempfile::tempdir().unwrap();
        let template = template(&["--data-dir", dir.path().to_str().unwrap()]).unwrap();
        let config = template.scan_config();
        let store = FileStore::new(config.get_wallet_path().to_path_buf());
        assert!(matches!(
            load_or_create_wallet(&template, &config, &store),
            Err(StartupError::NoWallet(_))
        ));
    }
}

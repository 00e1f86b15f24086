//! Wallet key material, labels and silent payment addresses.

use bitcoin::{
    bech32::{
        primitives::iter::{ByteIterExt, Fe32IterExt},
        Bech32m, Fe32, Hrp,
    },
    secp256k1::{self, PublicKey, Secp256k1, SecretKey, Signing, Verification},
    Network,
};
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use crate::hashes;

/// Human readable prefix of mainnet silent payment addresses.
pub const SP: Hrp = Hrp::parse_unchecked("sp");
/// Human readable prefix of testnet and signet silent payment addresses.
pub const TSP: Hrp = Hrp::parse_unchecked("tsp");
/// Human readable prefix of regtest silent payment addresses.
pub const SPRT: Hrp = Hrp::parse_unchecked("sprt");

/// Label index reserved for change.
pub const CHANGE_LABEL: u32 = 0;

/// Errors deriving keys or labels.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// Secp256k1 error
    #[error("Secp256k1 error. {0}")]
    Secp256k1(#[from] secp256k1::Error),
}

/// The key material needed to scan. The spend secret is never held here.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters)]
pub struct ScanKeys {
    /// Scan secret key `b_scan`
    #[getset(get = "pub")]
    scan_secret: SecretKey,
    /// Scan public key `B_scan`
    #[getset(get_copy = "pub")]
    scan_pubkey: PublicKey,
    /// Spend public key `B_spend`
    #[getset(get_copy = "pub")]
    spend_pubkey: PublicKey,
}

impl ScanKeys {
    /// Creates scan keys, deriving `B_scan` from the secret.
    pub fn new<C: Signing>(
        secp: &Secp256k1<C>,
        scan_secret: SecretKey,
        spend_pubkey: PublicKey,
    ) -> Self {
        Self {
            scan_pubkey: scan_secret.public_key(secp),
            scan_secret,
            spend_pubkey,
        }
    }

    /// Unlabelled receiving address.
    pub fn address(&self, network: Network) -> String {
        SilentPaymentCode::new(self.scan_pubkey, self.spend_pubkey, network).to_string()
    }
}

/// A label sub-identity `m` of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct Label {
    /// Label public key `L_m = hash(b_scan || m)·G`
    #[getset(get_copy = "pub")]
    pubkey: PublicKey,
    /// Label tweak scalar
    #[getset(get = "pub")]
    tweak: SecretKey,
    /// Address handed out for this label
    #[getset(get = "pub")]
    address: String,
    /// Label index
    #[getset(get_copy = "pub")]
    m: u32,
}

impl Label {
    /// Derives label `m` for the given keys.
    pub fn new<C: Signing + Verification>(
        secp: &Secp256k1<C>,
        keys: &ScanKeys,
        m: u32,
        network: Network,
    ) -> Result<Self, KeyError> {
        let tweak = hashes::label_tweak(keys.scan_secret(), m)?;
        let pubkey = tweak.public_key(secp);
        let labelled_spend = keys.spend_pubkey().combine(&pubkey)?;
        let address = SilentPaymentCode::new(keys.scan_pubkey(), labelled_spend, network).to_string();

        Ok(Label {
            pubkey,
            tweak,
            address,
            m,
        })
    }

    /// `m = 0` is reserved for change and never handed out.
    pub fn is_change(&self) -> bool {
        self.m == CHANGE_LABEL
    }
}

/// Version 0 silent payment address: bech32m over `B_scan || B_spend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilentPaymentCode {
    /// Scan public key
    pub scan: PublicKey,
    /// Spend public key, possibly labelled
    pub spend: PublicKey,
    /// Selects the human readable prefix
    pub network: Network,
}

impl SilentPaymentCode {
    /// Creates an address for the given public keys.
    pub fn new(scan: PublicKey, spend: PublicKey, network: Network) -> Self {
        Self {
            scan,
            spend,
            network,
        }
    }

    /// Human readable prefix for the network.
    pub fn hrp(&self) -> Hrp {
        match self.network {
            Network::Bitcoin => SP,
            Network::Regtest => SPRT,
            _ => TSP,
        }
    }
}

impl std::fmt::Display for SilentPaymentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = [self.scan.serialize(), self.spend.serialize()].concat();

        let encoded = data
            .iter()
            .copied()
            .bytes_to_fes()
            .with_checksum::<Bech32m>(&self.hrp())
            .with_witness_version(Fe32::Q)
            .chars()
            .collect::<String>();

        f.write_str(&encoded)
    }
}

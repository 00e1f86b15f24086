//! Optional secondary source of spend state, queried by Electrum style script hash.

use async_trait::async_trait;
use bitcoin::{
    hashes::{sha256, Hash},
    key::TweakedPublicKey,
    ScriptBuf, XOnlyPublicKey,
};

/// Errors from a spend-state oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Transport or protocol failure
    #[error("Oracle request failed. {0}")]
    Request(String),
    /// The request did not finish within its timeout
    #[error("Oracle request timed out")]
    Timeout,
}

/// Balance locked to one script, in satoshis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScriptBalance {
    /// Confirmed balance
    pub confirmed: i64,
    /// Mempool delta; negative when a spend is pending
    pub unconfirmed: i64,
}

impl ScriptBalance {
    /// Nothing left on the script.
    pub fn is_empty(&self) -> bool {
        self.confirmed == 0 && self.unconfirmed == 0
    }
}

/// Answers balance queries for scripts, eg. an Electrum server.
#[async_trait]
pub trait SpendStateOracle: Send + Sync {
    /// Balance of the script with the given Electrum script hash
    async fn get_balance(&self, script_hash: &str) -> Result<ScriptBalance, OracleError>;
}

/// Electrum script hash of the P2TR script paying to `output_key`: the reversed SHA-256 of
/// `OP_1 OP_PUSHBYTES_32 <key>`, hex encoded.
pub fn script_hash(output_key: &XOnlyPublicKey) -> String {
    let script = ScriptBuf::new_p2tr_tweaked(TweakedPublicKey::dangerous_assume_tweaked(
        *output_key,
    ));
    let mut hash = sha256::Hash::hash(script.as_bytes()).to_byte_array();
    hash.reverse();
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_hash_reverses_sha256_of_p2tr_script() {
        let key = XOnlyPublicKey::from_slice(&[
            0x79, 0xbe, 0x66, 0x7e, 0xf9, 0xdc, 0xbb, 0xac, 0x55, 0xa0, 0x62, 0x95, 0xce, 0x87,
            0x0b, 0x07, 0x02, 0x9b, 0xfc, 0xdb, 0x2d, 0xce, 0x28, 0xd9, 0x59, 0xf2, 0x81, 0x5b,
            0x16, 0xf8, 0x17, 0x98,
        ])
        .unwrap();
        let mut script = vec![0x51, 0x20];
        script.extend_from_slice(&key.serialize());
        let mut expected = sha256::Hash::hash(&script).to_byte_array();
        expected.reverse();

        assert_eq!(script_hash(&key), hex::encode(expected));
        assert_eq!(script_hash(&key).len(), 64);
    }

    #[test]
    fn empty_balance() {
        assert!(ScriptBalance::default().is_empty());
        assert!(!ScriptBalance {
            confirmed: 0,
            unconfirmed: -1000
        }
        .is_empty());
    }
}

use bitcoin::{secp256k1, Txid};

use crate::client::IndexerError;

/// Errors scanning a single height.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// A request to the indexer failed
    #[error("Indexer error. {0}")]
    IndexerError(#[from] IndexerError),
    /// A served block filter could not be read
    #[error("Filter error. {0}")]
    FilterError(#[from] FilterError),
    /// A served tweak is not usable for key derivation
    #[error("Cryptography error. {0}")]
    CryptoError(#[from] secp256k1::Error),
    /// The new-output filter matched but no outputs of the transaction were served
    #[error("Candidate output matched in transaction {txid} but the indexer returned no outputs for it")]
    MisalignedOutputs {
        /// Transaction whose outputs are missing
        txid: Txid,
    },
}

/// Errors reading a BIP-158 filter.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// The filter bytes do not decode as a Golomb-coded set
    #[error("Malformed filter. {0}")]
    Decode(#[from] bitcoin::bip158::Error),
}

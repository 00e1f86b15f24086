//! Top level error module for the crate

use crate::{
    client::{oracle::OracleError, IndexerError},
    persist::PersistError,
    scan::error::ScanError,
};

/// Top level error enum encapsulating any error that may occur during sync
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Errors associated with scanning a single height
    #[error("Scan error at height {height}. {source}")]
    ScanError {
        /// Height whose processing failed
        height: u32,
        /// Underlying scan error
        #[source]
        source: ScanError,
    },
    /// Errors fetching the chain tip
    #[error("Indexer error. {0}")]
    IndexerError(#[from] IndexerError),
    /// Errors from the spend-state oracle
    #[error("Oracle error. {0}")]
    OracleError(#[from] OracleError),
    /// Errors writing wallet state
    #[error("Persistence error. {0}")]
    PersistError(#[from] PersistError),
    /// The pass was cancelled. Not a failure.
    #[error("Sync interrupted. Last scanned height {last_scan_height}")]
    Interrupted {
        /// Last height fully processed before the interruption
        last_scan_height: u32,
    },
    /// Rescans never start at genesis
    #[error("Rescan height must be at least 1")]
    InvalidRescanHeight,
    /// The scan loop has stopped and no longer accepts triggers
    #[error("Scan loop is not running")]
    LoopStopped,
}

impl SyncError {
    /// Cancellation, as opposed to a failure.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

//! Traits for interfacing the scan engine with durable storage

use crate::persist::PersistError;

/// Durable home of the serialized wallet.
///
/// Implementations receive the complete encoding from [`crate::wallet::Wallet::serialize`] and
/// may transform it, eg. encrypt it with a password derived key, before writing.
pub trait WalletStore: Send + Sync {
    /// Replaces the stored wallet. Must write all of `wallet` or nothing.
    fn save(&self, wallet: &[u8]) -> Result<(), PersistError>;

    /// Returns the stored wallet, `None` if nothing was saved yet.
    fn load(&self) -> Result<Option<Vec<u8>>, PersistError>;

    /// Returns true if a wallet was saved.
    fn exists(&self) -> Result<bool, PersistError> {
        Ok(self.load()?.is_some())
    }
}

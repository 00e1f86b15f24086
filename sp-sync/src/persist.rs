//! Wallet stores.

use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::traits::WalletStore;

/// Errors reading or writing stored wallet state.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Filesystem error
    #[error("IO error. {0}")]
    Io(#[from] io::Error),
    /// Wallet encoding error
    #[error("Serialization error. {0}")]
    Serialization(#[from] serde_json::Error),
    /// A store lock was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Stores the wallet in one file. Writes go to a sibling temp file which is synced and
/// then renamed over the wallet file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store for the wallet file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Wallet file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl WalletStore for FileStore {
    fn save(&self, wallet: &[u8]) -> Result<(), PersistError> {
        let _guard = self.write_lock.lock().map_err(|_| PersistError::Poisoned)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let temp_path = self.temp_path();
        let written = (|| -> io::Result<()> {
            let mut file = File::create(&temp_path)?;
            file.write_all(wallet)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        })();

        if let Err(e) = written {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to write wallet.");
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        tracing::debug!(path = %self.path.display(), bytes = wallet.len(), "Wallet saved.");
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, PersistError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self) -> Result<bool, PersistError> {
        Ok(self.path.exists())
    }
}

/// Keeps the last saved wallet in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Vec<u8>>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|saves| *saves).unwrap_or_default()
    }
}

impl WalletStore for MemoryStore {
    fn save(&self, wallet: &[u8]) -> Result<(), PersistError> {
        *self.saved.lock().map_err(|_| PersistError::Poisoned)? = Some(wallet.to_vec());
        *self.saves.lock().map_err(|_| PersistError::Poisoned)? += 1;
        Ok(())
    }

    fn load(&self) -> Result<Option<Vec<u8>>, PersistError> {
        Ok(self
            .saved
            .lock()
            .map_err(|_| PersistError::Poisoned)?
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested").join("wallet.json"));

        assert_eq!(store.load().unwrap(), None);
        assert!(!store.exists().unwrap());

        store.save(b"first").unwrap();
        store.save(b"second").unwrap();

        assert_eq!(store.load().unwrap(), Some(b"second".to_vec()));
        assert!(store.exists().unwrap());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let store = FileStore::new(&path);
        store.save(b"good").unwrap();

        // a directory where the temp file should go makes the write fail
        fs::create_dir(store.temp_path()).unwrap();
        assert!(store.save(b"bad").is_err());
        assert_eq!(fs::read(&path).unwrap(), b"good");
    }

    #[test]
    fn memory_store_counts_saves() {
        let store = MemoryStore::new();
        assert!(!store.exists().unwrap());
        store.save(b"a").unwrap();
        store.save(b"b").unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.load().unwrap(), Some(b"b".to_vec()));
    }
}

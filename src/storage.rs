//! Keyed non-volatile storage for the device's persistent records.
//!
//! Records are opaque byte blobs addressed by a short key, the way a flash
//! key/value namespace works on the board. [`FileStorage`] keeps one file per
//! key inside a directory; [`MemoryStorage`] backs tests and simulated
//! restarts.

use crate::error::{Result, SignerError};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub trait KeyStorage {
    /// Reads the record stored under `key`, if any.
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value` under `key`, replacing any previous record.
    fn set_raw(&mut self, key: &str, value: &[u8]) -> Result<()>;

    /// Stores `value` under `key` only if nothing is stored there yet.
    fn set_raw_once(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if self.get_raw(key)?.is_some() {
            return Err(SignerError::Storage(format!("record '{key}' already exists")));
        }
        self.set_raw(key, value)
    }

    /// Erases the record under `key`. Erasing a missing record is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;
}

/// Directory-backed storage.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Opens (creating if needed) the storage directory at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(SignerError::Storage(format!("invalid record key '{key}'")));
        }
        Ok(self.root.join(format!("{key}.bin")))
    }
}

impl KeyStorage for FileStorage {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn set_raw_once(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            return Err(SignerError::Storage(format!("record '{key}' already exists")));
        }

        // The record only appears once it is complete; the link fails if
        // another writer got there first.
        let staged = path.with_extension("new");
        let linked = write_synced(&staged, value).and_then(|()| fs::hard_link(&staged, &path));
        let _ = fs::remove_file(&staged);
        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(SignerError::Storage(format!("record '{key}' already exists")))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn write_synced(path: &Path, value: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(value)?;
    file.sync_all()
}

/// In-memory storage. Cloning it models a power cycle with the same flash.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: BTreeMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStorage for MemoryStorage {
    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.get(key).cloned())
    }

    fn set_raw(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.records.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.records.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn set_once_leaves_only_the_finished_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        // Left over from a write interrupted by power loss.
        fs::write(dir.path().join("solana_key.new"), b"{\"secr").unwrap();

        storage.set_raw_once("solana_key", b"record").unwrap();
        assert_eq!(files_in(dir.path()), vec!["solana_key.bin"]);
        assert_eq!(storage.get_raw("solana_key").unwrap().unwrap(), b"record");

        assert!(storage.set_raw_once("solana_key", b"other").is_err());
        assert_eq!(files_in(dir.path()), vec!["solana_key.bin"]);
        assert_eq!(storage.get_raw("solana_key").unwrap().unwrap(), b"record");
    }

    #[test]
    fn failed_write_leaves_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        // A directory where the staging file belongs makes the write fail.
        fs::create_dir(dir.path().join("solana_key.new")).unwrap();

        assert!(storage.set_raw_once("solana_key", b"record").is_err());
        assert!(storage.get_raw("solana_key").unwrap().is_none());
    }
}

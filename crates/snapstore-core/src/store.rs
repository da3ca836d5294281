//! Store facade — registry-checked key access and lifecycle operations.
//!
//! `SnapStore` is the public surface: point get/put ride a lock-protected
//! single-file fast path, while bulk operations (clear-by-class,
//! initialization, wipe) open a full Writer transaction and commit one new
//! snapshot. A single-file read may race a snapshot swap, but by
//! construction of the commit protocol it sees either the old or the new
//! complete file, never a torn one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crate::config::Config;
use crate::durability::{durable_sync, fsync_dir, remove_tree, set_mode, LIVE_LINK};
use crate::error::{SnapError, SnapResult};
use crate::lock::{FileLock, LOCK_FILE};
use crate::registry::{ClearClass, KeyRegistry};
use crate::txn::{ReadTxn, WriteTxn, TMP_PREFIX};

/// Crash-consistent, file-backed key-value store for small configuration
/// and state values.
///
/// Safe to share across threads and, through the on-disk lock, across
/// processes pointed at the same root.
pub struct SnapStore {
    root: PathBuf,
    registry: KeyRegistry,
    config: Config,
}

impl SnapStore {
    /// Open the store at `root` with default configuration.
    ///
    /// If the root has no live snapshot yet, an empty Writer transaction is
    /// committed first, creating the root directory, the lock file, and an
    /// initial empty snapshot.
    pub fn open<P: AsRef<Path>>(root: P, registry: KeyRegistry) -> SnapResult<Self> {
        Self::open_with_config(root, registry, Config::default())
    }

    /// Open the store with explicit configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        root: P,
        registry: KeyRegistry,
        config: Config,
    ) -> SnapResult<Self> {
        config.validate().map_err(|reason| SnapError::Io {
            path: None,
            kind: io::ErrorKind::InvalidInput,
            message: format!("Invalid configuration: {}", reason),
        })?;

        let store = Self {
            root: root.as_ref().to_path_buf(),
            registry,
            config,
        };

        if fs::symlink_metadata(store.data_path()).is_err() {
            store.initialize()?;
        }

        Ok(store)
    }

    /// Commit an empty writer to lay down the root, lock file, and first
    /// live snapshot.
    fn initialize(&self) -> SnapResult<()> {
        let txn = WriteTxn::open_with_config(&self.root, self.config.clone())?;
        txn.commit()
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The key registry this store validates against.
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    /// Path of the live data directory (`root/d`).
    fn data_path(&self) -> PathBuf {
        self.root.join(LIVE_LINK)
    }

    fn check_registered(&self, key: &str) -> SnapResult<()> {
        if self.registry.contains(key) {
            Ok(())
        } else {
            Err(SnapError::UnknownKey { key: key.to_string() })
        }
    }

    /// Current value bytes for a registered key.
    ///
    /// A key with no stored value reads as empty bytes. An explicitly
    /// stored empty value is indistinguishable from "never written";
    /// callers needing the distinction must encode it in the value.
    pub fn get(&self, key: &str) -> SnapResult<Vec<u8>> {
        self.check_registered(key)?;
        self.read_value(key)
    }

    /// As `get`, but re-reads on the configured poll interval until a
    /// non-empty value appears. Never times out on its own; bound the wait
    /// externally if needed.
    pub fn get_blocking(&self, key: &str) -> SnapResult<Vec<u8>> {
        self.check_registered(key)?;
        loop {
            let value = self.read_value(key)?;
            if !value.is_empty() {
                return Ok(value);
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Lock-free single-file read under the live snapshot path.
    fn read_value(&self, key: &str) -> SnapResult<Vec<u8>> {
        match fs::read(self.data_path().join(key)) {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(SnapError::Io {
                path: Some(self.data_path().join(key)),
                kind: e.kind(),
                message: format!("Failed to read key file: {}", e),
            }),
        }
    }

    /// Store a value for a registered key.
    ///
    /// Single-key fast path: under the process lock, the value is written
    /// to a temp file, synced, and renamed over the key file inside the
    /// live snapshot. No full transaction is materialized.
    pub fn put(&self, key: &str, value: &[u8]) -> SnapResult<()> {
        self.check_registered(key)?;

        let lock = FileLock::acquire(&self.root.join(LOCK_FILE), true)?;
        let result = self.write_value(key, value);
        lock.release();
        result
    }

    fn write_value(&self, key: &str, value: &[u8]) -> SnapResult<()> {
        // The temp file lives in the store root, not the live directory, so
        // a transaction load racing this put never materializes it as a key.
        let mut tmp = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| SnapError::Io {
                path: Some(self.root.clone()),
                kind: e.kind(),
                message: format!("Failed to create temp value file: {}", e),
            })?;

        tmp.write_all(value).map_err(|e| SnapError::Io {
            path: Some(tmp.path().to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to write temp value file: {}", e),
        })?;

        durable_sync(tmp.as_file()).map_err(|e| SnapError::Io {
            path: Some(tmp.path().to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to sync temp value file: {}", e),
        })?;

        let dest = self.data_path().join(key);
        tmp.persist(&dest).map_err(|e| SnapError::Io {
            path: Some(dest.clone()),
            kind: e.error.kind(),
            message: format!("Failed to publish value file: {}", e.error),
        })?;

        set_mode(&dest, self.config.file_mode).map_err(|e| SnapError::Io {
            path: Some(dest.clone()),
            kind: e.kind(),
            message: format!("Failed to set value file permissions: {}", e),
        })?;

        fsync_dir(&self.data_path()).map_err(|e| SnapError::Io {
            path: Some(self.data_path()),
            kind: e.kind(),
            message: format!("Failed to sync live snapshot directory: {}", e),
        })?;

        Ok(())
    }

    /// Remove a registered key's stored value entirely.
    ///
    /// Goes through a full Writer transaction so the resulting snapshot
    /// simply has no file for the key.
    pub fn remove(&self, key: &str) -> SnapResult<()> {
        self.check_registered(key)?;
        let mut txn = self.write_txn()?;
        txn.delete(key);
        txn.commit()
    }

    /// Bulk-clear every registered key tagged with `class`.
    ///
    /// One transaction, one commit: on failure the pre-clear snapshot stays
    /// live, never a partial mix.
    pub fn clear_on(&self, class: ClearClass) -> SnapResult<()> {
        let mut txn = self.write_txn()?;
        for key in self.registry.keys_cleared_by(class) {
            txn.delete(key);
        }
        txn.commit()
    }

    /// Destroy the entire store root and reinitialize it empty.
    pub fn wipe_all(&self) -> SnapResult<()> {
        remove_tree(&self.root).map_err(|e| SnapError::Io {
            path: Some(self.root.clone()),
            kind: e.kind(),
            message: format!("Failed to wipe store root: {}", e),
        })?;
        self.initialize()
    }

    /// Open a read-only transaction over this store.
    pub fn read_txn(&self) -> SnapResult<ReadTxn> {
        ReadTxn::open(&self.root)
    }

    /// Open a mutable transaction over this store.
    pub fn write_txn(&self) -> SnapResult<WriteTxn> {
        WriteTxn::open_with_config(&self.root, self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_registry() -> KeyRegistry {
        let mut registry = KeyRegistry::new();
        registry.register("device_id", &[]).unwrap();
        registry.register("session_token", &[ClearClass::ManagerStart]).unwrap();
        registry
            .register("link_state", &[ClearClass::PeripheralDisconnect])
            .unwrap();
        registry
    }

    fn test_store() -> (SnapStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SnapStore::open(dir.path().join("store"), test_registry()).unwrap();
        (store, dir)
    }

    #[test]
    fn test_open_initializes_layout() {
        let (store, _dir) = test_store();
        assert!(store.root().join(LOCK_FILE).exists());
        assert!(fs::read_link(store.root().join(LIVE_LINK)).is_ok());
    }

    #[test]
    fn test_put_get_roundtrip() {
        let (store, _dir) = test_store();
        store.put("device_id", b"cb38263377b873ee").unwrap();
        assert_eq!(store.get("device_id").unwrap(), b"cb38263377b873ee");
    }

    #[test]
    fn test_unset_key_reads_empty() {
        let (store, _dir) = test_store();
        assert_eq!(store.get("session_token").unwrap(), b"");
    }

    #[test]
    fn test_unknown_key_rejected() {
        let (store, _dir) = test_store();
        assert!(matches!(store.get("swag"), Err(SnapError::UnknownKey { .. })));
        assert!(matches!(
            store.put("swag", b"x"),
            Err(SnapError::UnknownKey { .. })
        ));
        assert!(matches!(
            store.remove("swag"),
            Err(SnapError::UnknownKey { .. })
        ));
    }

    #[test]
    fn test_remove_clears_value() {
        let (store, _dir) = test_store();
        store.put("device_id", b"gone soon").unwrap();
        store.remove("device_id").unwrap();
        assert_eq!(store.get("device_id").unwrap(), b"");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.poll_interval = std::time::Duration::from_millis(0);

        let result = SnapStore::open_with_config(dir.path().join("store"), test_registry(), config);
        assert!(result.is_err());
    }
}

//! Reader / Writer transactions over the live snapshot.
//!
//! A transaction materializes the complete key→value snapshot into memory.
//! Readers get a frozen view discarded on drop. Writers mutate the in-memory
//! mapping and publish it on commit as a brand-new snapshot directory,
//! swapped in behind the `d` symlink in one atomic rename.
//!
//! The load itself needs no special ordering: live snapshot files are never
//! mutated in place, so a load racing a concurrent swap reads either the old
//! or the new complete directory, never a mix.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use hashbrown::HashMap;

use crate::config::Config;
use crate::durability::{
    durable_sync, ensure_dir, fsync_dir, remove_tree, set_mode, swap_live, LIVE_LINK, TEMP_LINK,
};
use crate::error::{SnapError, SnapResult};
use crate::lock::{FileLock, LOCK_FILE};

/// Prefix for candidate snapshot directories and fast-path temp files.
pub const TMP_PREFIX: &str = ".tmp_";

/// Shared capability of Reader and Writer transactions.
pub trait Transaction {
    /// Names of all keys present in the materialized snapshot, sorted.
    fn keys(&self) -> Vec<String>;

    /// Value for `key`, or None if the snapshot has no entry for it.
    fn get(&self, key: &str) -> Option<&[u8]>;
}

/// Materialize the live snapshot directory into memory.
fn load_snapshot(root: &Path) -> SnapResult<HashMap<String, Vec<u8>>> {
    let data_dir = root.join(LIVE_LINK);
    let mut vals = HashMap::new();

    let entries = match fs::read_dir(&data_dir) {
        Ok(entries) => entries,
        // Uninitialized store: nothing to load.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vals),
        Err(e) => {
            return Err(SnapError::Io {
                path: Some(data_dir),
                kind: e.kind(),
                message: format!("Failed to read live snapshot: {}", e),
            });
        }
    };

    for entry in entries {
        let entry = entry.map_err(|e| SnapError::Io {
            path: Some(data_dir.clone()),
            kind: e.kind(),
            message: format!("Failed to read snapshot entry: {}", e),
        })?;

        let file_type = entry.file_type().map_err(|e| SnapError::Io {
            path: Some(entry.path()),
            kind: e.kind(),
            message: format!("Failed to stat snapshot entry: {}", e),
        })?;
        if !file_type.is_file() {
            continue;
        }

        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(name) => {
                eprintln!("[SnapStore] Skipping non-UTF-8 snapshot entry {:?}", name);
                continue;
            }
        };

        let value = fs::read(entry.path()).map_err(|e| SnapError::Io {
            path: Some(entry.path()),
            kind: e.kind(),
            message: format!("Failed to read key file: {}", e),
        })?;
        vals.insert(name, value);
    }

    Ok(vals)
}

/// Read-only transaction: a frozen snapshot discarded on drop.
pub struct ReadTxn {
    vals: HashMap<String, Vec<u8>>,
}

impl ReadTxn {
    /// Open a read-only transaction over the store at `root`.
    ///
    /// The process lock is taken for the load and released before this
    /// returns. A store whose lock file does not exist has never been
    /// written; it yields an empty mapping rather than an error.
    pub fn open(root: &Path) -> SnapResult<Self> {
        let lock = match FileLock::acquire(&root.join(LOCK_FILE), false) {
            Ok(lock) => lock,
            Err(SnapError::NotInitialized { .. }) => {
                return Ok(Self { vals: HashMap::new() });
            }
            Err(e) => return Err(e),
        };

        let vals = load_snapshot(root);
        lock.release();
        Ok(Self { vals: vals? })
    }
}

impl Transaction for ReadTxn {
    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.vals.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    fn get(&self, key: &str) -> Option<&[u8]> {
        self.vals.get(key).map(|value| value.as_slice())
    }
}

/// Mutable transaction: holds the process lock for its whole life and
/// publishes its in-memory mapping as a brand-new snapshot on commit.
///
/// Dropping an uncommitted writer discards the staged changes and releases
/// the lock; nothing touches disk without `commit`.
pub struct WriteTxn {
    root: PathBuf,
    vals: HashMap<String, Vec<u8>>,
    config: Config,
    // Held until the transaction ends; released by drop on every exit path.
    _lock: FileLock,
}

impl WriteTxn {
    /// Open a writer over the store at `root` with default configuration.
    pub fn open(root: &Path) -> SnapResult<Self> {
        Self::open_with_config(root, Config::default())
    }

    /// Open a writer, creating the store root with broad permissions if it
    /// does not exist yet. The process lock is held from here until the
    /// transaction ends.
    pub fn open_with_config(root: &Path, config: Config) -> SnapResult<Self> {
        ensure_dir(root, config.dir_mode).map_err(|e| SnapError::Io {
            path: Some(root.to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to create store root: {}", e),
        })?;

        let lock = FileLock::acquire(&root.join(LOCK_FILE), true)?;
        let vals = load_snapshot(root)?;

        Ok(Self {
            root: root.to_path_buf(),
            vals,
            config,
            _lock: lock,
        })
    }

    /// Stage a value in the in-memory mapping; persisted only on commit.
    pub fn put(&mut self, key: &str, value: &[u8]) {
        self.vals.insert(key.to_string(), value.to_vec());
    }

    /// Stage removal of a key; no-op if the snapshot has no entry for it.
    pub fn delete(&mut self, key: &str) {
        self.vals.remove(key);
    }

    /// Publish the in-memory mapping as the new live snapshot.
    ///
    /// COMMIT ORDERING — every step happens in this exact order:
    ///
    /// 1. create a unique candidate directory inside the store root
    /// 2. write one file per entry; set broad permissions and durable_sync
    ///    each file as it is written
    /// 3. fsync the candidate's directory entry
    /// 4. resolve the current target of `d` (may be none, if uninitialized)
    /// 5. rename a staged symlink over `d` — the atomic publish point
    /// 6. fsync the store root
    /// 7. verify `d` resolves to the candidate; only then is the commit
    ///    successful and the superseded snapshot garbage
    /// 8. on success remove the old snapshot, on failure remove the
    ///    candidate — the previous live snapshot is untouched either way
    /// 9. remove a leftover staged symlink and release the lock regardless
    ///    of outcome
    ///
    /// A crash before step 5 leaves the old snapshot live with stray
    /// garbage; a crash after it leaves the new snapshot live with an
    /// uncollected orphan. Neither is ever a mix of the two.
    pub fn commit(self) -> SnapResult<()> {
        // Step 1: unique candidate directory, kept past its guard.
        let candidate = tempfile::Builder::new()
            .prefix(TMP_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|e| SnapError::Io {
                path: Some(self.root.clone()),
                kind: e.kind(),
                message: format!("Failed to create candidate snapshot: {}", e),
            })?
            .keep();

        // Steps 2-6. Any failure here leaves `d` pointing at the previous
        // snapshot; the candidate becomes garbage collected below.
        let outcome = self.populate_and_swap(&candidate);

        // Step 7: the post-condition decides which directory is garbage.
        let live = self.root.join(LIVE_LINK);
        let swapped = match (fs::read_link(&live), candidate.file_name()) {
            (Ok(target), Some(name)) => target.as_os_str() == name && candidate.is_dir(),
            _ => false,
        };

        // Step 8: garbage-collect exactly one side. Removal failures are
        // hygiene, not correctness; the live pointer is already settled.
        if swapped {
            if let Ok(Some(previous)) = &outcome {
                let old_dir = self.root.join(previous);
                if old_dir != candidate {
                    if let Err(e) = remove_tree(&old_dir) {
                        eprintln!(
                            "[SnapStore] Failed to remove superseded snapshot {}: {}",
                            old_dir.display(),
                            e
                        );
                    }
                }
            }
        } else if let Err(e) = remove_tree(&candidate) {
            eprintln!(
                "[SnapStore] Failed to remove candidate snapshot {}: {}",
                candidate.display(),
                e
            );
        }

        // Step 9: a staged symlink that never got renamed is removed no
        // matter how the commit went. The lock itself releases when `self`
        // drops at the end of this scope.
        let staged = candidate.join(TEMP_LINK);
        if fs::symlink_metadata(&staged).is_ok() {
            let _ = fs::remove_file(&staged);
        }

        match (outcome, swapped) {
            (Ok(_), true) => Ok(()),
            (Err(e), _) => Err(e),
            (Ok(_), false) => Err(SnapError::SwapVerifyFailed {
                root: self.root.clone(),
                candidate: candidate
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default(),
            }),
        }
    }

    /// Steps 2-6 of the commit protocol. Returns the previous live target
    /// for garbage collection.
    fn populate_and_swap(&self, candidate: &Path) -> SnapResult<Option<PathBuf>> {
        set_mode(candidate, self.config.dir_mode).map_err(|e| SnapError::Io {
            path: Some(candidate.to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to set candidate permissions: {}", e),
        })?;

        for (key, value) in &self.vals {
            let file_path = candidate.join(key);
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(self.config.file_mode)
                .open(&file_path)
                .map_err(|e| SnapError::Io {
                    path: Some(file_path.clone()),
                    kind: e.kind(),
                    message: format!("Failed to create key file: {}", e),
                })?;

            file.write_all(value).map_err(|e| SnapError::Io {
                path: Some(file_path.clone()),
                kind: e.kind(),
                message: format!("Failed to write key file: {}", e),
            })?;

            // Creation modes are masked by the umask; force the exact bits.
            set_mode(&file_path, self.config.file_mode).map_err(|e| SnapError::Io {
                path: Some(file_path.clone()),
                kind: e.kind(),
                message: format!("Failed to set key file permissions: {}", e),
            })?;

            durable_sync(&file).map_err(|e| SnapError::Io {
                path: Some(file_path.clone()),
                kind: e.kind(),
                message: format!("Failed to sync key file: {}", e),
            })?;
        }

        fsync_dir(candidate).map_err(|e| SnapError::Io {
            path: Some(candidate.to_path_buf()),
            kind: e.kind(),
            message: format!("Failed to sync candidate snapshot: {}", e),
        })?;

        let candidate_name = candidate
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SnapError::Io {
                path: Some(candidate.to_path_buf()),
                kind: io::ErrorKind::InvalidInput,
                message: "Candidate snapshot name is not valid UTF-8".to_string(),
            })?;

        swap_live(&self.root, candidate_name)
    }
}

impl Transaction for WriteTxn {
    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.vals.keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    fn get(&self, key: &str) -> Option<&[u8]> {
        self.vals.get(key).map(|value| value.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot_dirs(root: &Path) -> Vec<PathBuf> {
        fs::read_dir(root)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map_or(false, |t| t.is_dir()))
            .map(|e| e.path())
            .collect()
    }

    #[test]
    fn test_reader_on_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let txn = ReadTxn::open(&root).unwrap();
        assert!(txn.keys().is_empty());
        assert_eq!(txn.get("anything"), None);
        // Read-only open must not create storage.
        assert!(!root.exists());
    }

    #[test]
    fn test_writer_commit_then_reader() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("alpha", b"1");
        txn.put("beta", b"2");
        assert_eq!(txn.get("alpha"), Some(&b"1"[..]));
        txn.commit().unwrap();

        let txn = ReadTxn::open(&root).unwrap();
        assert_eq!(txn.get("alpha"), Some(&b"1"[..]));
        assert_eq!(txn.get("beta"), Some(&b"2"[..]));
        assert_eq!(txn.keys(), vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[test]
    fn test_commit_creates_live_link() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        WriteTxn::open(&root).unwrap().commit().unwrap();

        let target = fs::read_link(root.join(LIVE_LINK)).unwrap();
        assert!(target.to_str().unwrap().starts_with(TMP_PREFIX));
        assert!(root.join(&target).is_dir());
        assert!(root.join(LOCK_FILE).exists());
    }

    #[test]
    fn test_delete_takes_effect_on_commit() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("keep", b"yes");
        txn.put("drop", b"no");
        txn.commit().unwrap();

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.delete("drop");
        txn.delete("never_existed");
        txn.commit().unwrap();

        let txn = ReadTxn::open(&root).unwrap();
        assert_eq!(txn.keys(), vec!["keep".to_string()]);
    }

    #[test]
    fn test_drop_without_commit_discards_changes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("stable", b"v1");
        txn.commit().unwrap();

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("stable", b"v2");
        txn.put("extra", b"x");
        drop(txn);

        let txn = ReadTxn::open(&root).unwrap();
        assert_eq!(txn.get("stable"), Some(&b"v1"[..]));
        assert_eq!(txn.get("extra"), None);
    }

    #[test]
    fn test_recommit_leaves_single_snapshot() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        for round in 0..4 {
            let mut txn = WriteTxn::open(&root).unwrap();
            txn.put("round", format!("{}", round).as_bytes());
            txn.commit().unwrap();
        }

        assert_eq!(snapshot_dirs(&root).len(), 1);
        let txn = ReadTxn::open(&root).unwrap();
        assert_eq!(txn.get("round"), Some(&b"3"[..]));
    }

    #[test]
    fn test_commit_removes_staged_link() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("k", b"v");
        txn.commit().unwrap();

        let live = fs::read_link(root.join(LIVE_LINK)).unwrap();
        let staged = root.join(live).join(TEMP_LINK);
        assert!(fs::symlink_metadata(staged).is_err());
    }

    #[test]
    fn test_stray_candidate_is_not_loaded() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("real", b"value");
        txn.commit().unwrap();

        // Crash remnant: a populated candidate that never got linked.
        let stray = root.join(".tmp_crashed");
        fs::create_dir(&stray).unwrap();
        fs::write(stray.join("real"), b"poison").unwrap();
        fs::write(stray.join("ghost"), b"boo").unwrap();

        let txn = ReadTxn::open(&root).unwrap();
        assert_eq!(txn.get("real"), Some(&b"value"[..]));
        assert_eq!(txn.get("ghost"), None);
    }

    #[test]
    fn test_values_are_byte_exact() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");

        let raw: &[u8] = &[0xe1, 0x90, 0xff, 0x00, 0x0a];
        let mut txn = WriteTxn::open(&root).unwrap();
        txn.put("binary", raw);
        txn.put("empty", b"");
        txn.commit().unwrap();

        let txn = ReadTxn::open(&root).unwrap();
        assert_eq!(txn.get("binary"), Some(raw));
        assert_eq!(txn.get("empty"), Some(&b""[..]));
    }
}

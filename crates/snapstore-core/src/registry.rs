//! Fixed key registry with per-key lifecycle clear-classes.
//!
//! Which keys exist and which events clear them is product configuration;
//! the engine only enforces that every get/put names a registered key and
//! that key names are safe to use as flat file names inside a snapshot
//! directory.

use hashbrown::HashMap;

use crate::error::{SnapError, SnapResult};

/// Lifecycle events that bulk-erase every key tagged with them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClearClass {
    /// Erased when the supervising manager process starts
    ManagerStart,
    /// Erased when the peripheral link drops
    PeripheralDisconnect,
}

/// Fixed mapping from key name to the clear-classes that erase it.
///
/// A key absent from the registry is invalid for every store operation.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: HashMap<String, Vec<ClearClass>>,
}

impl KeyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { keys: HashMap::new() }
    }

    /// Register a key with its clear-classes.
    ///
    /// Re-registering an existing key replaces its class set. Key names are
    /// validated here so no later operation can escape the snapshot
    /// directory or collide with the store's own marker files.
    pub fn register(&mut self, key: &str, classes: &[ClearClass]) -> SnapResult<()> {
        validate_key_name(key)?;
        self.keys.insert(key.to_string(), classes.to_vec());
        Ok(())
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    /// Clear-classes of a registered key; None if unregistered.
    pub fn classes(&self, key: &str) -> Option<&[ClearClass]> {
        self.keys.get(key).map(|classes| classes.as_slice())
    }

    /// All registered keys tagged with `class`, sorted by name.
    pub fn keys_cleared_by(&self, class: ClearClass) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .keys
            .iter()
            .filter(|(_, classes)| classes.contains(&class))
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    /// All registered key names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.keys.keys().map(|key| key.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the registry has no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Validate that a key name is usable as a flat file name.
///
/// Key files live directly inside the snapshot directory, next to the
/// transient `.link` symlink, so names must be single path segments and
/// must not start with `.`.
fn validate_key_name(key: &str) -> SnapResult<()> {
    if key.is_empty() {
        return Err(SnapError::InvalidKey {
            key: key.to_string(),
            reason: "key name must not be empty".into(),
        });
    }
    if key.contains('/') {
        return Err(SnapError::InvalidKey {
            key: key.to_string(),
            reason: "key name must not contain path separators".into(),
        });
    }
    if key.contains('\0') {
        return Err(SnapError::InvalidKey {
            key: key.to_string(),
            reason: "key name must not contain NUL bytes".into(),
        });
    }
    if key.starts_with('.') {
        return Err(SnapError::InvalidKey {
            key: key.to_string(),
            reason: "key name must not start with '.'".into(),
        });
    }
    Ok(())
}

//! SnapStore Core — Crash-Consistent File-Backed Parameter Store
//!
//! Persists small configuration/state values across process restarts and
//! power loss. Values are opaque byte strings, one file per key, inside a
//! snapshot directory published through the `d` symlink. Writers build a
//! complete new snapshot and swap the symlink in a single atomic rename, so
//! a reader sees either the old or the new snapshot, never a mix — and a
//! crash at any point leaves one of the two complete snapshots on disk.
//!
//! # Architecture
//!
//! - **Fast path**: single-key get/put against the live snapshot under the
//!   process lock (no full materialization)
//! - **Transactions**: the whole snapshot in RAM; Readers are frozen views,
//!   Writers commit copy-on-write
//! - **Durability**: per-file durable sync, directory-entry fsync, then the
//!   symlink rename as the one atomic publish point
//!
//! Writers fully serialize through an exclusive advisory file lock; the
//! store coordinates across OS processes, not just threads.

#[cfg(not(unix))]
compile_error!("snapstore-core relies on POSIX symlinks and advisory file locks");

pub mod config;
pub mod durability;
pub mod error;
pub mod lock;
pub mod registry;
pub mod store;
pub mod txn;

// Re-export key types for convenience
pub use config::Config;
pub use error::{SnapError, SnapResult};
pub use lock::FileLock;
pub use registry::{ClearClass, KeyRegistry};
pub use store::SnapStore;
pub use txn::{ReadTxn, Transaction, WriteTxn};

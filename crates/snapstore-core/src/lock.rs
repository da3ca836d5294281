//! Exclusive advisory process lock over the store root.
//!
//! Every transaction and fast-path write serializes through one blocking
//! `flock` on the store's `.lock` marker file. The lock is advisory and
//! always exclusive: a reader must never observe a writer's in-progress
//! candidate construction, so there is no shared mode. It is also not
//! reentrant; a holder re-acquiring from the same process deadlocks itself.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{SnapError, SnapResult};

/// Name of the lock marker file inside the store root.
pub const LOCK_FILE: &str = ".lock";

/// Guard holding a blocking, process-exclusive advisory lock.
///
/// Dropping the guard releases the lock on every exit path, including
/// panics and early returns mid-commit.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Open the lock file and take a blocking exclusive lock on it.
    ///
    /// With `create == false`, a missing lock file means no writer has ever
    /// initialized this store; that surfaces as `NotInitialized` so
    /// read-only callers never create storage implicitly.
    pub fn acquire(path: &Path, create: bool) -> SnapResult<Self> {
        let opened = if create {
            OpenOptions::new()
                .write(true)
                .create(true)
                .mode(0o644)
                .open(path)
        } else {
            OpenOptions::new().read(true).open(path)
        };

        let file = match opened {
            Ok(file) => file,
            Err(e) if !create && e.kind() == io::ErrorKind::NotFound => {
                return Err(SnapError::NotInitialized { path: path.to_path_buf() });
            }
            Err(e) => {
                return Err(SnapError::Io {
                    path: Some(path.to_path_buf()),
                    kind: e.kind(),
                    message: format!("Failed to open lock file: {}", e),
                });
            }
        };

        let fd = file.as_raw_fd();
        loop {
            // SAFETY: flock is a POSIX system call on a file descriptor owned
            // by `file`, which stays open for the guard's whole lifetime.
            let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
            if result == 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(SnapError::Io {
                path: Some(path.to_path_buf()),
                kind: err.kind(),
                message: format!("Failed to lock {}: {}", path.display(), err),
            });
        }

        Ok(Self { file, path: path.to_path_buf() })
    }

    /// Explicitly release the lock; equivalent to dropping the guard.
    pub fn release(self) {}

    /// Path of the lock marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor would drop the lock anyway; unlocking
        // explicitly keeps the release immediate even if the descriptor has
        // been duplicated into a child process.
        // SAFETY: the descriptor is valid until `self.file` is closed after
        // this body runs.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

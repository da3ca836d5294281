//! Durability primitives: durable file sync, directory-entry fsync,
//! best-effort recursive removal, and the atomic live-snapshot swap.
//!
//! These primitives own no state. They never retry internally and never
//! leave the live-snapshot pointer ambiguous; callers decide whether a
//! failure means rollback, retry, or garbage left for later cleanup.

use std::fs::{self, File};
use std::io;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::error::{SnapError, SnapResult};

/// Name of the live-snapshot link inside the store root.
pub const LIVE_LINK: &str = "d";

/// Name of the transient symlink staged inside a candidate snapshot
/// while it is being swapped in.
pub const TEMP_LINK: &str = ".link";

/// Force a file's data down to persistent storage before returning.
///
/// Maps to the strongest data-sync primitive each platform offers:
/// fdatasync() on Linux, fcntl(F_FULLFSYNC) on macOS/iOS (plain fsync only
/// reaches the disk's volatile cache there), and sync_data() elsewhere.
pub fn durable_sync(file: &File) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fdatasync is a POSIX system call on a file descriptor
        // obtained from an open File reference.
        let result = unsafe { libc::fdatasync(fd) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        // Standard fsync() on macOS only flushes to the disk's volatile write
        // cache; F_FULLFSYNC is the only call that reaches physical media.
        use std::os::unix::io::AsRawFd;
        let fd = file.as_raw_fd();
        // SAFETY: fcntl with F_FULLFSYNC operates on a file descriptor
        // obtained from an open File reference.
        let result = unsafe { libc::fcntl(fd, libc::F_FULLFSYNC) };
        if result == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
    {
        file.sync_data()
    }
}

/// Fsync a directory's own entry so metadata changes (created, renamed, or
/// removed children) survive a crash, not just the children's contents.
///
/// Reports failure to the caller instead of panicking; a missing directory
/// is an error here, never a silent success.
pub fn fsync_dir(path: &Path) -> io::Result<()> {
    let dir = File::open(path)?;
    // Directory descriptors need a full fsync; there is no data/metadata
    // split for directory entries.
    dir.sync_all()
}

/// Depth-first removal of a directory tree.
///
/// A missing path is a no-op. Individual child failures do not stop the
/// walk; the first error is reported after the sweep so callers can log it,
/// but stray garbage is a hygiene problem, never a correctness one.
pub fn remove_tree(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !meta.is_dir() {
        // Files and symlinks are removed directly (never followed).
        return match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        };
    }

    let mut first_err: Option<io::Error> = None;
    match fs::read_dir(path) {
        Ok(entries) => {
            for entry in entries {
                match entry {
                    Ok(entry) => {
                        if let Err(e) = remove_tree(&entry.path()) {
                            first_err.get_or_insert(e);
                        }
                    }
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }
        Err(e) => {
            first_err.get_or_insert(e);
        }
    }

    if let Err(e) = fs::remove_dir(path) {
        if e.kind() != io::ErrorKind::NotFound {
            first_err.get_or_insert(e);
        }
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Atomically repoint `root/d` at a fully-populated candidate snapshot.
///
/// The candidate must already be populated and synced. The swap:
/// 1. readlink the previous target of `root/d` (None if uninitialized)
/// 2. stage a symlink at `<candidate>/.link` whose target is the candidate's
///    bare directory name, so the link stays valid if the root is relocated
/// 3. rename the staged symlink over `root/d` (atomic replace on POSIX)
/// 4. fsync the root directory entry so the rename survives a crash
///
/// Returns the previous target's name for garbage collection. On failure the
/// previous live snapshot is still reachable through `root/d`; the staged
/// symlink, if created, is left inside the candidate for the caller's
/// cleanup pass.
pub fn swap_live(root: &Path, candidate_name: &str) -> SnapResult<Option<PathBuf>> {
    let live = root.join(LIVE_LINK);

    let previous = match fs::read_link(&live) {
        Ok(target) => Some(target),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(SnapError::Io {
                path: Some(live),
                kind: e.kind(),
                message: format!("Failed to resolve previous live snapshot: {}", e),
            });
        }
    };

    let staged = root.join(candidate_name).join(TEMP_LINK);
    symlink(candidate_name, &staged).map_err(|e| SnapError::Io {
        path: Some(staged.clone()),
        kind: e.kind(),
        message: format!("Failed to stage snapshot link: {}", e),
    })?;

    fs::rename(&staged, &live).map_err(|e| SnapError::Io {
        path: Some(live.clone()),
        kind: e.kind(),
        message: format!("Failed to swap live snapshot link: {}", e),
    })?;

    fsync_dir(root).map_err(|e| SnapError::Io {
        path: Some(root.to_path_buf()),
        kind: e.kind(),
        message: format!("Failed to sync store root after swap: {}", e),
    })?;

    Ok(previous)
}

/// Create `path` if absent and force `mode` onto it regardless of the
/// process umask.
pub(crate) fn ensure_dir(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !path.is_dir() {
        fs::create_dir_all(path)?;
    }
    // create_dir_all modes are masked by the umask; setting permissions
    // afterwards applies the exact bits.
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Force exact permission bits onto an existing path.
pub(crate) fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

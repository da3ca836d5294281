//! Error types for SnapStore operations
//!
//! All store errors are represented by the SnapError enum, which carries
//! enough path/kind context to tell a rejected key apart from a failed
//! syscall without string-matching.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

/// SnapStore error types with detailed context
#[derive(Debug, Clone)]
pub enum SnapError {
    /// Requested key is not present in the key registry
    UnknownKey {
        /// The key the caller asked for
        key: String,
    },

    /// Key name rejected at registration time
    InvalidKey {
        /// The offending key name
        key: String,
        /// Why the name was rejected
        reason: String,
    },

    /// Read-only access to a store no writer has initialized yet
    NotInitialized {
        /// Path of the missing lock file
        path: PathBuf,
    },

    /// I/O operation failed
    Io {
        /// The file path where the error occurred
        path: Option<PathBuf>,
        /// The underlying I/O error kind
        kind: std::io::ErrorKind,
        /// Human-readable description
        message: String,
    },

    /// Commit post-condition failed: the live link does not resolve to the
    /// candidate snapshot that was just swapped in
    SwapVerifyFailed {
        /// Store root directory
        root: PathBuf,
        /// Name of the candidate snapshot directory
        candidate: String,
    },
}

impl fmt::Display for SnapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapError::UnknownKey { key } => {
                write!(f, "Unknown key {:?}: not present in the key registry", key)
            }

            SnapError::InvalidKey { key, reason } => {
                write!(f, "Invalid key name {:?}: {}", key, reason)
            }

            SnapError::NotInitialized { path } => {
                write!(f, "Store not initialized: lock file {} does not exist", path.display())
            }

            SnapError::Io { path, kind, message } => {
                if let Some(path) = path {
                    write!(f, "I/O error in {}: {} ({})", path.display(), message, kind)
                } else {
                    write!(f, "I/O error: {} ({})", message, kind)
                }
            }

            SnapError::SwapVerifyFailed { root, candidate } => {
                write!(f, "Snapshot swap in {} did not take: live link does not resolve to {}",
                       root.display(), candidate)
            }
        }
    }
}

impl Error for SnapError {}

/// Convert std::io::Error to SnapError::Io
impl From<std::io::Error> for SnapError {
    fn from(err: std::io::Error) -> Self {
        SnapError::Io {
            path: None,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for SnapStore operations
pub type SnapResult<T> = Result<T, SnapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_key_display() {
        let err = SnapError::UnknownKey { key: "DongleSerial".to_string() };
        let display = format!("{}", err);
        assert!(display.contains("DongleSerial"));
        assert!(display.contains("registry"));
    }

    #[test]
    fn test_io_display_includes_path() {
        let err = SnapError::Io {
            path: Some(PathBuf::from("/tmp/store/d")),
            kind: std::io::ErrorKind::PermissionDenied,
            message: "rename failed".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("/tmp/store/d"));
        assert!(display.contains("rename failed"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let snap_err: SnapError = io_err.into();

        match snap_err {
            SnapError::Io { kind, .. } => assert_eq!(kind, std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_swap_verify_display() {
        let err = SnapError::SwapVerifyFailed {
            root: PathBuf::from("/data/params"),
            candidate: ".tmp_ab12cd".to_string(),
        };
        let display = format!("{}", err);
        assert!(display.contains("/data/params"));
        assert!(display.contains(".tmp_ab12cd"));
    }
}

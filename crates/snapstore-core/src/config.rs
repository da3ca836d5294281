//! Configuration for a SnapStore instance
//!
//! The defaults match the store's deployment profile: key files readable and
//! writable by every local process, and a short poll cadence for blocking
//! reads.

use std::time::Duration;

/// Tunables applied to every transaction and fast-path operation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Re-read cadence for blocking gets waiting on a non-empty value
    pub poll_interval: Duration,
    /// Permission bits forced onto the store root and snapshot directories
    pub dir_mode: u32,
    /// Permission bits forced onto key files
    pub file_mode: u32,
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.as_millis() == 0 {
            return Err("poll_interval must be > 0".into());
        }
        if self.poll_interval > Duration::from_secs(10) {
            return Err("poll_interval must be <= 10s".into());
        }
        if self.dir_mode == 0 || self.dir_mode > 0o777 {
            return Err("dir_mode must be in (0, 0o777]".into());
        }
        if self.file_mode == 0 || self.file_mode > 0o777 {
            return Err("file_mode must be in (0, 0o777]".into());
        }
        // Other processes must be able to read snapshots and take the lock.
        if self.file_mode & 0o444 != 0o444 {
            return Err("file_mode must keep key files world-readable".into());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            dir_mode: 0o777,
            file_mode: 0o666,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_poll_rejected() {
        let mut config = Config::default();
        config.poll_interval = Duration::from_millis(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_modes_rejected() {
        let mut config = Config::default();
        config.dir_mode = 0o1777;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.file_mode = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unreadable_file_mode_rejected() {
        let mut config = Config::default();
        config.file_mode = 0o600;
        assert!(config.validate().is_err());
    }
}

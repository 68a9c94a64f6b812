/// Bridge configuration, loaded from a JSON file or built from defaults
use crate::config::types::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternate config file
pub const CONFIG_ENV: &str = "MBOXLOCK_CONFIG";

/// Traditional mail spool directory
pub const DEFAULT_SPOOL_DIR: &str = "/var/mail";

/// Top-level configuration owned by a [`crate::bridge::LockBridge`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Subtracted from every descriptor before it reaches fcntl
    pub descriptor_offset: RawFd,
    /// Report access times with millisecond precision instead of whole seconds
    pub precise_access_time: bool,
    pub mail: MailLockConfig,
}

/// Mailbox dotlock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailLockConfig {
    pub spool_dir: PathBuf,
    /// Use `$MAIL.lock` when the basename of `$MAIL` is the user being locked
    pub honor_mail_env: bool,
    /// Sleep grows by this much after every failed attempt
    pub retry_step_ms: u64,
    pub retry_max_ms: u64,
    /// A lock file not touched for this long is broken
    pub stale_after_secs: u64,
    /// Also treat a lock as stale when the PID it records is gone
    pub check_owner_pid: bool,
    /// Period of the background touch while a spool lock is held
    pub refresh_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            descriptor_offset: 0,
            precise_access_time: false,
            mail: MailLockConfig::default(),
        }
    }
}

impl Default for MailLockConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from(DEFAULT_SPOOL_DIR),
            honor_mail_env: true,
            retry_step_ms: 5_000,
            retry_max_ms: 60_000,
            stale_after_secs: 300,
            check_owner_pid: true,
            refresh_interval_secs: 60,
        }
    }
}

impl MailLockConfig {
    /// Config rooted at `spool_dir`, otherwise default
    pub fn with_spool_dir<P: Into<PathBuf>>(spool_dir: P) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            ..Self::default()
        }
    }

    pub fn retry_step(&self) -> Duration {
        Duration::from_millis(self.retry_step_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Reject settings that would make locks unusable
    pub fn validate(&self) -> Result<()> {
        if !self.spool_dir.is_absolute() {
            return Err(BridgeError::Config(format!(
                "spool_dir must be absolute, got {}",
                self.spool_dir.display()
            )));
        }
        if self.stale_after_secs == 0 {
            return Err(BridgeError::Config(
                "stale_after_secs must be greater than zero".to_string(),
            ));
        }
        if self.refresh_interval_secs == 0 {
            return Err(BridgeError::Config(
                "refresh_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.refresh_interval_secs >= self.stale_after_secs {
            return Err(BridgeError::Config(format!(
                "refresh_interval_secs ({}) must be shorter than stale_after_secs ({})",
                self.refresh_interval_secs, self.stale_after_secs
            )));
        }
        if self.retry_max_ms < self.retry_step_ms {
            return Err(BridgeError::Config(format!(
                "retry_max_ms ({}) is below retry_step_ms ({})",
                self.retry_max_ms, self.retry_step_ms
            )));
        }
        Ok(())
    }
}

impl BridgeConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config_content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: BridgeConfig = serde_json::from_str(&config_content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from `$MBOXLOCK_CONFIG` when set, else use defaults
    pub fn load_default() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_from_file(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.descriptor_offset < 0 {
            return Err(BridgeError::Config(format!(
                "descriptor_offset must not be negative, got {}",
                self.descriptor_offset
            )));
        }
        self.mail.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.descriptor_offset, 0);
        assert!(!config.precise_access_time);
        assert_eq!(config.mail.spool_dir, PathBuf::from("/var/mail"));
        assert_eq!(config.mail.stale_after(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "descriptor_offset": 1, "mail": {{ "spool_dir": "/tmp/spool", "retry_step_ms": 10, "retry_max_ms": 20 }} }}"#
        )
        .unwrap();

        let config = BridgeConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.descriptor_offset, 1);
        assert_eq!(config.mail.spool_dir, PathBuf::from("/tmp/spool"));
        assert_eq!(config.mail.retry_step(), Duration::from_millis(10));
        assert_eq!(config.mail.refresh_interval_secs, 60);
        assert!(config.mail.honor_mail_env);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = BridgeConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = BridgeConfig::load_from_file("/nonexistent/mboxlock.json").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut mail = MailLockConfig::with_spool_dir("relative/spool");
        assert!(mail.validate().is_err());

        mail = MailLockConfig::default();
        mail.refresh_interval_secs = mail.stale_after_secs;
        assert!(mail.validate().is_err());

        mail = MailLockConfig::default();
        mail.stale_after_secs = 0;
        assert!(mail.validate().is_err());

        mail = MailLockConfig::default();
        mail.retry_max_ms = 1;
        assert!(mail.validate().is_err());

        let config = BridgeConfig {
            descriptor_offset: -1,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

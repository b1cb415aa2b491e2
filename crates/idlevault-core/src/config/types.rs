use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use idlevault_storage::StorageConfig;

use super::defaults::*;
use super::util::expand_tilde;
use crate::error::{IdlevaultError, Result};

/// Top-level agent configuration, one per config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdlevaultConfig {
    /// Identifies this installation; first segment of every remote key.
    pub client_id: String,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub encryption: EncryptionConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IdlevaultConfig {
    pub fn validate(&self) -> Result<()> {
        let client = self.client_id.trim();
        if client.is_empty() {
            return Err(IdlevaultError::Config("client_id must not be empty".into()));
        }
        if client.contains('/') || client.contains('\\') {
            return Err(IdlevaultError::Config(format!(
                "client_id '{client}' must not contain path separators"
            )));
        }
        if self.host.process_prefix.trim().is_empty() {
            return Err(IdlevaultError::Config(
                "host.process_prefix must not be empty".into(),
            ));
        }
        self.watch.validate()?;
        if self.encryption.iterations == 0 {
            return Err(IdlevaultError::Config(
                "encryption.iterations must be greater than zero".into(),
            ));
        }
        if !(1..=22).contains(&self.pipeline.zstd_level) {
            return Err(IdlevaultError::Config(format!(
                "pipeline.zstd_level must be between 1 and 22, got {}",
                self.pipeline.zstd_level
            )));
        }
        self.logging.validate()?;
        self.storage.validate()
    }
}

/// Where the host application lives and what it is called.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Case-insensitive prefix of the host application's process name.
    #[serde(default = "default_process_prefix")]
    pub process_prefix: String,
    /// Installation directory; searched for when unset.
    #[serde(default)]
    pub install_dir: Option<String>,
    #[serde(default = "default_ini_name")]
    pub ini_name: String,
    /// Explicit data root. Skips installation lookup and ini parsing.
    #[serde(default)]
    pub data_root: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            process_prefix: default_process_prefix(),
            install_dir: None,
            ini_name: default_ini_name(),
            data_root: None,
        }
    }
}

impl HostConfig {
    pub fn install_dir(&self) -> Option<PathBuf> {
        self.install_dir
            .as_deref()
            .map(|p| PathBuf::from(expand_tilde(p)))
    }

    pub fn data_root(&self) -> Option<PathBuf> {
        self.data_root.as_deref().map(|p| PathBuf::from(expand_tilde(p)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchConfig {
    /// Seconds without filesystem events before a change-triggered run.
    #[serde(default = "default_quiet_window_seconds")]
    pub quiet_window_seconds: u64,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Extra wait after a host-exit trigger before polling resumes.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            quiet_window_seconds: default_quiet_window_seconds(),
            poll_interval_seconds: default_poll_interval_seconds(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

impl WatchConfig {
    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.quiet_window_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    fn validate(&self) -> Result<()> {
        for (name, value, allow_zero) in [
            ("quiet_window_seconds", self.quiet_window_seconds, false),
            ("poll_interval_seconds", self.poll_interval_seconds, false),
            ("cooldown_seconds", self.cooldown_seconds, true),
        ] {
            if value == 0 && !allow_zero {
                return Err(IdlevaultError::Config(format!(
                    "watch.{name} must be greater than zero"
                )));
            }
            if value > MAX_WATCH_SECONDS {
                return Err(IdlevaultError::Config(format!(
                    "watch.{name} must be at most {MAX_WATCH_SECONDS} (one week), got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncryptionConfig {
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Shell command whose trimmed stdout is the passphrase.
    #[serde(default)]
    pub passcommand: Option<String>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        Self {
            passphrase: None,
            passcommand: None,
            iterations: default_iterations(),
        }
    }
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .field("passcommand", &self.passcommand)
            .field("iterations", &self.iterations)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Outbox for encrypted artifacts. Default: platform cache dir +
    /// `idlevault/outbox`.
    #[serde(default)]
    pub staging_dir: Option<String>,
    /// Keep artifacts locally after a successful upload.
    #[serde(default)]
    pub keep_uploaded: bool,
    /// Only back up subdirectories with all-digit names.
    #[serde(default = "default_numeric_only")]
    pub numeric_only: bool,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            staging_dir: None,
            keep_uploaded: false,
            numeric_only: default_numeric_only(),
            zstd_level: default_zstd_level(),
        }
    }
}

impl PipelineConfig {
    pub fn staging_dir(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => PathBuf::from(expand_tilde(dir)),
            None => default_staging_dir(),
        }
    }
}

/// Where the agent keeps its rotating log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default: platform data dir + `idlevault/logs`.
    #[serde(default)]
    pub dir: Option<String>,
    /// Rotate once the active file would grow past this size.
    #[serde(default = "default_log_max_file_mb")]
    pub max_file_mb: u64,
    /// Active file plus rotated ones kept on disk.
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_file_mb: default_log_max_file_mb(),
            max_files: default_log_max_files(),
        }
    }
}

impl LoggingConfig {
    pub fn dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => PathBuf::from(expand_tilde(dir)),
            None => default_log_dir(),
        }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_mb.saturating_mul(1024 * 1024)
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_LOG_FILE_MB).contains(&self.max_file_mb) {
            return Err(IdlevaultError::Config(format!(
                "logging.max_file_mb must be between 1 and {MAX_LOG_FILE_MB}, got {}",
                self.max_file_mb
            )));
        }
        if !(1..=MAX_LOG_FILES).contains(&self.max_files) {
            return Err(IdlevaultError::Config(format!(
                "logging.max_files must be between 1 and {MAX_LOG_FILES}, got {}",
                self.max_files
            )));
        }
        Ok(())
    }
}

//! Configuration management for the backup validator.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every section has defaults, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::executor::backoff::BackoffPolicy;
use crate::retention::RetentionPolicy;

/// Environment variable holding the alert webhook URL.
pub const ENV_WEBHOOK_URL: &str = "BACKUP_WEBHOOK_URL";
/// Environment variable holding the alert recipient address.
pub const ENV_ALERT_EMAIL: &str = "BACKUP_ALERT_EMAIL";
/// Environment variable holding the alert sender address.
pub const ENV_ALERT_FROM: &str = "BACKUP_ALERT_FROM";
/// Environment variable overriding the operation log path.
pub const ENV_LOG_FILE: &str = "BACKUP_LOG_FILE";

/// Upper bound for `retention.max_age_days` (about a century).
pub const MAX_AGE_DAYS_LIMIT: u64 = 36_500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retry: RetryConfig,
    pub retention: RetentionConfig,
    pub log: LogConfig,
    pub alert: AlertConfig,
    pub checksum: ChecksumConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Delay growth between attempts
    pub backoff: BackoffKind,

    /// Base delay between attempts in seconds
    pub delay_secs: u64,

    /// Upper bound for exponential delays in seconds
    pub max_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Artifacts kept per source
    pub keep: usize,

    /// Artifacts older than this are pruned (the newest is always kept)
    pub max_age_days: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// CSV operation log used for audits and restore lookups
    pub audit_log: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Webhook (Slack-compatible) endpoint
    pub webhook_url: Option<String>,

    /// Alert recipient address
    pub email_to: Option<String>,

    /// Sender address used in alert mails
    pub email_from: String,

    /// sendmail-compatible binary used for mail alerts
    pub sendmail_path: PathBuf,

    /// Per-transport timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    /// Read buffer size used when hashing, in bytes
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// zstd compression level (1-22)
    pub compression_level: i32,

    /// Where trial extractions happen (defaults to the destination directory)
    pub scratch_dir: Option<PathBuf>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Fixed,
            delay_secs: 5,
            max_delay_secs: 300,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep: 7,
            max_age_days: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            audit_log: PathBuf::from("./logs/backup_log.csv"),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            email_to: None,
            email_from: "backup-validator@localhost".to_string(),
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            timeout_secs: 10,
        }
    }
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: 3,
            scratch_dir: None,
        }
    }
}

impl RetryConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        let delay = Duration::from_secs(self.delay_secs);
        match self.backoff {
            BackoffKind::Fixed => BackoffPolicy::Fixed { delay },
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                base: delay,
                max: Duration::from_secs(self.max_delay_secs),
            },
        }
    }
}

impl RetentionConfig {
    /// An age too large for chrono to represent means no age limit.
    pub fn policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            keep: self.keep,
            max_age: self
                .max_age_days
                .and_then(|days| i64::try_from(days).ok())
                .and_then(chrono::Duration::try_days),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the file (or defaults), then `.env` and process environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_WEBHOOK_URL) {
            self.alert.webhook_url = Some(url);
        }
        if let Some(to) = get(ENV_ALERT_EMAIL) {
            self.alert.email_to = Some(to);
        }
        if let Some(from) = get(ENV_ALERT_FROM) {
            self.alert.email_from = from;
        }
        if let Some(path) = get(ENV_LOG_FILE) {
            self.log.audit_log = PathBuf::from(path);
        }
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.retention.keep == 0 {
            anyhow::bail!("retention.keep must be at least 1");
        }
        if let Some(days) = self.retention.max_age_days {
            if days > MAX_AGE_DAYS_LIMIT {
                anyhow::bail!(
                    "retention.max_age_days must be at most {}, got {}",
                    MAX_AGE_DAYS_LIMIT,
                    days
                );
            }
        }
        if self.checksum.chunk_size == 0 {
            anyhow::bail!("checksum.chunk_size must be at least 1");
        }
        if !(1..=22).contains(&self.archive.compression_level) {
            anyhow::bail!(
                "archive.compression_level must be between 1 and 22, got {}",
                self.archive.compression_level
            );
        }
        Ok(())
    }
}

//! Error types for the backup validator.
//!
//! Build and validation errors are recoverable (the retry controller turns them
//! into another attempt). Log write errors are fatal: an unaudited backup is
//! never reported as a success.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Build error: {0}")]
    Build(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Backup failed after {attempts} attempt(s): {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error("Log write error: {0}")]
    LogWrite(String),

    #[error("Alert error: {0}")]
    Alert(String),

    #[error("Task error: {0}")]
    Task(String),
}

/// Failures of the one-shot restore validation path.
#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Not a recognised backup artifact: {0}")]
    UnrecognizedArtifact(PathBuf),

    #[error("No successful backup recorded for artifact {0}")]
    NotRecorded(String),

    #[error("Restore target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RestoreError {
    /// Whether the artifact was readable but its content drifted.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, RestoreError::DigestMismatch { .. })
    }
}

/// An old artifact that could not be pruned. Recorded, never escalated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for RetentionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not remove {}: {}", self.path.display(), self.reason)
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

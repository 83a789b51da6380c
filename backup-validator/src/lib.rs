//! Backup Validator Library
//!
//! Builds a copy or zstd-compressed tar archive of a file or directory, proves
//! it matches the source by SHA-256, retries on failure, prunes old artifacts
//! and records every run in an append-only CSV log.

pub mod alert;
pub mod archive;
pub mod checksum;
pub mod config;
pub mod executor;
pub mod fs;
pub mod integrity;
pub mod oplog;
pub mod restore;
pub mod retention;
pub mod runner;
pub mod utils;

// Re-export commonly used types
pub use archive::CompressionMode;
pub use config::Config;
pub use executor::outcome::{exit_code, OperationOutcome, OutcomeStatus};
pub use runner::BackupRunner;
pub use utils::errors::{BackupError, RestoreError};
pub type Result<T> = std::result::Result<T, BackupError>;

//! Utility modules for the backup validator.

pub mod errors;
pub mod format;
pub mod logger;

pub use errors::{BackupError, RestoreError, RetentionWarning, Result};

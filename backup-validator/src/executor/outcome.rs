//! Attempt history and terminal outcomes.
//!
//! An `OperationOutcome` is produced exactly once per invocation and owns the
//! records of every attempt, including the failed ones whose artifacts were
//! discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::checksum::Digest;
use crate::retention::RetentionReport;

/// Process exit codes, one per outcome kind.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const FAILED_AFTER_RETRIES: i32 = 2;
    pub const IO_ERROR: i32 = 3;
    pub const RESTORE_MISMATCH: i32 = 4;
    pub const RESTORE_FAILED: i32 = 5;
    pub const LOG_WRITE: i32 = 6;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Backup,
    Restore,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Backup => "backup",
            Operation::Restore => "restore",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    FailedAfterRetries,
    IoError,
    RestoreMismatch,
    RestoreFailed,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Success => "SUCCESS",
            OutcomeStatus::FailedAfterRetries => "FAILED_AFTER_RETRIES",
            OutcomeStatus::IoError => "IO_ERROR",
            OutcomeStatus::RestoreMismatch => "RESTORE_MISMATCH",
            OutcomeStatus::RestoreFailed => "RESTORE_FAILED",
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            OutcomeStatus::Success => exit_code::SUCCESS,
            OutcomeStatus::FailedAfterRetries => exit_code::FAILED_AFTER_RETRIES,
            OutcomeStatus::IoError => exit_code::IO_ERROR,
            OutcomeStatus::RestoreMismatch => exit_code::RESTORE_MISMATCH,
            OutcomeStatus::RestoreFailed => exit_code::RESTORE_FAILED,
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build + validate cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_digest: Option<Digest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<Digest>,
    pub matched: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl AttemptRecord {
    /// The build step failed; nothing was validated.
    pub fn build_failed(attempt: u32, duration: Duration, error: String) -> Self {
        Self {
            attempt,
            source_digest: None,
            artifact_digest: None,
            matched: false,
            duration_ms: duration.as_millis() as u64,
            error: Some(error),
            artifact: None,
        }
    }
}

/// The terminal result of one backup or restore invocation.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub run_id: Uuid,
    pub operation: Operation,
    pub source: PathBuf,
    pub artifact: Option<PathBuf>,
    pub status: OutcomeStatus,
    pub attempts: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub alert_dispatched: bool,
    /// Digest of the artifact as stored, recorded so restores can detect drift
    pub artifact_checksum: Option<Digest>,
    pub retention: Option<RetentionReport>,
    pub message: String,
}

impl OperationOutcome {
    pub fn new(operation: Operation, source: PathBuf, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            operation,
            source,
            artifact: None,
            status: OutcomeStatus::IoError,
            attempts: Vec::new(),
            started_at,
            duration: Duration::ZERO,
            alert_dispatched: false,
            artifact_checksum: None,
            retention: None,
            message: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// The attempt whose digests represent the outcome (the last one).
    pub fn final_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|record| record.error.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_and_exit_codes_are_distinct() {
        let all = [
            OutcomeStatus::Success,
            OutcomeStatus::FailedAfterRetries,
            OutcomeStatus::IoError,
            OutcomeStatus::RestoreMismatch,
            OutcomeStatus::RestoreFailed,
        ];
        let mut codes: Vec<i32> = all.iter().map(|s| s.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert_eq!(OutcomeStatus::FailedAfterRetries.as_str(), "FAILED_AFTER_RETRIES");
        assert_eq!(
            serde_json::to_string(&OutcomeStatus::IoError).unwrap(),
            "\"IO_ERROR\""
        );
    }

    #[test]
    fn test_last_error_skips_clean_attempts() {
        let mut outcome = OperationOutcome::new(Operation::Backup, PathBuf::from("/data"), Utc::now());
        outcome.attempts.push(AttemptRecord::build_failed(
            1,
            Duration::from_millis(3),
            "disk full".to_string(),
        ));
        outcome.attempts.push(AttemptRecord {
            attempt: 2,
            source_digest: None,
            artifact_digest: None,
            matched: true,
            duration_ms: 5,
            error: None,
            artifact: None,
        });

        assert_eq!(outcome.attempt_count(), 2);
        assert_eq!(outcome.last_error(), Some("disk full"));
        assert_eq!(outcome.final_attempt().unwrap().attempt, 2);
    }
}

//! Append-only operation log
//!
//! One CSV row per invocation. A row is fully serialised before it touches the
//! file and then written with a single append, so earlier rows are never
//! rewritten and a reader never sees half a record.

use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::executor::outcome::{Operation, OperationOutcome, OutcomeStatus};
use crate::utils::errors::BackupError;

/// Header row of the operation log, in column order.
pub const LOG_COLUMNS: [&str; 14] = [
    "timestamp",
    "run_id",
    "operation",
    "source",
    "artifact",
    "status",
    "attempts",
    "source_digest",
    "artifact_digest",
    "artifact_checksum",
    "duration_ms",
    "alert_dispatched",
    "message",
    "attempt_detail",
];

/// A single row of the operation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub run_id: String,
    pub operation: String,
    pub source: String,
    pub artifact: Option<String>,
    pub status: String,
    pub attempts: u32,
    pub source_digest: Option<String>,
    pub artifact_digest: Option<String>,
    /// Checksum of the artifact as stored on disk
    pub artifact_checksum: Option<String>,
    pub duration_ms: u64,
    pub alert_dispatched: bool,
    pub message: String,
    /// JSON array of the attempt records
    pub attempt_detail: String,
}

impl LogEntry {
    pub fn from_outcome(outcome: &OperationOutcome) -> Result<Self, BackupError> {
        let attempt_detail = serde_json::to_string(&outcome.attempts)
            .map_err(|e| BackupError::LogWrite(format!("Failed to serialize attempts: {}", e)))?;
        let last = outcome.final_attempt();

        Ok(Self {
            timestamp: outcome.started_at.to_rfc3339(),
            run_id: outcome.run_id.to_string(),
            operation: outcome.operation.as_str().to_string(),
            source: outcome.source.display().to_string(),
            artifact: outcome.artifact.as_ref().map(|p| p.display().to_string()),
            status: outcome.status.as_str().to_string(),
            attempts: outcome.attempt_count(),
            source_digest: last.and_then(|r| r.source_digest).map(|d| d.to_hex()),
            artifact_digest: last.and_then(|r| r.artifact_digest).map(|d| d.to_hex()),
            artifact_checksum: outcome.artifact_checksum.map(|d| d.to_hex()),
            duration_ms: outcome.duration.as_millis() as u64,
            alert_dispatched: outcome.alert_dispatched,
            message: outcome.message.clone(),
            attempt_detail,
        })
    }

    pub fn is_successful_backup(&self) -> bool {
        self.operation == Operation::Backup.as_str() && self.status == OutcomeStatus::Success.as_str()
    }

    /// File name of the recorded artifact, if any
    pub fn artifact_file_name(&self) -> Option<&str> {
        self.artifact
            .as_deref()
            .and_then(|a| Path::new(a).file_name())
            .and_then(|n| n.to_str())
    }
}

#[derive(Debug, Clone)]
pub struct OperationLog {
    path: PathBuf,
}

impl OperationLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one row, writing the header first if the file is new or empty.
    pub fn append(&self, entry: &LogEntry) -> Result<(), BackupError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::LogWrite(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BackupError::LogWrite(format!("Failed to open operation log: {}", e)))?;

        let needs_header = file
            .metadata()
            .map_err(|e| BackupError::LogWrite(format!("Failed to stat operation log: {}", e)))?
            .len()
            == 0;

        // Never mix our rows into a CSV file with another layout
        if !needs_header {
            self.check_header()?;
        }

        let row = serialize_row(entry, needs_header)?;

        file.write_all(&row)
            .map_err(|e| BackupError::LogWrite(format!("Failed to write log entry: {}", e)))?;
        file.sync_data()
            .map_err(|e| BackupError::LogWrite(format!("Failed to sync operation log: {}", e)))?;

        debug!(log = %self.path.display(), run_id = %entry.run_id, "Operation logged");
        Ok(())
    }

    fn check_header(&self) -> Result<(), BackupError> {
        let file = fs::File::open(&self.path)
            .map_err(|e| BackupError::LogWrite(format!("Failed to read operation log: {}", e)))?;
        let mut first_line = String::new();
        BufReader::new(file)
            .read_line(&mut first_line)
            .map_err(|e| BackupError::LogWrite(format!("Failed to read operation log: {}", e)))?;

        if first_line.trim_end_matches(['\r', '\n']) != LOG_COLUMNS.join(",") {
            return Err(BackupError::LogWrite(format!(
                "{} is not an operation log (unrecognised header); refusing to append",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Read every row. A missing log reads as empty; rows that do not parse
    /// as log entries are skipped with a warning.
    pub fn read_all(&self) -> io::Result<Vec<LogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)?;

        let headers = reader.headers()?;
        if !headers.is_empty() && headers.iter().ne(LOG_COLUMNS) {
            warn!(log = %self.path.display(), "Operation log has an unrecognised header");
        }

        let mut entries = Vec::new();
        for record in reader.deserialize::<LogEntry>() {
            match record {
                Ok(entry) => entries.push(entry),
                Err(e) if e.is_io_error() => return Err(e.into()),
                Err(e) => {
                    let line = e.position().map(|p| p.line()).unwrap_or_default();
                    warn!(log = %self.path.display(), line, error = %e, "Skipping unreadable log row");
                }
            }
        }
        Ok(entries)
    }

    pub fn entry_count(&self) -> io::Result<usize> {
        Ok(self.read_all()?.len())
    }

    /// The latest successful backup that produced `artifact_file_name`.
    pub fn find_recorded(&self, artifact_file_name: &str) -> io::Result<Option<LogEntry>> {
        Ok(self
            .read_all()?
            .into_iter()
            .rev()
            .find(|e| e.is_successful_backup() && e.artifact_file_name() == Some(artifact_file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn serialize_row(entry: &LogEntry, with_header: bool) -> Result<Vec<u8>, BackupError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());

    writer
        .serialize(entry)
        .map_err(|e| BackupError::LogWrite(format!("Failed to serialize log entry: {}", e)))?;

    writer
        .into_inner()
        .map_err(|e| BackupError::LogWrite(format!("Failed to serialize log entry: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Digest;
    use crate::executor::outcome::AttemptRecord;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn create_test_log() -> (OperationLog, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log = OperationLog::new(temp_dir.path().join("logs").join("backup_log.csv"));
        (log, temp_dir)
    }

    fn outcome(status: OutcomeStatus, artifact: &str) -> OperationOutcome {
        let mut outcome = OperationOutcome::new(Operation::Backup, PathBuf::from("/srv/data"), Utc::now());
        outcome.status = status;
        outcome.artifact = Some(PathBuf::from("/backups").join(artifact));
        outcome.duration = Duration::from_millis(42);
        outcome.artifact_checksum = Some(Digest::from_bytes([9; 32]));
        outcome.attempts.push(AttemptRecord {
            attempt: 1,
            source_digest: Some(Digest::from_bytes([1; 32])),
            artifact_digest: Some(Digest::from_bytes([1; 32])),
            matched: true,
            duration_ms: 40,
            error: None,
            artifact: outcome.artifact.clone(),
        });
        outcome.message = "backup verified, with, commas".to_string();
        outcome
    }

    fn entry(status: OutcomeStatus, artifact: &str) -> LogEntry {
        LogEntry::from_outcome(&outcome(status, artifact)).unwrap()
    }

    #[test]
    fn test_append_and_read() {
        let (log, _temp) = create_test_log();
        let written = entry(OutcomeStatus::Success, "data--0123abcd--20250101T000000000000Z");

        log.append(&written).unwrap();

        let entries = log.read_all().unwrap();
        assert_eq!(entries, vec![written]);
        assert_eq!(entries[0].status, "SUCCESS");
        assert_eq!(entries[0].artifact_checksum, Some(Digest::from_bytes([9; 32]).to_hex()));
    }

    #[test]
    fn test_header_written_once() {
        let (log, _temp) = create_test_log();
        for _ in 0..3 {
            log.append(&entry(OutcomeStatus::Success, "a")).unwrap();
        }

        let content = fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.matches("timestamp,run_id,operation").count(), 1);
        assert!(content.starts_with("timestamp,run_id,operation,source,artifact,status,attempts,"));
        assert_eq!(log.entry_count().unwrap(), 3);
    }

    #[test]
    fn test_append_never_touches_prior_bytes() {
        let (log, _temp) = create_test_log();
        log.append(&entry(OutcomeStatus::Success, "a")).unwrap();
        let before = fs::read(log.path()).unwrap();

        log.append(&entry(OutcomeStatus::FailedAfterRetries, "b")).unwrap();
        let after = fs::read(log.path()).unwrap();

        assert!(after.len() > before.len());
        assert_eq!(&after[..before.len()], &before[..]);
    }

    #[test]
    fn test_empty_log() {
        let (log, _temp) = create_test_log();
        assert!(!log.path().exists());
        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_attempt_detail_is_json() {
        let (log, _temp) = create_test_log();
        log.append(&entry(OutcomeStatus::Success, "a")).unwrap();

        let read = &log.read_all().unwrap()[0];
        let attempts: Vec<AttemptRecord> = serde_json::from_str(&read.attempt_detail).unwrap();
        assert_eq!(attempts.len(), 1);
        assert!(attempts[0].matched);
    }

    #[test]
    fn test_find_recorded_uses_latest_success() {
        let (log, _temp) = create_test_log();
        let name = "data--0123abcd--20250101T000000000000Z.tar.zst";

        log.append(&entry(OutcomeStatus::FailedAfterRetries, name)).unwrap();
        assert!(log.find_recorded(name).unwrap().is_none());

        let first = entry(OutcomeStatus::Success, name);
        log.append(&first).unwrap();
        let mut second = entry(OutcomeStatus::Success, name);
        second.artifact_digest = Some(Digest::from_bytes([7; 32]).to_hex());
        log.append(&second).unwrap();

        let found = log.find_recorded(name).unwrap().unwrap();
        assert_eq!(found.run_id, second.run_id);
        assert!(log.find_recorded("other").unwrap().is_none());
    }

    #[test]
    fn test_unwritable_log_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        // The parent "directory" is a regular file
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let log = OperationLog::new(blocker.join("backup_log.csv"));

        let result = log.append(&entry(OutcomeStatus::Success, "a"));
        assert!(matches!(result, Err(BackupError::LogWrite(_))));
    }

    #[test]
    fn test_columns_match_serialized_header() {
        let row = serialize_row(&entry(OutcomeStatus::Success, "a"), true).unwrap();
        let text = String::from_utf8(row).unwrap();
        assert_eq!(text.lines().next(), Some(LOG_COLUMNS.join(",").as_str()));
    }

    const FOREIGN_LOG: &str = "timestamp,source,backup_path,status,attempts,message\n\
        2024-05-01T10:00:00,/srv/data,/backups/data_20240501.tar.gz,SUCCESS,1,ok\n";

    #[test]
    fn test_foreign_header_is_not_appended_to() {
        let (log, _temp) = create_test_log();
        fs::create_dir_all(log.path().parent().unwrap()).unwrap();
        fs::write(log.path(), FOREIGN_LOG).unwrap();

        let result = log.append(&entry(OutcomeStatus::Success, "a"));

        assert!(matches!(result, Err(BackupError::LogWrite(ref m)) if m.contains("unrecognised header")));
        assert_eq!(fs::read_to_string(log.path()).unwrap(), FOREIGN_LOG);
    }

    #[test]
    fn test_foreign_rows_are_skipped_when_reading() {
        let (log, _temp) = create_test_log();
        fs::create_dir_all(log.path().parent().unwrap()).unwrap();
        fs::write(log.path(), FOREIGN_LOG).unwrap();

        assert!(log.read_all().unwrap().is_empty());
        assert_eq!(log.entry_count().unwrap(), 0);
        assert!(log.find_recorded("data_20240501.tar.gz").unwrap().is_none());
    }

    #[test]
    fn test_malformed_row_does_not_hide_the_others() {
        let (log, _temp) = create_test_log();
        let name = "data--0123abcd--20250101T000000000000Z.tar.zst";
        log.append(&entry(OutcomeStatus::Success, "a")).unwrap();

        // A truncated line, as left behind by a crashed writer
        let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
        file.write_all(b"2025-01-01T00:00:00+00:00,not-a-uuid,backup\n").unwrap();
        drop(file);

        log.append(&entry(OutcomeStatus::Success, name)).unwrap();

        assert_eq!(log.entry_count().unwrap(), 2);
        assert!(log.find_recorded(name).unwrap().is_some());
    }
}

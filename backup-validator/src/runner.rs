//! Invocation-level orchestration.
//!
//! Ties the pieces together for one backup or restore: the blocking
//! build/validate/restore work runs on tokio's blocking pool, alerts are sent
//! from the async side, and every invocation ends with exactly one row in the
//! operation log.

use chrono::Utc;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, Notify};
use crate::archive::{ArchiveBuilder, BackupTarget, CompressionMode};
use crate::checksum::{ChecksumComputer, Digest};
use crate::config::Config;
use crate::executor::outcome::{AttemptRecord, Operation, OperationOutcome, OutcomeStatus};
use crate::executor::{ArchivePipeline, RetryController, RetryReport, RetryStatus};
use crate::integrity::IntegrityValidator;
use crate::oplog::{LogEntry, OperationLog};
use crate::restore::RestoreValidator;
use crate::retention::RetentionManager;
use crate::utils::errors::{BackupError, RestoreError};
use crate::utils::format::format_duration;

pub struct BackupRunner<N: Notify> {
    config: Config,
    notifier: N,
    log: OperationLog,
}

impl<N: Notify> BackupRunner<N> {
    pub fn new(config: Config, notifier: N) -> Self {
        let log = OperationLog::new(config.log.audit_log.clone());
        Self {
            config,
            notifier,
            log,
        }
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    fn checksum(&self) -> ChecksumComputer {
        ChecksumComputer::new(self.config.checksum.chunk_size)
    }

    /// Back up `source` into `dest` until an artifact validates or attempts run out.
    ///
    /// Only a failure to record the outcome is returned as `Err`; every other
    /// failure is described by the returned outcome.
    pub async fn run_backup(
        &self,
        source: &Path,
        dest: &Path,
        mode: CompressionMode,
    ) -> Result<OperationOutcome, BackupError> {
        let clock = Instant::now();
        let mut outcome = OperationOutcome::new(Operation::Backup, source.to_path_buf(), Utc::now());

        info!(
            run_id = %outcome.run_id,
            source = %source.display(),
            dest = %dest.display(),
            mode = mode.as_str(),
            "Starting backup"
        );

        match BackupTarget::resolve(source, dest, mode) {
            Ok(target) => {
                outcome.source = target.source.clone();
                self.execute(target, &mut outcome).await?;
            }
            Err(e) => {
                error!(source = %source.display(), error = %e, "Backup target unusable");
                outcome.status = OutcomeStatus::IoError;
                outcome.message = e.to_string();
            }
        }

        outcome.duration = clock.elapsed();
        self.record(&outcome)?;
        Ok(outcome)
    }

    async fn execute(
        &self,
        target: BackupTarget,
        outcome: &mut OperationOutcome,
    ) -> Result<(), BackupError> {
        let controller = RetryController::new(
            self.config.retry.max_attempts,
            self.config.retry.backoff_policy(),
        );
        let pipeline = ArchivePipeline::new(
            target.clone(),
            ArchiveBuilder::new(self.config.archive.compression_level),
            IntegrityValidator::new(self.checksum(), self.config.archive.scratch_dir.clone()),
        );

        let report: RetryReport = tokio::task::spawn_blocking(move || {
            let mut pipeline = pipeline;
            controller.run(&mut pipeline)
        })
        .await
        .map_err(|e| BackupError::Task(e.to_string()))?;

        let last_error = report.last_error().map(str::to_string);
        outcome.attempts = report.attempts;

        match (report.status, report.artifact, report.verification) {
            (RetryStatus::Success, Some(artifact), Some(verification)) => {
                outcome.status = OutcomeStatus::Success;
                outcome.artifact = Some(artifact.path.clone());
                outcome.artifact_checksum = Some(verification.stored_checksum);
                outcome.message = format!("verified after {} attempt(s)", outcome.attempt_count());

                self.apply_retention(&target, outcome).await?;
            }
            _ => {
                let attempts = outcome.attempt_count();
                let last_error = last_error.unwrap_or_else(|| "unknown error".to_string());
                outcome.status = OutcomeStatus::FailedAfterRetries;
                outcome.message = BackupError::ExhaustedRetries {
                    attempts,
                    last_error: last_error.clone(),
                }
                .to_string();
                error!(run_id = %outcome.run_id, "{}", outcome.message);

                let alert = Alert::new(outcome.run_id, target.source, attempts, last_error);
                outcome.alert_dispatched = self.dispatch_alert(alert).await;
            }
        }

        Ok(())
    }

    async fn apply_retention(
        &self,
        target: &BackupTarget,
        outcome: &mut OperationOutcome,
    ) -> Result<(), BackupError> {
        let manager = RetentionManager::new(self.config.retention.policy());
        let dest_dir = target.dest_dir.clone();
        let identity = target.identity.clone();
        let fresh = outcome.artifact.clone();

        let result = tokio::task::spawn_blocking(move || {
            manager.enforce(&dest_dir, &identity, fresh.as_deref())
        })
        .await
        .map_err(|e| BackupError::Task(e.to_string()))?;

        match result {
            Ok(report) => {
                if !report.warnings.is_empty() {
                    outcome.message.push_str(&format!(
                        "; {} retention warning(s): {}",
                        report.warnings.len(),
                        report
                            .warnings
                            .iter()
                            .map(|w| w.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ));
                }
                outcome.retention = Some(report);
            }
            Err(e) => {
                warn!(dest = %target.dest_dir.display(), error = %e, "Retention skipped");
                outcome
                    .message
                    .push_str(&format!("; retention skipped: {}", e));
            }
        }

        Ok(())
    }

    /// Returns whether any transport accepted the alert.
    async fn dispatch_alert(&self, alert: Alert) -> bool {
        if !self.notifier.is_enabled() {
            debug!("No alert transport configured");
            return false;
        }

        match self.notifier.notify(&alert).await {
            Ok(()) => true,
            Err(e) => {
                warn!(run_id = %alert.run_id, error = %e, "Alert dispatch failed");
                false
            }
        }
    }

    /// Restore `artifact` under `target` and check it against the recorded digest.
    pub async fn run_restore(
        &self,
        artifact: &Path,
        target: &Path,
    ) -> Result<OperationOutcome, BackupError> {
        let clock = Instant::now();
        let mut outcome = OperationOutcome::new(Operation::Restore, artifact.to_path_buf(), Utc::now());

        info!(
            run_id = %outcome.run_id,
            artifact = %artifact.display(),
            target = %target.display(),
            "Starting restore validation"
        );

        let validator = RestoreValidator::new(self.log.clone(), self.checksum());
        let result = tokio::task::spawn_blocking({
            let artifact = artifact.to_path_buf();
            let target = target.to_path_buf();
            move || validator.restore(&artifact, &target)
        })
        .await
        .map_err(|e| BackupError::Task(e.to_string()))?;

        match result {
            Ok(report) => {
                info!(
                    restored = %report.restored_root.display(),
                    took = %format_duration(report.duration),
                    "Restore validated"
                );
                outcome.status = OutcomeStatus::Success;
                outcome.message = "restore verified".to_string();
                outcome.attempts.push(AttemptRecord {
                    attempt: 1,
                    source_digest: Some(report.expected),
                    artifact_digest: Some(report.actual),
                    matched: true,
                    duration_ms: report.duration.as_millis() as u64,
                    error: None,
                    artifact: Some(report.restored_root.clone()),
                });
                outcome.artifact = Some(report.restored_root);
            }
            Err(e) => {
                error!(artifact = %artifact.display(), error = %e, "Restore validation failed");
                outcome.status = if e.is_mismatch() {
                    OutcomeStatus::RestoreMismatch
                } else {
                    OutcomeStatus::RestoreFailed
                };
                outcome.message = e.to_string();
                outcome.attempts.push(failed_restore_record(&e, clock.elapsed().as_millis() as u64));
            }
        }

        outcome.duration = clock.elapsed();
        self.record(&outcome)?;
        Ok(outcome)
    }

    fn record(&self, outcome: &OperationOutcome) -> Result<(), BackupError> {
        let entry = LogEntry::from_outcome(outcome)?;
        self.log.append(&entry).map_err(|e| {
            error!(log = %self.log.path().display(), error = %e, "Operation log write failed");
            e
        })
    }
}

fn failed_restore_record(error: &RestoreError, duration_ms: u64) -> AttemptRecord {
    let (expected, actual) = match error {
        RestoreError::DigestMismatch { expected, actual } => {
            (expected.parse::<Digest>().ok(), actual.parse::<Digest>().ok())
        }
        _ => (None, None),
    };

    AttemptRecord {
        attempt: 1,
        source_digest: expected,
        artifact_digest: actual,
        matched: false,
        duration_ms,
        error: Some(error.to_string()),
        artifact: None,
    }
}

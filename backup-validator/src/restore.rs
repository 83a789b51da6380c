//! One-shot restore validation.
//!
//! Restores an artifact into a target directory and proves the restored
//! content matches what the operation log recorded when the artifact was
//! created. Never retried.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::archive::{self, ArtifactName, CompressionMode};
use crate::checksum::{ChecksumComputer, Digest};
use crate::oplog::{LogEntry, OperationLog};
use crate::utils::errors::RestoreError;

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub artifact: PathBuf,
    /// Root of the restored content inside the target directory
    pub restored_root: PathBuf,
    pub expected: Digest,
    pub actual: Digest,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RestoreValidator {
    log: OperationLog,
    checksum: ChecksumComputer,
}

impl RestoreValidator {
    pub fn new(log: OperationLog, checksum: ChecksumComputer) -> Self {
        Self { log, checksum }
    }

    pub fn restore(&self, artifact: &Path, target_dir: &Path) -> Result<RestoreReport, RestoreError> {
        let started = Instant::now();

        let name = ArtifactName::from_path(artifact)
            .ok_or_else(|| RestoreError::UnrecognizedArtifact(artifact.to_path_buf()))?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.file_name());

        let recorded = self
            .log
            .find_recorded(&file_name)?
            .ok_or_else(|| RestoreError::NotRecorded(file_name.clone()))?;
        let expected = recorded_digest(&recorded, &file_name)?;

        // The stored checksum catches any change to the artifact bytes, even
        // ones the extractor would tolerate
        if let Some(recorded_checksum) = recorded.artifact_checksum.as_deref() {
            let actual = self.stored_checksum(artifact, name.mode)?;
            if actual.to_hex() != recorded_checksum {
                warn!(
                    artifact = %artifact.display(),
                    expected = recorded_checksum,
                    actual = %actual,
                    "Artifact checksum differs from the recorded value"
                );
                return Err(RestoreError::DigestMismatch {
                    expected: recorded_checksum.to_string(),
                    actual: actual.to_hex(),
                });
            }
        }

        fs::create_dir_all(target_dir)?;
        let root_name = name.identity.basename.as_str();
        let restored_root = target_dir.join(root_name);
        if fs::symlink_metadata(&restored_root).is_ok() {
            return Err(RestoreError::TargetExists(restored_root));
        }

        info!(
            artifact = %artifact.display(),
            target = %restored_root.display(),
            "Restoring artifact"
        );

        if let Err(e) = archive::unpack(artifact, name.mode, target_dir, root_name) {
            archive::discard_artifact(&restored_root);
            return Err(RestoreError::Extraction(format!(
                "{}: {}",
                artifact.display(),
                e
            )));
        }

        let actual = self.checksum.tree_digest(&restored_root)?;
        if actual != expected {
            warn!(
                restored = %restored_root.display(),
                expected = %expected,
                actual = %actual,
                "Restored content does not match the recorded digest"
            );
            return Err(RestoreError::DigestMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }

        info!(restored = %restored_root.display(), digest = %actual, "Restore verified");

        Ok(RestoreReport {
            artifact: artifact.to_path_buf(),
            restored_root,
            expected,
            actual,
            duration: started.elapsed(),
        })
    }

    fn stored_checksum(&self, artifact: &Path, mode: CompressionMode) -> Result<Digest, RestoreError> {
        let digest = match mode {
            CompressionMode::Archive => self.checksum.file_digest(artifact)?,
            CompressionMode::None => self.checksum.tree_digest(artifact)?,
        };
        Ok(digest)
    }
}

fn recorded_digest(entry: &LogEntry, file_name: &str) -> Result<Digest, RestoreError> {
    entry
        .artifact_digest
        .as_deref()
        .and_then(|hex| hex.parse::<Digest>().ok())
        .ok_or_else(|| RestoreError::NotRecorded(format!("{} (no digest recorded)", file_name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveBuilder, BackupTarget};
    use crate::executor::outcome::{AttemptRecord, Operation, OperationOutcome, OutcomeStatus};
    use crate::integrity::IntegrityValidator;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        log: OperationLog,
        artifact: PathBuf,
    }

    /// Back up a small directory and record it like the runner would.
    fn backed_up(mode: CompressionMode) -> Fixture {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("project");
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("README.md"), b"# project\n").unwrap();
        fs::write(source.join("src/main.rs"), b"fn main() {}\n").unwrap();

        let target = BackupTarget::resolve(&source, &temp.path().join("backups"), mode).unwrap();
        let artifact = ArchiveBuilder::new(3).build(&target, 1).unwrap();
        let verification = IntegrityValidator::new(ChecksumComputer::default(), None)
            .validate(&target, &artifact)
            .unwrap();
        assert!(verification.matched);

        let mut outcome = OperationOutcome::new(Operation::Backup, target.source.clone(), Utc::now());
        outcome.status = OutcomeStatus::Success;
        outcome.artifact = Some(artifact.path.clone());
        outcome.artifact_checksum = Some(verification.stored_checksum);
        outcome.attempts.push(AttemptRecord {
            attempt: 1,
            source_digest: Some(verification.source_digest),
            artifact_digest: Some(verification.artifact_digest),
            matched: true,
            duration_ms: 1,
            error: None,
            artifact: Some(artifact.path.clone()),
        });

        let log = OperationLog::new(temp.path().join("backup_log.csv"));
        log.append(&LogEntry::from_outcome(&outcome).unwrap()).unwrap();

        Fixture {
            artifact: artifact.path,
            temp,
            log,
        }
    }

    fn validator(log: &OperationLog) -> RestoreValidator {
        RestoreValidator::new(log.clone(), ChecksumComputer::default())
    }

    #[test]
    fn test_restore_archive_matches() {
        let fx = backed_up(CompressionMode::Archive);
        let target = fx.temp.path().join("restore");

        let report = validator(&fx.log).restore(&fx.artifact, &target).unwrap();

        assert_eq!(report.expected, report.actual);
        assert_eq!(report.restored_root, target.join("project"));
        assert_eq!(
            fs::read(target.join("project/src/main.rs")).unwrap(),
            b"fn main() {}\n"
        );
    }

    #[test]
    fn test_restore_copy_matches() {
        let fx = backed_up(CompressionMode::None);
        let report = validator(&fx.log)
            .restore(&fx.artifact, &fx.temp.path().join("restore"))
            .unwrap();
        assert_eq!(report.expected, report.actual);
    }

    #[test]
    fn test_flipped_byte_in_archive_is_a_mismatch() {
        let fx = backed_up(CompressionMode::Archive);
        let mut bytes = fs::read(&fx.artifact).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        fs::write(&fx.artifact, &bytes).unwrap();

        let err = validator(&fx.log)
            .restore(&fx.artifact, &fx.temp.path().join("restore"))
            .unwrap_err();
        assert!(err.is_mismatch(), "unexpected error: {err}");
    }

    #[test]
    fn test_modified_copy_is_a_mismatch() {
        let fx = backed_up(CompressionMode::None);
        fs::write(fx.artifact.join("README.md"), b"# tampered\n").unwrap();

        let err = validator(&fx.log)
            .restore(&fx.artifact, &fx.temp.path().join("restore"))
            .unwrap_err();
        assert!(err.is_mismatch());
    }

    #[test]
    fn test_existing_target_is_refused() {
        let fx = backed_up(CompressionMode::Archive);
        let target = fx.temp.path().join("restore");
        fs::create_dir_all(target.join("project")).unwrap();

        let err = validator(&fx.log).restore(&fx.artifact, &target).unwrap_err();
        assert!(matches!(err, RestoreError::TargetExists(_)));
    }

    #[test]
    fn test_unrecorded_artifact_is_refused() {
        let fx = backed_up(CompressionMode::Archive);
        let empty_log = OperationLog::new(fx.temp.path().join("other_log.csv"));

        let err = validator(&empty_log)
            .restore(&fx.artifact, &fx.temp.path().join("restore"))
            .unwrap_err();
        assert!(matches!(err, RestoreError::NotRecorded(_)));
    }

    #[test]
    fn test_foreign_file_is_not_an_artifact() {
        let fx = backed_up(CompressionMode::Archive);
        let stray = fx.temp.path().join("notes.txt");
        fs::write(&stray, b"hello").unwrap();

        let err = validator(&fx.log)
            .restore(&stray, &fx.temp.path().join("restore"))
            .unwrap_err();
        assert!(matches!(err, RestoreError::UnrecognizedArtifact(_)));
    }

    #[test]
    fn test_truncated_archive_without_recorded_checksum_fails_extraction() {
        let fx = backed_up(CompressionMode::Archive);

        // Rewrite the log without the stored checksum so extraction is exercised
        let mut entry = fx.log.read_all().unwrap().remove(0);
        entry.artifact_checksum = None;
        let log = OperationLog::new(fx.temp.path().join("legacy_log.csv"));
        log.append(&entry).unwrap();

        let bytes = fs::read(&fx.artifact).unwrap();
        fs::write(&fx.artifact, &bytes[..bytes.len() / 2]).unwrap();

        let target = fx.temp.path().join("restore");
        let err = validator(&log).restore(&fx.artifact, &target).unwrap_err();
        assert!(
            matches!(err, RestoreError::Extraction(_) | RestoreError::DigestMismatch { .. }),
            "unexpected error: {err}"
        );
        if matches!(err, RestoreError::Extraction(_)) {
            assert!(!target.join("project").exists());
        }
    }
}

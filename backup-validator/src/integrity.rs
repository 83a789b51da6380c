//! Source vs artifact comparison.
//!
//! Both sides are reduced to a tree digest. Copies are digested in place;
//! archives are trial-extracted into a scratch directory that is removed on
//! every exit path.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::archive::{self, BackupArtifact, BackupTarget, CompressionMode};
use crate::checksum::{ChecksumComputer, Digest};
use crate::utils::errors::BackupError;

const SCRATCH_PREFIX: &str = ".verify-";

/// Result of comparing a source with its artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub matched: bool,
    pub source_digest: Digest,
    /// Tree digest of the artifact's content
    pub artifact_digest: Digest,
    /// Digest of the artifact as stored (archive file bytes, or the copy's tree digest)
    pub stored_checksum: Digest,
}

#[derive(Debug, Clone)]
pub struct IntegrityValidator {
    checksum: ChecksumComputer,
    scratch_root: Option<PathBuf>,
}

impl IntegrityValidator {
    pub fn new(checksum: ChecksumComputer, scratch_root: Option<PathBuf>) -> Self {
        Self {
            checksum,
            scratch_root,
        }
    }

    pub fn validate(
        &self,
        target: &BackupTarget,
        artifact: &BackupArtifact,
    ) -> Result<Verification, BackupError> {
        let source_digest = self.checksum.tree_digest(&target.source).map_err(|e| {
            BackupError::Validation(format!(
                "could not digest source {}: {}",
                target.source.display(),
                e
            ))
        })?;

        let (artifact_digest, stored_checksum) = match artifact.mode {
            CompressionMode::None => {
                let digest = self.checksum.tree_digest(&artifact.path).map_err(|e| {
                    BackupError::Validation(format!(
                        "could not digest copy {}: {}",
                        artifact.path.display(),
                        e
                    ))
                })?;
                (digest, digest)
            }
            CompressionMode::Archive => {
                let scratch_root = self.scratch_root.as_deref().unwrap_or(&target.dest_dir);
                self.digest_archive(artifact, scratch_root, target.basename())?
            }
        };

        let matched = source_digest == artifact_digest;
        if matched {
            info!(
                artifact = %artifact.path.display(),
                digest = %artifact_digest,
                "Artifact matches source"
            );
        } else {
            warn!(
                artifact = %artifact.path.display(),
                source_digest = %source_digest,
                artifact_digest = %artifact_digest,
                "Artifact does not match source"
            );
        }

        Ok(Verification {
            matched,
            source_digest,
            artifact_digest,
            stored_checksum,
        })
    }

    fn digest_archive(
        &self,
        artifact: &BackupArtifact,
        scratch_root: &Path,
        root_name: &str,
    ) -> Result<(Digest, Digest), BackupError> {
        let stored = self.checksum.file_digest(&artifact.path).map_err(|e| {
            BackupError::Validation(format!(
                "could not read archive {}: {}",
                artifact.path.display(),
                e
            ))
        })?;

        // Dropped (and removed) on every return path below
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(scratch_root)
            .map_err(|e| {
                BackupError::Validation(format!(
                    "could not create scratch directory in {}: {}",
                    scratch_root.display(),
                    e
                ))
            })?;

        let root = archive::unpack(&artifact.path, artifact.mode, scratch.path(), root_name)
            .map_err(|e| {
                BackupError::Validation(format!(
                    "trial extraction of {} failed: {}",
                    artifact.path.display(),
                    e
                ))
            })?;

        let digest = self.checksum.tree_digest(&root).map_err(|e| {
            BackupError::Validation(format!("could not digest extracted content: {}", e))
        })?;

        if let Err(e) = scratch.close() {
            warn!(error = %e, "Failed to remove scratch directory");
        }

        Ok((digest, stored))
    }
}

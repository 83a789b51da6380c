//! Pruning of old artifacts for one source.
//!
//! Only names that parse as artifacts of the same source identity are ever
//! considered, so unrelated files and other sources' backups in a shared
//! destination directory are left alone.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::archive::{ArtifactName, SourceIdentity};
use crate::utils::errors::RetentionWarning;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Number of newest artifacts to keep (at least one is always kept)
    pub keep: usize,
    pub max_age: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep: 7,
            max_age: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub kept: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub warnings: Vec<RetentionWarning>,
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetentionManager {
    policy: RetentionPolicy,
}

impl RetentionManager {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    /// Prune artifacts of `identity`. `protect` names an artifact that must
    /// survive regardless of age or rank, such as the one just validated.
    pub fn enforce(
        &self,
        dest_dir: &Path,
        identity: &SourceIdentity,
        protect: Option<&Path>,
    ) -> io::Result<RetentionReport> {
        self.enforce_at(dest_dir, identity, protect, Utc::now())
    }

    /// Same as [`enforce`](Self::enforce) with an explicit clock.
    pub fn enforce_at(
        &self,
        dest_dir: &Path,
        identity: &SourceIdentity,
        protect: Option<&Path>,
        now: DateTime<Utc>,
    ) -> io::Result<RetentionReport> {
        let candidates = list_artifacts(dest_dir, identity)?;
        let cutoff = self.policy.max_age.map(|age| now - age);

        let protected = protect.and_then(Path::file_name);
        let is_protected =
            |candidate: &Candidate| protected.is_some() && candidate.path.file_name() == protected;
        let has_protected = candidates.iter().any(is_protected);

        // The protected artifact occupies one of the `keep` slots
        let slots = self.policy.keep.max(1) - usize::from(has_protected);
        let mut ranked = 0;

        let mut report = RetentionReport::default();

        for candidate in candidates {
            let keep = if is_protected(&candidate) {
                true
            } else {
                let expired = cutoff.is_some_and(|cutoff| candidate.created_at < cutoff);
                // Without a protected artifact the newest always survives
                let newest = !has_protected && ranked == 0;
                ranked += 1;
                newest || (ranked <= slots && !expired)
            };

            if keep {
                report.kept.push(candidate.path);
                continue;
            }

            match remove(&candidate.path) {
                Ok(()) => {
                    debug!(artifact = %candidate.path.display(), "Removed old artifact");
                    report.removed.push(candidate.path);
                }
                Err(e) => {
                    let warning = RetentionWarning {
                        path: candidate.path,
                        reason: e.to_string(),
                    };
                    warn!("Retention: {}", warning);
                    report.warnings.push(warning);
                }
            }
        }

        if !report.removed.is_empty() || !report.warnings.is_empty() {
            info!(
                source = %identity,
                kept = report.kept.len(),
                removed = report.removed.len(),
                warnings = report.warnings.len(),
                "Retention applied"
            );
        }

        Ok(report)
    }
}

/// Artifacts of `identity` in `dest_dir`, newest first.
fn list_artifacts(dest_dir: &Path, identity: &SourceIdentity) -> io::Result<Vec<Candidate>> {
    let mut candidates: Vec<Candidate> = fs::read_dir(dest_dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let name = ArtifactName::from_path(&path)?;
            (name.identity == *identity).then_some(Candidate {
                path,
                created_at: name.created_at,
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.path.cmp(&a.path)));
    Ok(candidates)
}

fn remove(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

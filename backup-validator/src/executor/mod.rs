//! Retry controller - drives build/validate attempts for one target.
//!
//! The controller is an explicit state machine:
//!
//! ```text
//! Pending -> Building -> Validating -> Success
//!               ^           |
//!               |           v
//!               +------- Retry -----> Exhausted
//! ```
//!
//! A failed build skips validation and goes straight to `Retry`. Every
//! attempt leaves an `AttemptRecord`, so the audit log can show exactly what
//! was tried even though failed artifacts are discarded.

pub mod backoff;
pub mod outcome;

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::archive::{discard_artifact, ArchiveBuilder, BackupArtifact, BackupTarget};
use crate::integrity::{IntegrityValidator, Verification};
use crate::utils::errors::BackupError;
use backoff::BackoffPolicy;
use outcome::AttemptRecord;

/// One attempt's worth of work, as seen by the controller.
pub trait AttemptRunner {
    /// Produce a fresh artifact for the given (1-based) attempt.
    fn build(&mut self, attempt: u32) -> Result<BackupArtifact, BackupError>;

    /// Compare the artifact with its source.
    fn validate(&mut self, artifact: &BackupArtifact) -> Result<Verification, BackupError>;

    /// Remove an artifact that failed validation.
    fn discard(&mut self, artifact: &BackupArtifact);
}

/// Builds and validates artifacts for a single target.
#[derive(Debug, Clone)]
pub struct ArchivePipeline {
    pub target: BackupTarget,
    builder: ArchiveBuilder,
    validator: IntegrityValidator,
}

impl ArchivePipeline {
    pub fn new(target: BackupTarget, builder: ArchiveBuilder, validator: IntegrityValidator) -> Self {
        Self {
            target,
            builder,
            validator,
        }
    }
}

impl AttemptRunner for ArchivePipeline {
    fn build(&mut self, attempt: u32) -> Result<BackupArtifact, BackupError> {
        self.builder.build(&self.target, attempt)
    }

    fn validate(&mut self, artifact: &BackupArtifact) -> Result<Verification, BackupError> {
        self.validator.validate(&self.target, artifact)
    }

    fn discard(&mut self, artifact: &BackupArtifact) {
        info!(artifact = %artifact.path.display(), "Discarding failed artifact");
        discard_artifact(&artifact.path);
    }
}

#[derive(Debug)]
enum AttemptState {
    Pending,
    Building {
        attempt: u32,
    },
    Validating {
        attempt: u32,
        artifact: BackupArtifact,
        started: Instant,
    },
    Retry {
        attempt: u32,
        artifact: Option<BackupArtifact>,
    },
    Success {
        artifact: BackupArtifact,
        verification: Verification,
    },
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    Success,
    Exhausted,
}

/// What the controller hands back once it reaches a terminal state.
#[derive(Debug)]
pub struct RetryReport {
    pub status: RetryStatus,
    pub attempts: Vec<AttemptRecord>,
    /// The validated artifact (Success only)
    pub artifact: Option<BackupArtifact>,
    pub verification: Option<Verification>,
}

impl RetryReport {
    pub fn last_error(&self) -> Option<&str> {
        self.attempts.iter().rev().find_map(|r| r.error.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: u32,
    backoff: BackoffPolicy,
    sleep: fn(Duration),
}

impl RetryController {
    /// `max_attempts` is clamped to at least one attempt.
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            sleep: std::thread::sleep,
        }
    }

    /// Replace the blocking sleep used between attempts.
    pub fn with_sleeper(mut self, sleep: fn(Duration)) -> Self {
        self.sleep = sleep;
        self
    }

    /// Run the machine to a terminal state.
    pub fn run<R: AttemptRunner>(&self, runner: &mut R) -> RetryReport {
        let mut history = Vec::new();
        let mut state = AttemptState::Pending;

        loop {
            state = match self.step(state, runner, &mut history) {
                AttemptState::Success {
                    artifact,
                    verification,
                } => {
                    return RetryReport {
                        status: RetryStatus::Success,
                        attempts: history,
                        artifact: Some(artifact),
                        verification: Some(verification),
                    };
                }
                AttemptState::Exhausted => {
                    return RetryReport {
                        status: RetryStatus::Exhausted,
                        attempts: history,
                        artifact: None,
                        verification: None,
                    };
                }
                next => next,
            };
        }
    }

    fn step<R: AttemptRunner>(
        &self,
        state: AttemptState,
        runner: &mut R,
        history: &mut Vec<AttemptRecord>,
    ) -> AttemptState {
        match state {
            AttemptState::Pending => AttemptState::Building { attempt: 1 },

            AttemptState::Building { attempt } => {
                let started = Instant::now();
                match runner.build(attempt) {
                    Ok(artifact) => AttemptState::Validating {
                        attempt,
                        artifact,
                        started,
                    },
                    Err(e) => {
                        warn!(attempt, max = self.max_attempts, error = %e, "Build failed");
                        history.push(AttemptRecord::build_failed(
                            attempt,
                            started.elapsed(),
                            e.to_string(),
                        ));
                        AttemptState::Retry {
                            attempt,
                            artifact: None,
                        }
                    }
                }
            }

            AttemptState::Validating {
                attempt,
                mut artifact,
                started,
            } => {
                let result = runner.validate(&artifact);
                let duration_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(verification) => {
                        let matched = verification.matched;
                        history.push(AttemptRecord {
                            attempt,
                            source_digest: Some(verification.source_digest),
                            artifact_digest: Some(verification.artifact_digest),
                            matched,
                            duration_ms,
                            error: (!matched).then(|| "checksum mismatch".to_string()),
                            artifact: Some(artifact.path.clone()),
                        });

                        if matched {
                            info!(attempt, artifact = %artifact.path.display(), "Backup verified");
                            artifact.digest = Some(verification.artifact_digest);
                            AttemptState::Success {
                                artifact,
                                verification,
                            }
                        } else {
                            warn!(attempt, max = self.max_attempts, "Verification failed: checksum mismatch");
                            AttemptState::Retry {
                                attempt,
                                artifact: Some(artifact),
                            }
                        }
                    }
                    Err(e) => {
                        warn!(attempt, max = self.max_attempts, error = %e, "Verification error");
                        history.push(AttemptRecord {
                            attempt,
                            source_digest: None,
                            artifact_digest: None,
                            matched: false,
                            duration_ms,
                            error: Some(e.to_string()),
                            artifact: Some(artifact.path.clone()),
                        });
                        AttemptState::Retry {
                            attempt,
                            artifact: Some(artifact),
                        }
                    }
                }
            }

            AttemptState::Retry { attempt, artifact } => {
                if let Some(artifact) = artifact {
                    runner.discard(&artifact);
                }

                if attempt >= self.max_attempts {
                    warn!(attempts = attempt, "Retries exhausted");
                    return AttemptState::Exhausted;
                }

                let delay = self.backoff.delay_after(attempt);
                if !delay.is_zero() {
                    info!(
                        next_attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after delay"
                    );
                    (self.sleep)(delay);
                }
                AttemptState::Building {
                    attempt: attempt + 1,
                }
            }

            terminal @ (AttemptState::Success { .. } | AttemptState::Exhausted) => terminal,
        }
    }
}

//! Backup Validator - Main entry point
//!
//! Backs up a file or directory, verifies the artifact against its source and
//! retries until it matches; or restores an artifact and verifies it against
//! the operation log.

use anyhow::Context;
use backup_validator::alert::AlertDispatcher;
use backup_validator::utils::format::{format_duration, short_digest};
use backup_validator::{exit_code, utils, BackupError, BackupRunner, CompressionMode, Config, OperationOutcome};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_CODES: &str = "\
Exit codes:
  0  success
  1  usage or configuration error
  2  backup failed after all retries
  3  source or destination unusable
  4  restored content does not match the recorded digest
  5  restore failed (unknown artifact, extraction error, target exists)
  6  operation log could not be written";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, after_help = EXIT_CODES)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// File or directory to back up
    #[arg(long, value_name = "PATH", required_unless_present = "restore")]
    source: Option<PathBuf>,

    /// Directory receiving the artifacts
    #[arg(long, value_name = "PATH", required_unless_present = "restore")]
    dest: Option<PathBuf>,

    /// Write a zstd-compressed tar archive instead of a plain copy
    #[arg(long, conflicts_with = "no_compress")]
    compress: bool,

    /// Write a plain copy (default)
    #[arg(long)]
    no_compress: bool,

    /// Extra attempts after the first one (overrides config)
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Artifacts to keep for this source (overrides config)
    #[arg(long, value_name = "N")]
    keep: Option<usize>,

    /// Operation log location (overrides config and BACKUP_LOG_FILE)
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Restore an artifact and verify it instead of backing up
    #[arg(long, requires_all = ["backup", "target"], conflicts_with_all = ["source", "dest"])]
    restore: bool,

    /// Artifact to restore
    #[arg(long, value_name = "PATH", requires = "restore")]
    backup: Option<PathBuf>,

    /// Directory to restore into
    #[arg(long, value_name = "PATH", requires = "restore")]
    target: Option<PathBuf>,
}

impl Args {
    fn mode(&self) -> CompressionMode {
        CompressionMode::from_flag(self.compress && !self.no_compress)
    }

    /// Command-line values win over the file and the environment.
    fn apply_overrides(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries.saturating_add(1);
        }
        if let Some(keep) = self.keep {
            config.retention.keep = keep;
        }
        if let Some(log_file) = &self.log_file {
            config.log.audit_log = log_file.clone();
        }
        config.validate()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let code = if e.use_stderr() { exit_code::USAGE } else { exit_code::SUCCESS };
            let _ = e.print();
            return exit(code);
        }
    };

    match run(args).await {
        Ok(code) => exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit(exit_code::USAGE)
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(args: Args) -> anyhow::Result<i32> {
    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply_overrides(&mut config)?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting backup-validator v{} (log: {})",
        env!("CARGO_PKG_VERSION"),
        config.log.audit_log.display()
    );

    let notifier = AlertDispatcher::from_config(&config.alert)?;
    let runner = BackupRunner::new(config, notifier);

    let result = if args.restore {
        match (&args.backup, &args.target) {
            (Some(backup), Some(target)) => runner.run_restore(backup, target).await,
            _ => anyhow::bail!("--restore needs --backup and --target"),
        }
    } else {
        match (&args.source, &args.dest) {
            (Some(source), Some(dest)) => runner.run_backup(source, dest, args.mode()).await,
            _ => anyhow::bail!("--source and --dest are required"),
        }
    };

    match result {
        Ok(outcome) => {
            println!("{}", summary(&outcome));
            Ok(outcome.status.exit_code())
        }
        Err(BackupError::LogWrite(message)) => {
            eprintln!("Operation log write failed: {}", message);
            Ok(exit_code::LOG_WRITE)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(exit_code::IO_ERROR)
        }
    }
}

/// One line for the console; the details live in the operation log.
fn summary(outcome: &OperationOutcome) -> String {
    let artifact = outcome
        .artifact
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "-".to_string());
    let digest = outcome
        .final_attempt()
        .and_then(|r| r.artifact_digest)
        .map(|d| d.to_hex())
        .unwrap_or_default();
    let took = format_duration(outcome.duration);

    match (outcome.operation.as_str(), outcome.is_success()) {
        ("backup", true) => format!(
            "Backup verified successfully: {} (sha256 {}, {} attempt(s), {})",
            artifact,
            short_digest(&digest),
            outcome.attempt_count(),
            took
        ),
        ("restore", true) => format!(
            "Restore verified: {} (sha256 {}, {})",
            artifact,
            short_digest(&digest),
            took
        ),
        _ => format!("{}: {}", outcome.status, outcome.message),
    }
}

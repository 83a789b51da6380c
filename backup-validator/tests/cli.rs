//! Exit codes and console output of the `backup-validator` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cli(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("backup-validator").unwrap();
    cmd.current_dir(temp.path())
        .env_remove("BACKUP_WEBHOOK_URL")
        .env_remove("BACKUP_ALERT_EMAIL")
        .env_remove("BACKUP_LOG_FILE")
        .env("RUST_LOG", "warn");
    cmd
}

fn source_dir(root: &Path) -> std::path::PathBuf {
    let source = root.join("photos");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("a.jpg"), b"not really a jpeg").unwrap();
    fs::write(source.join("b.jpg"), b"neither is this").unwrap();
    source
}

#[test]
fn test_successful_backup_exits_zero() {
    let temp = TempDir::new().unwrap();
    let source = source_dir(temp.path());

    cli(&temp)
        .arg("--source")
        .arg(&source)
        .arg("--dest")
        .arg(temp.path().join("out"))
        .arg("--compress")
        .arg("--log-file")
        .arg(temp.path().join("log.csv"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Backup verified successfully:"));

    let log = fs::read_to_string(temp.path().join("log.csv")).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.contains(",SUCCESS,"));
}

#[test]
fn test_default_log_location() {
    let temp = TempDir::new().unwrap();
    let source = source_dir(temp.path());

    cli(&temp)
        .arg("--source")
        .arg(&source)
        .arg("--dest")
        .arg(temp.path().join("out"))
        .assert()
        .success();

    assert!(temp.path().join("logs/backup_log.csv").is_file());
}

#[test]
fn test_missing_source_exits_with_io_error() {
    let temp = TempDir::new().unwrap();

    cli(&temp)
        .arg("--source")
        .arg(temp.path().join("nope"))
        .arg("--dest")
        .arg(temp.path().join("out"))
        .assert()
        .code(3)
        .stdout(predicate::str::contains("IO_ERROR"));
}

#[test]
fn test_exhausted_retries_exit_with_two() {
    let temp = TempDir::new().unwrap();
    let source = source_dir(temp.path());
    let out = temp.path().join("out");

    // Trial extraction needs a scratch directory; a regular file cannot be one
    let blocker = temp.path().join("scratch-is-a-file");
    fs::write(&blocker, b"").unwrap();
    let config = temp.path().join("config.toml");
    fs::write(
        &config,
        format!(
            "[retry]\ndelay_secs = 0\n\n[archive]\nscratch_dir = '{}'\n",
            blocker.display()
        ),
    )
    .unwrap();

    cli(&temp)
        .arg("--config")
        .arg(&config)
        .arg("--source")
        .arg(&source)
        .arg("--dest")
        .arg(&out)
        .arg("--compress")
        .arg("--retries")
        .arg("1")
        .arg("--log-file")
        .arg(temp.path().join("log.csv"))
        .assert()
        .code(2)
        .stdout(predicate::str::starts_with("FAILED_AFTER_RETRIES: Backup failed after 2 attempt(s)"));

    let log = fs::read_to_string(temp.path().join("log.csv")).unwrap();
    assert!(log.contains(",FAILED_AFTER_RETRIES,2,"));
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_missing_arguments_are_usage_errors() {
    let temp = TempDir::new().unwrap();

    cli(&temp).arg("--source").arg("x").assert().code(1);
    cli(&temp).arg("--restore").arg("--backup").arg("x").assert().code(1);
}

#[test]
fn test_invalid_keep_is_a_configuration_error() {
    let temp = TempDir::new().unwrap();
    let source = source_dir(temp.path());

    cli(&temp)
        .arg("--source")
        .arg(&source)
        .arg("--dest")
        .arg(temp.path().join("out"))
        .arg("--keep")
        .arg("0")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("retention.keep"));
}

#[test]
fn test_restore_round_trip_and_mismatch_codes() {
    let temp = TempDir::new().unwrap();
    let source = source_dir(temp.path());
    let out = temp.path().join("out");

    cli(&temp)
        .arg("--source")
        .arg(&source)
        .arg("--dest")
        .arg(&out)
        .arg("--compress")
        .assert()
        .success();

    let artifact = fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.to_string_lossy().ends_with(".tar.zst"))
        .unwrap();

    cli(&temp)
        .arg("--restore")
        .arg("--backup")
        .arg(&artifact)
        .arg("--target")
        .arg(temp.path().join("restore"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with("Restore verified:"));

    // Same target again: the restored tree already exists
    cli(&temp)
        .arg("--restore")
        .arg("--backup")
        .arg(&artifact)
        .arg("--target")
        .arg(temp.path().join("restore"))
        .assert()
        .code(5);

    let mut bytes = fs::read(&artifact).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&artifact, &bytes).unwrap();

    cli(&temp)
        .arg("--restore")
        .arg("--backup")
        .arg(&artifact)
        .arg("--target")
        .arg(temp.path().join("restore-2"))
        .assert()
        .code(4)
        .stdout(predicate::str::contains("RESTORE_MISMATCH"));
}

#[test]
fn test_help_lists_exit_codes() {
    let temp = TempDir::new().unwrap();

    cli(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Exit codes:"));
}

//! End-to-end CLI tests for the mediaflow binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command running inside `temp` with all data kept under `temp/data`.
fn mediaflow(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("mediaflow").expect("Failed to find binary");
    cmd.current_dir(temp.path())
        .env_remove("RUST_LOG")
        .arg("--data-dir")
        .arg(temp.path().join("data"));
    cmd
}

// ==================== Usage ====================

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("mediaflow").expect("Failed to find binary");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolve, download, convert"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("mediaflow").expect("Failed to find binary");
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mediaflow"));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let mut cmd = Command::cargo_bin("mediaflow").expect("Failed to find binary");
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_history_rejects_oversized_page() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .args(["history", "--size", "101"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("101"));
}

// ==================== Commands ====================

#[test]
fn test_formats_lists_audio_codecs_for_music() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .args(["formats", "music"])
        .assert()
        .success()
        .stdout(predicate::str::contains("mp3").and(predicate::str::contains("mp4").not()));
}

#[test]
fn test_submit_search_term_prints_pending_job() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .args(["submit", "Show Name S01E02", "--format", "mkv"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\"").and(predicate::str::contains("\"mkv\"")));

    mediaflow(&temp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"pending\""));
}

#[test]
fn test_submit_unclassifiable_source_is_validation_error() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .args(["submit", "single"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[validation]"));
}

#[test]
fn test_submit_traversing_output_dir_is_security_error() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .args(["submit", "Some Film 2020", "--output-dir", "/srv/../etc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[security]"));

    mediaflow(&temp)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("pending").not());
}

#[test]
fn test_status_of_unknown_job_is_not_found() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .args(["status", "no-such-job"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[not_found]"));
}

#[test]
fn test_stats_reports_totals() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    mediaflow(&temp)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"total_jobs\": 0"));
}

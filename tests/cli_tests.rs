//! Integration tests for the command-line surface

use predicates::prelude::*;

#[test]
fn test_no_arguments_is_usage_error() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");

    cmd.assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_missing_duration_is_usage_error() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("1234");

    cmd.assert().failure().code(2);
}

#[test]
fn test_help_lists_options() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("<PID>"))
        .stdout(predicate::str::contains("<SECONDS>"))
        .stdout(predicate::str::contains("--interval-ms"))
        .stdout(predicate::str::contains("--format"));
}

#[test]
fn test_invalid_pid() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("not_a_number").arg("1");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid digit found in string"));
}

#[test]
fn test_zero_interval_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("--interval-ms").arg("0").arg("1234").arg("1");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--interval-ms"));
}

#[test]
fn test_unknown_format_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("--format").arg("xml").arg("1234").arg("1");

    cmd.assert().failure().code(2);
}

#[test]
fn test_nonexistent_pid() {
    // PIDs are capped far below this on Linux
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("99999999").arg("1");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "[stacksampler: sampling 99999999 every 10ms for 100 rounds]",
        ))
        .stderr(predicate::str::contains("Sampling process 99999999 failed"));
}

#[test]
fn test_nonexistent_pid_zero_duration() {
    // No rounds run, but symbol loading still needs the process
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("99999999").arg("0");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Cannot load symbols of process 99999999"));
}

#[test]
fn test_status_line_reflects_interval() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("stacksampler");
    cmd.arg("--interval-ms").arg("250").arg("99999999").arg("2");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("every 250ms for 8 rounds"));
}

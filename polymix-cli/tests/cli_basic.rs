use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn no_arguments_prints_help() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pmx"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_the_mixing_options() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pmx"));
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--loops"))
        .stdout(predicate::str::contains("--gain"))
        .stdout(predicate::str::contains("--frequency"))
        .stdout(predicate::str::contains("--buffer"));
}

#[test]
fn missing_file_exits_nonzero() {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pmx"));
    cmd.args(["--quiet", "no-such-file.wav"])
        .assert()
        .failure();
}

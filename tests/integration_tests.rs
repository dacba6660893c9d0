use assert_cmd::Command;
use predicates::str::contains;

#[test]
fn runs_without_arguments() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.assert().success();
}

#[test]
fn putc_writes_single_char() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg("tests/files/putc.s").arg("--minimal");

    cmd.assert().success().stdout("A");
}

#[test]
fn run_dumps_final_registers() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg("tests/files/putc.s");

    cmd.assert()
        .success()
        .stdout(contains("Final register values:"))
        .stdout(contains("r0 = 65"))
        .stdout(contains("apsr = 0"));
}

#[test]
fn prints_string_from_rodata() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg("tests/files/hello.s").arg("--minimal");

    cmd.assert().success().stdout("Hi\n");
}

#[test]
fn subroutine_result_survives_stack_roundtrip() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("run").arg("tests/files/square.s");

    cmd.assert().success().stdout(contains("r0 = 49"));
}

#[test]
fn check_reports_success() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("check").arg("tests/files/hello.s");

    cmd.assert().success().stdout(contains("no errors found!"));
}

#[test]
fn check_rejects_undefined_label() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("check").arg("tests/files/undefined_label.s");

    cmd.assert().failure().stderr(contains("nowhere"));
}

#[test]
fn bare_path_runs_directly() {
    let mut cmd = Command::cargo_bin("braid").unwrap();
    cmd.arg("tests/files/putc.s");

    cmd.assert().success().stdout(contains("r0 = 65"));
}

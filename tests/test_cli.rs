//! End-to-end tests for the `posh` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn posh() -> Command {
    let mut cmd = Command::cargo_bin("posh").unwrap();
    cmd.env("POSH_HISTFILE", "").env_remove("POSH_LOG");
    cmd
}

#[test]
fn test_command_string() {
    posh().args(["-c", "echo hi"]).assert().success().stdout("hi\n");
}

#[test]
fn test_command_string_name_and_args() {
    posh()
        .args(["-c", "echo $0 $# $2", "prog", "a", "b"])
        .assert()
        .success()
        .stdout("prog 2 b\n");
}

#[test]
fn test_exit_status_propagates() {
    posh().args(["-c", "exit 7"]).assert().code(7);
    posh().args(["-c", "false"]).assert().code(1);
    posh().args(["-c", "exit 300"]).assert().code(44);
}

#[test]
fn test_syntax_error_in_command_string() {
    posh()
        .args(["-c", "echo ok; if"])
        .assert()
        .code(2)
        .stdout("")
        .stderr(predicate::str::contains("syntax error"));
}

#[test]
fn test_script_file_with_args() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("greet.sh");
    std::fs::write(&script, "for name in \"$@\"; do\n  echo \"hello $name\"\ndone\nexit 3\n").unwrap();
    posh()
        .arg(&script)
        .args(["ana", "bo"])
        .assert()
        .code(3)
        .stdout("hello ana\nhello bo\n");
}

#[test]
fn test_script_keeps_going_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("s.sh");
    std::fs::write(&script, "no-such-command-posh\necho still here\n").unwrap();
    posh()
        .arg(&script)
        .assert()
        .success()
        .stdout("still here\n")
        .stderr(predicate::str::contains("no-such-command-posh: command not found"));
}

#[test]
fn test_missing_script() {
    posh()
        .arg("/nonexistent/script.sh")
        .assert()
        .code(127)
        .stderr(predicate::str::contains("No such file or directory"));
}

#[test]
fn test_stdin_script() {
    posh()
        .args(["-s", "x", "y"])
        .write_stdin("echo $1-$2\nexit 5\n")
        .assert()
        .code(5)
        .stdout(predicate::str::starts_with("x-y\n"));
}

#[test]
fn test_piped_stdin_without_flag() {
    posh()
        .write_stdin("a=1\nb=$((a + 1))\necho $b\n")
        .assert()
        .success()
        .stdout("2\n");
}

#[test]
fn test_errexit_flag() {
    posh()
        .args(["-e", "-c", "echo one; false; echo two"])
        .assert()
        .code(1)
        .stdout("one\n");
}

#[test]
fn test_nounset_flag() {
    posh()
        .args(["-u", "-c", "echo $missing; echo after"])
        .assert()
        .success()
        .stdout("after\n")
        .stderr(predicate::str::contains("missing: unbound variable"));

    posh()
        .args(["-eu", "-c", "echo $missing; echo after"])
        .assert()
        .code(1)
        .stdout("");
}

#[test]
fn test_xtrace_flag() {
    posh()
        .args(["-x", "-c", "v=1; echo $v"])
        .assert()
        .success()
        .stdout("1\n")
        .stderr(predicate::str::contains("+ echo 1"));
}

#[test]
fn test_version_and_help() {
    posh()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("posh "));
    posh()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("USAGE"));
}

#[test]
fn test_invalid_option() {
    posh()
        .arg("-q")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("-q: invalid option"));
}

#[test]
fn test_exported_variables_reach_children() {
    posh()
        .args(["-c", "export GREETING=hey; sh -c 'echo $GREETING'"])
        .assert()
        .success()
        .stdout("hey\n");
}

#[test]
fn test_cd_applies_to_children() {
    let dir = tempfile::tempdir().unwrap();
    let canonical = dir.path().canonicalize().unwrap();
    posh()
        .args(["-c", "cd \"$1\" && pwd -P && /bin/pwd", "posh"])
        .arg(&canonical)
        .assert()
        .success()
        .stdout(format!("{0}\n{0}\n", canonical.display()));
}

#[test]
fn test_deep_recursion_hits_the_limit() {
    let src = "f() { if [ $1 -gt 0 ]; then f $(($1 - 1)); fi; }; f 1500; echo status $?";
    posh()
        .args(["-c", src])
        .assert()
        .success()
        .stdout("status 1\n")
        .stderr(predicate::str::contains("maximum function nesting level exceeded (1000)"));
}

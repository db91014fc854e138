//! Integration tests for background jobs

#[path = "common/mod.rs"]
mod common;
use common::{run, stdout, Shell};

use std::thread::sleep;
use std::time::{Duration, Instant};

/// Run `jobs` until its output contains `wanted`
fn jobs_until(shell: &mut Shell, wanted: &str) -> String {
    let mut listing = String::new();
    for _ in 0..100 {
        listing = shell.capture("jobs").unwrap().stdout;
        if listing.contains(wanted) {
            break;
        }
        sleep(Duration::from_millis(20));
    }
    listing
}

#[test]
fn test_background_job_is_listed() {
    let mut shell = Shell::new();
    let result = shell.capture("sleep 5 & jobs").unwrap();
    assert!(result.stdout.contains("Running"));
    assert!(result.stdout.contains("sleep 5"));
    assert_eq!(shell.jobs().list().len(), 1);

    let result = shell.capture("kill %1; wait %1; echo $?").unwrap();
    assert_eq!(result.stdout, "143\n");
}

#[test]
fn test_last_background_pid() {
    let result = run("sleep 0 & pid=$!; wait $pid; echo ${pid:+set}");
    assert_eq!(result.stdout, "set\n");
}

#[test]
fn test_wait_for_all() {
    assert_eq!(stdout("sleep 0.1 & sleep 0.1 & wait; echo $?"), "0\n");
}

#[test]
fn test_background_subshell_status() {
    assert_eq!(stdout("{ sleep 0.05; exit 9; } & wait $!; echo $?"), "9\n");
}

#[test]
fn test_background_does_not_change_shell() {
    assert_eq!(stdout("x=1; x=2 & wait; echo $x"), "1\n");
}

#[test]
fn test_reap_reports_finished_jobs() {
    let mut shell = Shell::new();
    shell.capture("sh -c 'exit 2' &").unwrap();
    let mut notes = Vec::new();
    for _ in 0..50 {
        notes = shell.reap_jobs();
        if !notes.is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
    assert_eq!(notes.len(), 1);
    assert!(notes[0].contains("Exit 2"));
    assert!(shell.jobs().list().is_empty());
}

#[test]
fn test_job_spec_errors() {
    let result = run("fg %9");
    assert_eq!(result.status, 1);
    assert!(result.stderr.contains("fg"));
    let result = run("wait 999999");
    assert_eq!(result.status, 127);
}

#[test]
fn test_kill_bad_signal() {
    let result = run("kill -NOPE 1");
    assert_eq!(result.status, 1);
    assert!(result.stderr.contains("invalid signal specification"));
}

#[test]
fn test_kill_pid() {
    let result = run("sleep 5 & kill -TERM $!; wait $!; echo $?");
    assert_eq!(result.stdout, "143\n");
}

#[test]
fn test_background_job_lifecycle() {
    let mut shell = Shell::new();
    let started = Instant::now();
    shell.capture("sleep 1 &").unwrap();
    assert!(started.elapsed() < Duration::from_millis(800));

    let listing = shell.capture("jobs").unwrap().stdout;
    assert!(listing.contains("Running"));
    assert!(!listing.contains("Done"));

    sleep(Duration::from_millis(1200));
    let listing = shell.capture("jobs").unwrap().stdout;
    assert!(listing.contains("Done"));
    assert!(listing.contains("sleep 1"));
    assert!(shell.jobs().list().is_empty());
}

#[test]
fn test_fg_waits_and_removes_job() {
    let mut shell = Shell::new();
    let result = shell.capture("sh -c 'sleep 0.2; exit 4' & fg %1; echo $?").unwrap();
    assert_eq!(result.stdout, "sh -c 'sleep 0.2; exit 4'\n4\n");
    assert!(shell.jobs().list().is_empty());
}

#[test]
fn test_bg_resumes_stopped_job() {
    let mut shell = Shell::new();
    shell.capture("sleep 5 & kill -STOP %1").unwrap();
    let listing = jobs_until(&mut shell, "Stopped");
    assert!(listing.contains("Stopped"), "{}", listing);

    let result = shell.capture("bg %1").unwrap();
    assert_eq!(result.stdout, "[1]+ sleep 5 &\n");
    assert_eq!(result.status, 0);
    assert!(shell.capture("jobs").unwrap().stdout.contains("Running"));

    // A still-stopped job would hold the TERM until it was continued
    let result = shell.capture("kill %1; wait %1; echo $?").unwrap();
    assert_eq!(result.stdout, "143\n");
}

//! Integration tests for redirections, here-documents and pipelines

#[path = "common/mod.rs"]
mod common;
use common::{quote, run, stdout, Shell};

fn shell_in(dir: &std::path::Path) -> Shell {
    let mut shell = Shell::new();
    shell.capture(&format!("cd {}", quote(dir))).unwrap();
    shell
}

#[test]
fn test_truncate_and_append() {
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    shell.capture("echo a > f; echo b >> f; echo c >> f").unwrap();
    assert_eq!(std::fs::read_to_string(dir.path().join("f")).unwrap(), "a\nb\nc\n");
    shell.capture("echo fresh > f").unwrap();
    assert_eq!(std::fs::read_to_string(dir.path().join("f")).unwrap(), "fresh\n");
}

#[test]
fn test_stderr_redirections() {
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    let result = shell.capture("no-such-cmd-posh 2> err; echo $?").unwrap();
    assert_eq!(result.stdout, "127\n");
    assert_eq!(result.stderr, "");
    let err = std::fs::read_to_string(dir.path().join("err")).unwrap();
    assert!(err.contains("command not found"));

    shell.capture("{ echo out; echo err >&2; } &> both").unwrap();
    assert_eq!(std::fs::read_to_string(dir.path().join("both")).unwrap(), "out\nerr\n");
}

#[test]
fn test_redirect_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    // 2>&1 before >file still points stderr at the old stdout
    let result = shell.capture("{ echo o; echo e >&2; } 2>&1 > file").unwrap();
    assert_eq!(result.stdout, "e\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("file")).unwrap(), "o\n");
}

#[test]
fn test_failed_redirect_skips_command() {
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    let result = shell.capture("echo never > missing/dir/file; echo $?").unwrap();
    assert_eq!(result.stdout, "1\n");
    assert!(result.stderr.contains("No such file or directory"));
}

#[test]
fn test_noclobber() {
    let dir = tempfile::tempdir().unwrap();
    let mut shell = shell_in(dir.path());
    let result = shell.capture("echo 1 > f; set -C; echo 2 > f; echo $?; echo 3 >| f; cat f").unwrap();
    assert_eq!(result.stdout, "1\n3\n");
    assert!(result.stderr.contains("cannot overwrite existing file"));
}

#[test]
fn test_unsupported_fd() {
    let result = run("echo x 3> /dev/null");
    assert_eq!(result.status, 1);
    assert!(!result.stderr.is_empty());
}

#[test]
fn test_heredoc_strip_tabs() {
    let src = "cat <<-END\n\tindented\n\t\tmore\n\tEND\necho done";
    assert_eq!(stdout(src), "indented\nmore\ndone\n");
}

#[test]
fn test_two_heredocs_on_one_line() {
    let src = "cat <<A; cat <<B\nfirst\nA\nsecond\nB";
    assert_eq!(stdout(src), "first\nsecond\n");
}

#[test]
fn test_heredoc_into_function() {
    let src = "count() { n=0; while read l; do n=$((n+1)); done; echo $n; }\ncount <<EOF\na\nb\nc\nEOF";
    assert_eq!(stdout(src), "3\n");
}

#[test]
fn test_here_string() {
    assert_eq!(stdout("read a b <<< 'x y'; echo $b$a"), "yx\n");
    assert_eq!(stdout("tr a-z A-Z <<< shout"), "SHOUT\n");
}

#[test]
fn test_mixed_pipeline() {
    let src = "f() { echo one; echo two; echo three; }; f | grep t | { while read l; do echo \"<$l>\"; done; }";
    assert_eq!(stdout(src), "<two>\n<three>\n");
}

#[test]
fn test_pipeline_status() {
    let result = run("true | false");
    assert_eq!(result.status, 1);
    assert_eq!(stdout("sh -c 'exit 3' | true; echo ${PIPESTATUS[0]}"), "3\n");
}

#[test]
fn test_pipe_stderr() {
    let result = run("{ echo out; echo err >&2; } |& sort");
    assert_eq!(result.stdout, "err\nout\n");
    assert_eq!(result.stderr, "");
}

#[test]
fn test_large_output_through_pipe() {
    let src = "i=0; while [ $i -lt 2000 ]; do echo line$i; i=$((i+1)); done | wc -l";
    assert_eq!(stdout(src).trim(), "2000");
}

#[test]
fn test_pipeline_stage_is_isolated() {
    assert_eq!(stdout("x=1; echo | x=2; echo $x"), "1\n");
}

#[test]
fn test_endless_producer_stops_with_reader() {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let mut shell = Shell::new();
        let loops = shell
            .capture("while true; do echo y; done | head -1; echo ${PIPESTATUS[0]}")
            .unwrap();
        let function = shell
            .capture("f() { while :; do echo f; done; }; f | head -n 2")
            .unwrap();
        let _ = tx.send((loops.stdout, function.stdout));
    });
    let (loops, function) = rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("pipeline did not finish");
    assert_eq!(loops, "y\n141\n");
    assert_eq!(function, "f\nf\n");
}

#[test]
fn test_forked_stage_stderr_is_captured() {
    let result = run("{ echo oops >&2; echo data; } | cat");
    assert_eq!(result.stdout, "data\n");
    assert!(result.stderr.contains("oops"));
    assert_eq!(stdout("false | cat; echo ${PIPESTATUS[0]}"), "1\n");
}

#[test]
fn test_function_between_external_stages() {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let result = run("f() { while read l; do echo \"<$l>\"; done; }\ncat <<E | f | cat\none\ntwo\nE\n");
        let _ = tx.send(result.stdout);
    });
    let out = rx
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("pipeline did not finish");
    assert_eq!(out, "<one>\n<two>\n");
}

//! Integration tests for control flow and functions

#[path = "common/mod.rs"]
mod common;
use common::{run, status, stdout};

#[test]
fn test_nested_loops_with_continue_n() {
    let src = "for a in 1 2; do for b in 1 2 3; do [ $b = 2 ] && continue 2; echo $a$b; done; done";
    assert_eq!(stdout(src), "11\n21\n");
}

#[test]
fn test_while_with_break_status() {
    let src = "n=0; while true; do n=$((n+1)); [ $n -ge 5 ] && break; done; echo $n";
    assert_eq!(stdout(src), "5\n");
}

#[test]
fn test_for_without_in_uses_positionals() {
    assert_eq!(stdout("set -- x y; for v; do echo $v; done"), "x\ny\n");
}

#[test]
fn test_loop_status() {
    assert_eq!(status("for i in; do false; done"), 0);
    assert_eq!(status("for i in 1; do false; done"), 1);
}

#[test]
fn test_case_patterns() {
    let src = r#"
classify() {
    case "$1" in
        [0-9]*) echo number ;;
        *.txt|*.md) echo doc ;;
        "") echo empty ;;
        *) echo other ;;
    esac
}
classify 42; classify notes.md; classify ""; classify x
"#;
    assert_eq!(stdout(src), "number\ndoc\nempty\nother\n");
}

#[test]
fn test_case_continue_terminator() {
    let src = "case abc in a*) echo a ;;& *c) echo c ;; *) echo never ;; esac";
    assert_eq!(stdout(src), "a\nc\n");
}

#[test]
fn test_case_quoted_pattern_is_literal() {
    assert_eq!(stdout("case '*' in '*') echo star ;; esac"), "star\n");
    assert_eq!(stdout("case x in '*') echo star ;; *) echo any ;; esac"), "any\n");
}

#[test]
fn test_function_keyword_form() {
    assert_eq!(stdout("function hi { echo hi $1; }; hi there"), "hi there\n");
}

#[test]
fn test_recursive_function() {
    let src = "fact() { if [ $1 -le 1 ]; then echo 1; else echo $(( $1 * $(fact $(( $1 - 1 ))) )); fi; }; fact 5";
    assert_eq!(stdout(src), "120\n");
}

#[test]
fn test_function_redirection() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("out");
    let src = format!("f() {{ echo inside; }} > '{}'; f; cat '{}'", file.display(), file.display());
    assert_eq!(stdout(&src), "inside\n");
}

#[test]
fn test_brace_group_shares_state() {
    assert_eq!(stdout("{ x=1; }; echo $x"), "1\n");
    assert_eq!(stdout("(y=1); echo \"[$y]\""), "[]\n");
}

#[test]
fn test_errexit_in_function() {
    let src = "set -e; f() { false; echo unreachable; }; f; echo after";
    let result = run(src);
    assert_eq!(result.stdout, "");
    assert_eq!(result.status, 1);
}

#[test]
fn test_errexit_ignores_until_condition() {
    let src = "set -e; n=0; until [ $n -ge 2 ]; do n=$((n+1)); done; echo $n";
    assert_eq!(stdout(src), "2\n");
}

#[test]
fn test_errexit_and_or_tail() {
    // Only the final element of a chain can trigger the abort
    let result = run("set -e; true && false; echo after");
    assert_eq!(result.stdout, "");
    assert_eq!(result.status, 1);
}

#[test]
fn test_errexit_in_subshell() {
    let result = run("set -e; (false; echo inner); echo $?");
    assert_eq!(result.stdout, "");
    assert_eq!(result.status, 1);
}

#[test]
fn test_exit_in_subshell_only_leaves_it() {
    assert_eq!(stdout("(exit 3); echo $?; echo alive"), "3\nalive\n");
}

#[test]
fn test_return_from_sourced_file() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.sh");
    std::fs::write(&lib, "echo in\nreturn 2\necho skipped\n").unwrap();
    let src = format!("source '{}'; echo $?", lib.display());
    assert_eq!(stdout(&src), "in\n2\n");
}

#[test]
fn test_source_passes_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("args.sh");
    std::fs::write(&lib, "echo $# $1\n").unwrap();
    let src = format!("set -- outer; . '{}' a b; echo $1", lib.display());
    assert_eq!(stdout(&src), "2 a\nouter\n");
}

#[test]
fn test_arith_command_and_for() {
    let src = "total=0; for ((i = 1; i <= 4; i++)); do ((total += i)); done; echo $total";
    assert_eq!(stdout(src), "10\n");
}

#[test]
fn test_eval_defines_functions() {
    assert_eq!(stdout("eval 'g() { echo from eval; }'; g"), "from eval\n");
}

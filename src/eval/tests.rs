use super::*;

fn run(src: &str) -> Captured {
    let mut shell = Shell::new();
    shell.capture(src).unwrap()
}

fn out(src: &str) -> String {
    run(src).stdout
}

#[test]
fn test_echo_and_status() {
    let result = run("echo hello world");
    assert_eq!(result.stdout, "hello world\n");
    assert_eq!(result.status, 0);
    assert_eq!(run("false").status, 1);
    assert_eq!(out("false; echo $?"), "1\n");
}

#[test]
fn test_echo_flags() {
    assert_eq!(out("echo -n a; echo b"), "ab\n");
    assert_eq!(out(r"echo -e 'a\tb'"), "a\tb\n");
    assert_eq!(out(r"echo -e 'x\cy'; echo z"), "xz\n");
    assert_eq!(out("echo -x"), "-x\n");
}

#[test]
fn test_variables_and_quoting() {
    assert_eq!(out("x=1; y=\"$x 2\"; echo \"$y\""), "1 2\n");
    assert_eq!(out("x='a  b'; echo $x; echo \"$x\""), "a b\na  b\n");
    assert_eq!(out("echo '$HOME'"), "$HOME\n");
    assert_eq!(out("x=abc; x+=def; echo $x"), "abcdef\n");
}

#[test]
fn test_parameter_operators() {
    assert_eq!(out("echo ${unset:-default}"), "default\n");
    assert_eq!(out("v=path/to/file.txt; echo ${v##*/} ${v%.*}"), "file.txt path/to/file\n");
    assert_eq!(out("v=hello; echo ${#v}"), "5\n");
    assert_eq!(out("echo ${new:=set}; echo $new"), "set\nset\n");
}

#[test]
fn test_arithmetic() {
    assert_eq!(out("echo $((1 + 2 * 3))"), "7\n");
    assert_eq!(out("i=5; ((i++)); echo $i"), "6\n");
    assert_eq!(run("(( 0 ))").status, 1);
    assert_eq!(out("let 'x = 4 * 2'; echo $x"), "8\n");
    assert_eq!(run("let 0").status, 1);
}

#[test]
fn test_and_or_lists() {
    assert_eq!(out("true && echo yes || echo no"), "yes\n");
    assert_eq!(out("false && echo yes || echo no"), "no\n");
    assert_eq!(out("! true; echo $?"), "1\n");
}

#[test]
fn test_if_and_loops() {
    assert_eq!(out("if false; then echo a; elif true; then echo b; else echo c; fi"), "b\n");
    assert_eq!(out("for i in 1 2 3; do echo $i; done"), "1\n2\n3\n");
    assert_eq!(out("i=0; while [ $i -lt 3 ]; do i=$((i+1)); done; echo $i"), "3\n");
    assert_eq!(out("i=0; until [ $i -ge 2 ]; do i=$((i+1)); done; echo $i"), "2\n");
    assert_eq!(out("for ((i=0; i<3; i++)); do echo -n $i; done; echo"), "012\n");
}

#[test]
fn test_break_and_continue() {
    let src = "for i in 1 2 3 4; do
        if [ $i = 2 ]; then continue; fi
        if [ $i = 4 ]; then break; fi
        echo $i
    done";
    assert_eq!(out(src), "1\n3\n");

    let nested = "for a in x y; do for b in 1 2; do echo $a$b; break 2; done; done";
    assert_eq!(out(nested), "x1\n");
}

#[test]
fn test_loop_control_outside_loop() {
    let result = run("break; echo after");
    assert_eq!(result.stdout, "after\n");
    assert!(result.stderr.contains("only meaningful"));
}

#[test]
fn test_case() {
    let src = "for w in apple banana cherry; do
        case $w in
            a*) echo A ;;
            b*|c*) echo BC ;;
        esac
    done";
    assert_eq!(out(src), "A\nBC\nBC\n");
    assert_eq!(out("case x in x) echo one ;& y) echo two ;; esac"), "one\ntwo\n");
}

#[test]
fn test_functions_and_locals() {
    let src = "f() { local x=inner; echo $x $1; return 3; }
        x=outer; f arg; echo $? $x";
    assert_eq!(out(src), "inner arg\n3 outer\n");
    assert_eq!(out("g() { echo $#; }; g a b c"), "3\n");
}

#[test]
fn test_dynamic_scope() {
    let src = "inner() { echo $v; }; outer() { local v=dyn; inner; }; outer";
    assert_eq!(out(src), "dyn\n");
}

#[test]
fn test_return_outside_function() {
    let result = run("return 4");
    assert_eq!(result.status, 1);
    assert!(result.stderr.contains("return"));
}

#[test]
fn test_recursion_limit() {
    let mut shell = Shell::with_config(ShellConfig {
        max_recursion: 20,
        ..ShellConfig::default()
    });
    let result = shell.capture("f() { f; }; f").unwrap();
    assert_ne!(result.status, 0);
    assert!(result.stderr.contains("maximum function nesting level"));
}

#[test]
fn test_command_substitution() {
    assert_eq!(out("x=$(echo hi); echo \"[$x]\""), "[hi]\n");
    assert_eq!(out("echo `echo back`"), "back\n");
    assert_eq!(out("x=$(false); echo $?"), "1\n");
}

#[test]
fn test_subshell_isolation() {
    assert_eq!(out("x=1; (x=2; echo $x); echo $x"), "2\n1\n");
    assert_eq!(out("(exit 7); echo $?"), "7\n");
    assert_eq!(out("x=$(cd /; pwd); echo $x"), "/\n");
}

#[test]
fn test_internal_pipeline() {
    assert_eq!(out("echo abc | { read v; echo got $v; }"), "got abc\n");
    assert_eq!(out("false | true; echo ${PIPESTATUS[0]} ${PIPESTATUS[1]}"), "1 0\n");
}

#[test]
fn test_pipefail() {
    assert_eq!(run("false | true").status, 0);
    assert_eq!(run("set -o pipefail; false | true").status, 1);
}

#[test]
fn test_errexit() {
    let result = run("set -e; echo one; false; echo two");
    assert_eq!(result.stdout, "one\n");
    assert_eq!(result.status, 1);

    // Conditions and non-final and-or elements do not trigger it
    assert_eq!(out("set -e; if false; then :; fi; false || true; echo ok"), "ok\n");
    assert_eq!(out("set -e; ! true; echo ok"), "ok\n");
}

#[test]
fn test_nounset() {
    let result = run("set -u; echo $missing; echo after");
    assert_eq!(result.stdout, "after\n");
    assert!(result.stderr.contains("missing: unbound variable"));
    assert_eq!(result.status, 0);

    // The failed command still counts for errexit
    let result = run("set -eu; echo $missing; echo after");
    assert_eq!(result.stdout, "");
    assert_eq!(result.status, 1);
    assert_eq!(out("set -u; echo $missing; echo $?"), "1\n");
}

#[test]
fn test_xtrace() {
    let result = run("set -x; echo 'a b'");
    assert_eq!(result.stdout, "a b\n");
    assert!(result.stderr.contains("+ echo 'a b'"));
}

#[test]
fn test_set_positional() {
    assert_eq!(out("set -- a b c; echo $# $2; shift; echo $1"), "3 b\nb\n");
    assert_eq!(run("set -- a; shift 2").status, 1);
    assert_eq!(run("set -o nosuchoption").status, 2);
}

#[test]
fn test_special_parameters() {
    assert_eq!(out("set -- 'a b' c; for x in \"$@\"; do echo $x; done"), "a b\nc\n");
    assert_eq!(out("set -- a b; IFS=:; echo \"$*\""), "a:b\n");
    assert_eq!(out("set -e; echo $-"), "e\n");
}

#[test]
fn test_arrays() {
    assert_eq!(out("a=(x y z); echo ${a[1]} ${#a[@]}"), "y 3\n");
    assert_eq!(out("a=(x y); a+=(z); echo ${a[@]}"), "x y z\n");
    assert_eq!(out("a=(x y z); unset 'a[1]'; echo ${a[@]}"), "x z\n");
}

#[test]
fn test_readonly() {
    let result = run("readonly r=1; r=2; echo $r");
    assert!(result.stderr.contains("readonly"));
    assert_eq!(out("readonly r=1; r=2 2>/dev/null; echo $r"), "1\n");
}

#[test]
fn test_export_listing() {
    let listing = out("export FOO_TEST=bar; export");
    assert!(listing.contains("declare -x FOO_TEST=\"bar\""));
    let result = run("export 1bad=x");
    assert_eq!(result.status, 1);
    assert!(result.stderr.contains("not a valid identifier"));
}

#[test]
fn test_unset() {
    assert_eq!(out("x=1; unset x; echo \"[$x]\""), "[]\n");
    assert_eq!(out("f() { echo f; }; unset -f f; type f >/dev/null 2>&1; echo $?"), "1\n");
}

#[test]
fn test_declare() {
    assert_eq!(out("declare -i n=2+3; echo $n"), "5\n");
    assert_eq!(out("declare -p x 2>/dev/null; x='a\"b'; declare -p x"), "declare -- x=\"a\\\"b\"\n");
    assert_eq!(out("f() { declare v=in; }; v=out; f; echo $v"), "out\n");
    assert_eq!(out("f() { declare -g v=in; }; v=out; f; echo $v"), "in\n");
}

#[test]
fn test_local_outside_function() {
    let result = run("local x=1");
    assert_eq!(result.status, 1);
    assert!(result.stderr.contains("can only be used in a function"));
}

#[test]
fn test_eval() {
    assert_eq!(out("cmd='echo evaluated'; eval $cmd"), "evaluated\n");
    assert_eq!(out("eval 'x=5'; echo $x"), "5\n");
    assert_eq!(run("eval 'if'").status, 2);
}

#[test]
fn test_read() {
    let src = "printf 'one two three\\n' | { read a b; echo \"$a|$b\"; }";
    assert_eq!(out(src), "one|two three\n");
    assert_eq!(out("printf 'a\\\\b\\n' | { read -r x; echo \"$x\"; }"), "a\\b\n");
    assert_eq!(out("printf 'p q' | { read -a arr; echo ${arr[1]}; }"), "q\n");
    assert_eq!(out("printf 'no newline' | { read line; echo $? \"$line\"; }"), "1 no newline\n");
}

#[test]
fn test_read_loop_over_heredoc() {
    let src = "while read line; do echo \"<$line>\"; done <<EOF
first
second
EOF";
    assert_eq!(out(src), "<first>\n<second>\n");
}

#[test]
fn test_heredoc_expansion() {
    let src = "name=world\ncat <<EOF\nhello $name\nEOF\ncat <<'EOF'\nhello $name\nEOF";
    assert_eq!(out(src), "hello world\nhello $name\n");
}

#[test]
fn test_test_builtin() {
    assert_eq!(run("[ 1 -lt 2 ]").status, 0);
    assert_eq!(run("test abc = abd").status, 1);
    let result = run("[ 1 -lt 2");
    assert_eq!(result.status, 2);
    assert!(result.stderr.contains("missing `]'"));
}

#[test]
fn test_printf_builtin() {
    assert_eq!(out("printf '%s-%d\\n' a 1 b 2"), "a-1\nb-2\n");
    assert_eq!(out("printf -v v '%03d' 7; echo $v"), "007\n");
}

#[test]
fn test_cd_and_pwd() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().to_string_lossy().into_owned();
    std::fs::create_dir(dir.path().join("sub")).unwrap();

    let mut shell = Shell::new();
    let src = format!("cd {}; cd sub; cd ..; pwd; cd -", path);
    let result = shell.capture(&src).unwrap();
    assert_eq!(result.stdout, format!("{0}\n{0}/sub\n", path));
    assert_eq!(shell.cwd(), dir.path().join("sub"));
    assert_eq!(shell.get_variable("OLDPWD"), Some(path.clone()));

    let result = shell.capture("cd /nonexistent-posh-dir").unwrap();
    assert_eq!(result.status, 1);
    assert!(result.stderr.contains("No such file or directory"));
}

#[test]
fn test_redirections() {
    let dir = tempfile::tempdir().unwrap();
    let mut shell = Shell::new();
    let src = format!(
        "cd {}; echo one > f; echo two >> f; cat < f; echo err 1>&2; echo hidden 2>&1 >/dev/null",
        dir.path().display()
    );
    let result = shell.capture(&src).unwrap();
    assert_eq!(result.stdout, "one\ntwo\n");
    assert_eq!(result.stderr, "err\n");

    let result = shell.capture("set -C; echo three > f").unwrap();
    assert_eq!(result.status, 1);
    let result = shell.capture("echo four >| f; cat f").unwrap();
    assert_eq!(result.stdout, "four\n");
}

#[test]
fn test_missing_redirect_source() {
    let result = run("cat < /nonexistent-posh-file; echo $?");
    assert_eq!(result.stdout, "1\n");
    assert!(result.stderr.contains("No such file or directory"));
}

#[test]
fn test_command_not_found() {
    let result = run("no-such-command-posh");
    assert_eq!(result.status, 127);
    assert!(result.stderr.contains("no-such-command-posh: command not found"));
}

#[test]
fn test_external_pipeline() {
    assert_eq!(out("echo hello | tr a-z A-Z"), "HELLO\n");
    assert_eq!(out("printf 'b\\na\\n' | sort | head -n 1"), "a\n");
    assert_eq!(out("X=in_env sh -c 'echo $X'; echo \"[$X]\""), "in_env\n[]\n");
}

#[test]
fn test_globbing() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a.txt", "b.txt", "c.log"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }
    let mut shell = Shell::new();
    let src = format!("cd {}; echo *.txt; echo *.none; set -f; echo *.txt", dir.path().display());
    let result = shell.capture(&src).unwrap();
    assert_eq!(result.stdout, "a.txt b.txt\n*.none\n*.txt\n");
}

#[test]
fn test_source() {
    let dir = tempfile::tempdir().unwrap();
    let lib = dir.path().join("lib.sh");
    std::fs::write(&lib, "greet() { echo hi $1; }\nsourced=yes\nreturn 5\necho unreachable\n").unwrap();
    let mut shell = Shell::new();
    let result = shell
        .capture(&format!(". {}; echo $?; greet you; echo $sourced", lib.display()))
        .unwrap();
    assert_eq!(result.stdout, "5\nhi you\nyes\n");

    let result = shell.capture("source").unwrap();
    assert_eq!(result.status, 2);
}

#[test]
fn test_aliases() {
    let mut shell = Shell::new();
    shell.capture("alias say='echo said'").unwrap();
    assert_eq!(shell.capture("say it").unwrap().stdout, "said it\n");
    assert_eq!(shell.capture("alias say").unwrap().stdout, "alias say='echo said'\n");
    assert_eq!(shell.capture("unalias say; alias say").unwrap().status, 1);
}

#[test]
fn test_type() {
    let result = run("f() { :; }; type -t f echo if");
    assert_eq!(result.stdout, "function\nbuiltin\nkeyword\n");
    assert_eq!(run("type no-such-command-posh").status, 1);
}

#[test]
fn test_exit() {
    let result = run("echo before; exit 3; echo after");
    assert_eq!(result.stdout, "before\n");
    assert_eq!(result.status, 3);
    assert_eq!(run("exit 256").status, 0);
    let result = run("exit abc");
    assert_eq!(result.status, 2);
    assert!(result.stderr.contains("numeric argument required"));
}

#[test]
fn test_parse_error() {
    let mut shell = Shell::new();
    let err = shell.execute("if true; then").unwrap_err();
    assert!(matches!(err, ShellError::Parse(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(shell.last_status(), 2);
}

#[test]
fn test_stream_continues_after_syntax_error() {
    let mut shell = Shell::new();
    let (frame, stdout, _stderr) = IoFrame::captured();
    shell.base_io = frame;
    let script = "echo one\nfi\necho two\n";
    let status = shell.execute_stream(script.as_bytes()).unwrap();
    assert_eq!(status, 0);
    assert_eq!(String::from_utf8_lossy(&stdout.borrow()), "one\ntwo\n");
}

#[test]
fn test_registered_builtin() {
    let mut shell = Shell::new();
    shell.register_builtin("greet", |ctx: &mut BuiltinContext<'_>| -> Result<i32, BuiltinError> {
        let who = ctx.args.first().cloned().unwrap_or_default();
        ctx.variables.set("GREETED", &who)?;
        ctx.stdout.line(&format!("hello {}", who));
        Ok(0)
    });
    shell.register_builtin("fail", |_: &mut BuiltinContext<'_>| -> Result<i32, BuiltinError> {
        Err(BuiltinError::Failed("nope".to_string()))
    });
    let result = shell.capture("greet bob; echo $GREETED; fail").unwrap();
    assert_eq!(result.stdout, "hello bob\nbob\n");
    assert!(result.stderr.contains("fail: nope"));
    assert_eq!(result.status, 1);
}

#[test]
fn test_background_and_wait() {
    let result = run("sleep 0.1 & wait $!; echo $?");
    assert_eq!(result.stdout, "0\n");
    assert_eq!(run("(exit 4) & wait $!").status, 4);
}

#[test]
fn test_kill_list() {
    assert_eq!(out("kill -l 9"), "KILL\n");
    assert_eq!(out("kill -l 130"), "INT\n");
}

//! Integration tests for word expansion

#[path = "common/mod.rs"]
mod common;
use common::{quote, run, stdout, Shell};

#[test]
fn test_default_and_alternate() {
    assert_eq!(stdout("e=; echo ${e:-d} ${e-d}|"), "d |\n");
    assert_eq!(stdout("v=x; echo ${v:+alt} ${none:+alt}|"), "alt |\n");
}

#[test]
fn test_error_operator() {
    let result = run("echo ${need:?is required}; echo after");
    assert_eq!(result.stdout, "after\n");
    assert!(result.stderr.contains("need: is required"));

    let result = run("echo ${Z:?missing}; echo $?");
    assert_eq!(result.stdout, "1\n");
    assert!(result.stderr.contains("Z: missing"));

    let result = run("set -e; echo ${Z:?}; echo after");
    assert_eq!(result.stdout, "");
    assert!(result.stderr.contains("Z: parameter null or not set"));
    assert_eq!(result.status, 1);
}

#[test]
fn test_pattern_removal() {
    let src = "f=archive.tar.gz; echo ${f%.*} ${f%%.*} ${f#*.} ${f##*.}";
    assert_eq!(stdout(src), "archive.tar archive tar.gz gz\n");
}

#[test]
fn test_replacement() {
    assert_eq!(stdout("s=banana; echo ${s/an/AN} ${s//an/AN}"), "bANana bANANa\n");
    assert_eq!(stdout("s=banana; echo ${s/#ba/X} ${s/%na/Y}"), "Xnana banaY\n");
}

#[test]
fn test_substring() {
    assert_eq!(stdout("s=abcdef; echo ${s:2} ${s:1:3} ${s: -2}"), "cdef bcd ef\n");
}

#[test]
fn test_indirect_and_keys() {
    assert_eq!(stdout("target=value; ref=target; echo ${!ref}"), "value\n");
    assert_eq!(stdout("a=(x y z); echo ${!a[@]}"), "0 1 2\n");
}

#[test]
fn test_positional_parameters() {
    assert_eq!(stdout("set -- a b c d e f g h i j k; echo $1 ${10} ${11}"), "a j k\n");
    assert_eq!(stdout("set -- 'one two' three; echo $#; printf '[%s]' \"$@\"; echo"), "2\n[one two][three]\n");
    assert_eq!(stdout("set -- 'one two' three; printf '[%s]' $@; echo"), "[one][two][three]\n");
}

#[test]
fn test_field_splitting() {
    assert_eq!(stdout("v='a:b::c'; IFS=:; printf '<%s>' $v; echo"), "<a><b><><c>\n");
    assert_eq!(stdout("v='  lead  trail  '; printf '<%s>' $v; echo"), "<lead><trail>\n");
    assert_eq!(stdout("e=''; printf '<%s>' $e \"$e\"; echo"), "<>\n");
}

#[test]
fn test_arithmetic_forms() {
    assert_eq!(stdout("echo $((0x1f)) $((010)) $((2#101))"), "31 8 5\n");
    assert_eq!(stdout("echo $((2 ** 10)) $((7 % 3)) $((1 << 4))"), "1024 1 16\n");
    assert_eq!(stdout("x=3; echo $((x > 2 ? 10 : 20)) $((x += 4)) $x"), "10 7 7\n");
    assert_eq!(stdout("a=b; b=6; echo $((a * 2))"), "12\n");
}

#[test]
fn test_division_by_zero() {
    let result = run("echo $((1 / 0)); echo next");
    assert!(result.stderr.contains("division by 0"));
    assert_eq!(result.stdout, "next\n");
}

#[test]
fn test_tilde() {
    let mut shell = Shell::new();
    shell.set_variable("HOME", "/home/tester").unwrap();
    let result = shell.capture("echo ~ ~/docs \"~\" a~b").unwrap();
    assert_eq!(result.stdout, "/home/tester /home/tester/docs ~ a~b\n");
}

#[test]
fn test_nested_command_substitution() {
    assert_eq!(stdout("echo $(echo $(echo deep))"), "deep\n");
    assert_eq!(stdout("x=\"$(printf 'a\\n\\n\\n')\"; echo \"[$x]\""), "[a]\n");
}

#[test]
fn test_command_substitution_bodies() {
    assert_eq!(stdout("echo $(case a in a) echo matched;; esac)"), "matched\n");
    assert_eq!(stdout("x=$(cat <<E\nit's\nE\n)\necho \"$x\""), "it's\n");
    assert_eq!(stdout("echo $(echo hi # skip ) this\n)"), "hi\n");
}

#[test]
fn test_glob_in_directory() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["one.rs", "two.rs", "three.txt", ".hidden.rs"] {
        std::fs::write(dir.path().join(name), "").unwrap();
    }
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("inner.rs"), "").unwrap();

    let mut shell = Shell::new();
    let src = format!("cd {}; echo *.rs; echo */*.rs; echo t??.rs; echo '*.rs'", quote(dir.path()));
    let result = shell.capture(&src).unwrap();
    assert_eq!(result.stdout, "one.rs two.rs\nsub/inner.rs\ntwo.rs\n*.rs\n");
}

#[test]
fn test_absolute_glob() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.log"), "").unwrap();
    let result = run(&format!("echo {}/*.log", dir.path().display()));
    assert_eq!(result.stdout, format!("{}/a.log\n", dir.path().display()));
}

#[test]
fn test_special_variables() {
    let result = run("echo $$ $PPID");
    let fields: Vec<&str> = result.stdout.split_whitespace().collect();
    assert_eq!(fields.len(), 2);
    assert!(fields.iter().all(|f| f.parse::<u32>().is_ok()));
    assert_eq!(stdout("true; echo $?; false; echo $?"), "0\n1\n");
}

#[test]
fn test_ansi_c_quoting() {
    assert_eq!(stdout("printf '%s' $'a\\tb'; echo"), "a\tb\n");
}

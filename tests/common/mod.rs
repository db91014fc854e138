//! Common test utilities for posh integration tests

#[allow(unused_imports)]
pub use posh::{Captured, Shell, ShellError};

/// Run `src` in a fresh shell and return what it printed
#[allow(dead_code)]
pub fn run(src: &str) -> Captured {
    let mut shell = Shell::new();
    shell.capture(src).unwrap()
}

/// Stdout of `src` in a fresh shell
#[allow(dead_code)]
pub fn stdout(src: &str) -> String {
    run(src).stdout
}

/// Exit status of `src` in a fresh shell
#[allow(dead_code)]
pub fn status(src: &str) -> i32 {
    run(src).status
}

/// Single-quote a path for embedding in a script
#[allow(dead_code)]
pub fn quote(path: &std::path::Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

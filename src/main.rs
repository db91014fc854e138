//! posh - a POSIX-style shell
//!
//! Usage:
//!   posh                  Start an interactive shell
//!   posh -c "cmd"         Run a command string
//!   posh script.sh args   Run a script file

mod cli;
mod prompt;
mod rcfile;
mod repl;

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Diagnostics go to stderr, filtered by `POSH_LOG`
fn init_logging() {
    let filter = EnvFilter::try_from_env("POSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

/// Interpreter stack size. Each function nesting level costs a deep chain
/// of evaluator frames, and the default nesting limit must be reachable.
const INTERPRETER_STACK: usize = 128 * 1024 * 1024;

fn main() -> ExitCode {
    init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match cli::parse_args(&args) {
        Ok(cli) => cli,
        Err(message) => {
            eprintln!("posh: {}", message);
            cli::print_help();
            return ExitCode::from(2);
        }
    };
    let interpreter = std::thread::Builder::new()
        .name("posh".to_string())
        .stack_size(INTERPRETER_STACK)
        .spawn(move || cli::run(cli));
    match interpreter {
        // A panic has already been reported by the hook
        Ok(handle) => handle.join().unwrap_or_else(|_| ExitCode::from(101)),
        Err(e) => {
            eprintln!("posh: cannot start interpreter: {}", e);
            ExitCode::FAILURE
        }
    }
}

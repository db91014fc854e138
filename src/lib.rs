//! posh - a POSIX-style shell interpreter
//!
//! # Overview
//!
//! Source text goes through three stages:
//!
//! ```text
//! lexer::tokenize   text   -> tokens (words, operators, heredoc bodies)
//! parser::parse     tokens -> ast::List
//! eval::Shell       runs the list: expansion, redirection, processes
//! ```
//!
//! The [`Shell`] owns variables, functions, aliases and the job table.
//! External programs and pipelines run as real processes; built-ins,
//! functions and compound commands run in-process, snapshotting the shell
//! state wherever POSIX asks for a subshell.
//!
//! # Example
//!
//! ```no_run
//! use posh::Shell;
//!
//! let mut shell = Shell::new();
//! let out = shell.capture("for i in 1 2 3; do echo $i; done").unwrap();
//! assert_eq!(out.stdout, "1\n2\n3\n");
//! ```

pub mod alias;
pub mod arith;
pub mod ast;
pub mod config;
pub mod eval;
pub mod history;
pub mod jobs;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod signals;
pub mod sys;

pub use alias::AliasRegistry;
pub use config::ShellConfig;
pub use eval::{
    Builtin, BuiltinContext, BuiltinError, Captured, ControlSignal, Environment, ExecError,
    ExpandError, Input, IoFrame, Options, Output, Shell, ShellError, Value, Variable, Variables,
};
pub use history::History;
pub use jobs::{Job, JobControl, JobController, JobError, JobStatus};
pub use lexer::{tokenize, LexError, Token};
pub use parser::{check_complete, parse, Completeness, ParseError, ParseErrors};

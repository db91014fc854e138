//! Host-registered built-in commands
//!
//! Embedders extend the shell with [`Shell::register_builtin`]. A
//! registered built-in runs in-process, like the core ones, and sees the
//! shell through a [`BuiltinContext`].
//!
//! ```no_run
//! use posh::{BuiltinContext, BuiltinError, Shell};
//!
//! let mut shell = Shell::new();
//! shell.register_builtin("greet", |ctx: &mut BuiltinContext<'_>| -> Result<i32, BuiltinError> {
//!     let who = ctx.args.first().map(String::as_str).unwrap_or("world");
//!     ctx.stdout.line(&format!("hello, {}", who));
//!     Ok(0)
//! });
//! ```
//!
//! [`Shell::register_builtin`]: super::Shell::register_builtin

use std::path::Path;

use thiserror::Error;

use super::env::{EnvError, Environment};
use super::io::{Input, Output};
use crate::alias::AliasRegistry;
use crate::jobs::JobControl;

/// Variable access for built-ins
pub trait Variables {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&mut self, name: &str, value: &str) -> Result<(), EnvError>;
    fn unset(&mut self, name: &str) -> Result<(), EnvError>;
    fn export(&mut self, name: &str);
}

impl Variables for Environment {
    fn get(&self, name: &str) -> Option<String> {
        self.get_scalar(name)
    }

    fn set(&mut self, name: &str, value: &str) -> Result<(), EnvError> {
        self.set_scalar(name, value)
    }

    fn unset(&mut self, name: &str) -> Result<(), EnvError> {
        Environment::unset(self, name)
    }

    fn export(&mut self, name: &str) {
        self.set_exported(name, true);
    }
}

/// What a built-in can reach while it runs
pub struct BuiltinContext<'a> {
    /// Arguments after the command name
    pub args: &'a [String],
    pub variables: &'a mut dyn Variables,
    pub aliases: &'a mut AliasRegistry,
    pub jobs: &'a mut dyn JobControl,
    pub stdin: &'a Input,
    pub stdout: &'a Output,
    pub stderr: &'a Output,
    pub cwd: &'a Path,
}

#[derive(Error, Debug)]
pub enum BuiltinError {
    /// Terminate the shell with this status
    #[error("exit {0}")]
    Exit(i32),

    /// Reported as `posh: name: message`; status 1
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait Builtin {
    fn run(&self, ctx: &mut BuiltinContext<'_>) -> Result<i32, BuiltinError>;
}

impl<F> Builtin for F
where
    F: Fn(&mut BuiltinContext<'_>) -> Result<i32, BuiltinError>,
{
    fn run(&self, ctx: &mut BuiltinContext<'_>) -> Result<i32, BuiltinError> {
        self(ctx)
    }
}

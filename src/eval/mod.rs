//! Evaluator for posh - a tree-walking interpreter over the AST
//!
//! The [`Shell`] owns all interpreter state: variables, functions, aliases,
//! the job table and the working directory. Execution is single-threaded;
//! concurrency only exists between the shell and the processes it starts.
//!
//! # Control flow
//!
//! `break`, `continue`, `return`, `exit` and the `set -e` abort travel as
//! [`ExecError::Control`] so they pass through lists and pipelines
//! untouched. Ordinary failures are reported where the command ran and
//! turned into its exit status.
//!
//! # Builtin dispatch
//!
//! Simple commands look up functions first, then core built-ins through
//! `try_builtin()` (names listed in `resolver::SHELL_BUILTINS`), then
//! host-registered [`Builtin`]s, then PATH.

mod builtin;
mod command;
mod control;
mod env;
mod expand;
mod io;
mod jobctl;
mod pattern;
mod pipeline;
mod printf;
mod redirect;
mod shell;
mod test_cmd;
#[cfg(test)]
mod tests;

pub use builtin::{Builtin, BuiltinContext, BuiltinError, Variables};
pub use env::{EnvError, Environment, Options, ScopeKind, Value, Variable};
pub use io::{Input, IoFrame, Output, SharedBuffer};

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, trace};

use crate::alias::AliasRegistry;
use crate::arith::ArithError;
use crate::ast::FunctionDef;
use crate::config::ShellConfig;
use crate::jobs::{JobController, JobError, JobStatus};
use crate::parser::{self, Completeness, ParseErrors};
use crate::resolver::CommandResolver;
use crate::signals;
use crate::sys;

/// Non-error unwinding requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Leave `n` enclosing loops
    Break(usize),
    /// Next iteration of the `n`th enclosing loop
    Continue(usize),
    Return(i32),
    /// `exit`: terminate the interpreter
    Exit(i32),
    /// `set -e` abort: stop running the script
    ErrExit(i32),
}

impl ControlSignal {
    pub fn status(&self) -> i32 {
        match self {
            ControlSignal::Break(_) | ControlSignal::Continue(_) => 0,
            ControlSignal::Return(code) | ControlSignal::Exit(code) | ControlSignal::ErrExit(code) => {
                *code
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("{0}: unbound variable")]
    Unbound(String),

    #[error("{name}: {message}")]
    Param { name: String, message: String },

    #[error(transparent)]
    Arith(#[from] ArithError),

    #[error("{0}: bad substitution")]
    BadSubstitution(String),

    #[error("${0}: cannot assign in this way")]
    CannotAssign(String),

    #[error("{0}: bad array subscript")]
    BadSubscript(String),
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{0}: command not found")]
    CommandNotFound(String),

    #[error("{0}: No such file or directory")]
    NoSuchFile(String),

    #[error("{0}: Permission denied")]
    PermissionDenied(String),

    #[error("{path}: {message}")]
    Open { path: String, message: String },

    #[error("{0}")]
    Redirect(String),

    #[error("{name}: {message}")]
    Builtin {
        name: String,
        message: String,
        status: i32,
    },

    #[error("{0}: maximum function nesting level exceeded ({1})")]
    TooDeep(String, usize),

    #[error(transparent)]
    Expand(#[from] ExpandError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Parse(#[from] ParseErrors),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("interrupted")]
    Interrupted,

    /// Not an error: see [`ControlSignal`]
    #[error("unhandled {0:?}")]
    Control(ControlSignal),
}

impl From<ArithError> for ExecError {
    fn from(err: ArithError) -> Self {
        ExecError::Expand(ExpandError::Arith(err))
    }
}

impl ExecError {
    pub(crate) fn builtin(name: &str, message: impl Into<String>) -> Self {
        ExecError::Builtin {
            name: name.to_string(),
            message: message.into(),
            status: 1,
        }
    }

    pub(crate) fn usage(name: &str, message: impl Into<String>) -> Self {
        ExecError::Builtin {
            name: name.to_string(),
            message: message.into(),
            status: 2,
        }
    }

    /// Exit status a command gets when this error is reported
    pub fn status(&self) -> i32 {
        match self {
            ExecError::CommandNotFound(_) | ExecError::NoSuchFile(_) => 127,
            ExecError::PermissionDenied(_) => 126,
            ExecError::Builtin { status, .. } => *status,
            ExecError::Parse(_) => 2,
            ExecError::Interrupted => 130,
            ExecError::Control(signal) => signal.status(),
            _ => 1,
        }
    }

    /// Control signals and interrupts unwind instead of being reported
    pub fn is_control(&self) -> bool {
        matches!(self, ExecError::Control(_) | ExecError::Interrupted)
    }
}

#[derive(Error, Debug)]
pub enum ShellError {
    #[error(transparent)]
    Parse(#[from] ParseErrors),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ShellError {
    /// Status the process should exit with
    pub fn exit_code(&self) -> i32 {
        match self {
            ShellError::Parse(_) => 2,
            ShellError::Exec(e) => e.status(),
        }
    }

    /// True for `exit` and `set -e` aborts
    pub fn is_exit(&self) -> bool {
        matches!(
            self,
            ShellError::Exec(ExecError::Control(
                ControlSignal::Exit(_) | ControlSignal::ErrExit(_)
            ))
        )
    }
}

/// Output of [`Shell::capture`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// State saved around subshells and command substitutions
struct Snapshot {
    env: Environment,
    functions: HashMap<String, Rc<FunctionDef>>,
    aliases: AliasRegistry,
    cwd: PathBuf,
    loop_depth: usize,
    func_depth: usize,
    source_depth: usize,
}

/// The interpreter
pub struct Shell {
    pub(crate) env: Environment,
    pub(crate) functions: HashMap<String, Rc<FunctionDef>>,
    pub(crate) aliases: AliasRegistry,
    pub(crate) jobs: JobController,
    pub(crate) resolver: CommandResolver,
    /// Host-registered built-ins
    pub(crate) extra_builtins: HashMap<String, Rc<dyn Builtin>>,
    pub(crate) config: ShellConfig,
    pub(crate) cwd: PathBuf,
    pub(crate) last_status: i32,
    pub(crate) last_bg_pid: Option<i32>,
    /// Status of the last command substitution in the current command
    pub(crate) subst_status: Option<i32>,
    pub(crate) shell_pid: u32,
    /// `$0`
    pub(crate) script_name: String,
    /// File named in error messages, when running a script
    pub(crate) source_name: Option<String>,
    /// Line of the current chunk's first line, minus one
    pub(crate) line_base: usize,
    pub(crate) current_line: usize,
    /// Source text of the and-or list being run, for job listings
    pub(crate) current_text: String,
    pub(crate) loop_depth: usize,
    pub(crate) func_depth: usize,
    pub(crate) source_depth: usize,
    /// Inside an `if`/`while`/`until` condition: errexit is off
    pub(crate) cond_depth: usize,
    pub(crate) interactive: bool,
    pub(crate) job_control: bool,
    pub(crate) shell_pgid: i32,
    /// Streams top-level statements run against
    pub(crate) base_io: IoFrame,
    started: Instant,
    random_state: u32,
}

impl Default for Shell {
    fn default() -> Self {
        Self::new()
    }
}

impl Shell {
    pub fn new() -> Self {
        Self::with_config(ShellConfig::from_env())
    }

    pub fn with_config(config: ShellConfig) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let mut env = Environment::from_process();
        let defaults = [
            ("IFS", " \t\n".to_string()),
            ("PS4", "+ ".to_string()),
            ("PWD", cwd.to_string_lossy().into_owned()),
            ("PPID", sys::parent_pid().to_string()),
        ];
        for (name, value) in defaults {
            if name == "PS4" && env.is_set(name) {
                continue;
            }
            let _ = env.set_scalar(name, value);
        }
        if env.get_scalar("PATH").is_none() {
            let _ = env.set_scalar("PATH", "/usr/local/bin:/usr/bin:/bin");
        }
        let level = env
            .get_scalar("SHLVL")
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(0);
        let _ = env.set_scalar("SHLVL", (level + 1).to_string());
        env.set_exported("SHLVL", true);

        let shell_pid = std::process::id();
        Shell {
            env,
            functions: HashMap::new(),
            aliases: AliasRegistry::new(),
            jobs: JobController::new(),
            resolver: CommandResolver::new(),
            extra_builtins: HashMap::new(),
            config,
            cwd,
            last_status: 0,
            last_bg_pid: None,
            subst_status: None,
            shell_pid,
            script_name: "posh".to_string(),
            source_name: None,
            line_base: 0,
            current_line: 0,
            current_text: String::new(),
            loop_depth: 0,
            func_depth: 0,
            source_depth: 0,
            cond_depth: 0,
            interactive: false,
            job_control: false,
            shell_pgid: 0,
            base_io: IoFrame::inherit(),
            started: Instant::now(),
            random_state: shell_pid ^ 0x5eed_1234,
        }
    }

    // ---- host interface ----

    /// Parse and run `src` as one unit. Syntax errors come back as
    /// [`ShellError::Parse`] without running anything; `exit` and `set -e`
    /// aborts come back as [`ShellError::Exec`] carrying the control signal.
    pub fn execute(&mut self, src: &str) -> Result<i32, ShellError> {
        self.line_base = 0;
        let io = self.base_io.clone();
        match self.run_text(src, &io) {
            Ok(status) => Ok(status),
            Err(ExecError::Parse(errors)) => {
                self.last_status = 2;
                Err(ShellError::Parse(errors))
            }
            Err(ExecError::Interrupted) => {
                self.last_status = 130;
                Ok(130)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run a script from a reader, one complete statement at a time.
    /// A leading `#!` line is skipped; syntax errors are reported and
    /// the next statement is attempted.
    pub fn execute_stream<R: BufRead>(&mut self, reader: R) -> Result<i32, ShellError> {
        let io = self.base_io.clone();
        match self.run_stream(reader, &io) {
            Ok(status) => Ok(status),
            Err(ExecError::Interrupted) => Ok(130),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a script file, naming it in error messages
    pub fn execute_file(&mut self, path: &Path) -> Result<i32, ShellError> {
        let file = std::fs::File::open(self.cwd.join(path)).map_err(ExecError::from)?;
        let previous = self.source_name.replace(path.to_string_lossy().into_owned());
        let result = self.execute_stream(std::io::BufReader::new(file));
        self.source_name = previous;
        result
    }

    /// Run `src` with stdout and stderr captured
    pub fn capture(&mut self, src: &str) -> Result<Captured, ShellError> {
        let (frame, out, err) = IoFrame::captured();
        let saved = std::mem::replace(&mut self.base_io, frame);
        let result = self.execute(src);
        self.base_io = saved;
        let status = match result {
            Ok(status) => status,
            Err(e) if e.is_exit() => e.exit_code(),
            Err(e) => return Err(e),
        };
        let stdout = String::from_utf8_lossy(&out.borrow()).into_owned();
        let stderr = String::from_utf8_lossy(&err.borrow()).into_owned();
        Ok(Captured {
            status,
            stdout,
            stderr,
        })
    }

    /// Scalar value of a variable (element 0 for arrays)
    pub fn get_variable(&self, name: &str) -> Option<String> {
        self.env.get_scalar(name)
    }

    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<(), ShellError> {
        self.env
            .set_scalar(name, value)
            .map_err(|e| ShellError::Exec(e.into()))
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.env.options
    }

    pub fn set_positional(&mut self, args: Vec<String>) {
        self.env.positional = args;
    }

    /// Set `$0` and the file name used in error messages
    pub fn set_script_name(&mut self, name: &str) {
        self.script_name = name.to_string();
        self.source_name = Some(name.to_string());
    }

    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn aliases(&self) -> &AliasRegistry {
        &self.aliases
    }

    pub fn aliases_mut(&mut self) -> &mut AliasRegistry {
        &mut self.aliases
    }

    pub fn jobs(&self) -> &JobController {
        &self.jobs
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    /// Names of defined functions, sorted
    pub fn function_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn register_builtin(&mut self, name: &str, builtin: impl Builtin + 'static) {
        self.extra_builtins
            .insert(name.to_string(), Rc::new(builtin));
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    /// Interactive shells take over the terminal and run every pipeline
    /// in its own process group
    pub fn set_interactive(&mut self, on: bool) {
        self.interactive = on;
        self.job_control = on && sys::is_tty(0);
        if self.job_control {
            self.shell_pgid = sys::claim_terminal();
            signals::setup_interactive_signals();
            debug!(pgid = self.shell_pgid, "job control enabled");
        }
    }

    /// Poll background jobs and describe the ones that changed, as
    /// `[n]+  Done  cmd` lines
    pub fn reap_jobs(&mut self) -> Vec<String> {
        let changed = self.jobs.reap();
        changed
            .iter()
            .map(|job| {
                let marker = if self.jobs.current().map(|j| j.id) == Some(job.id)
                    || self.jobs.list().is_empty()
                {
                    '+'
                } else {
                    '-'
                };
                let status = match job.status {
                    JobStatus::Done(0) => "Done".to_string(),
                    other => other.to_string(),
                };
                format!("[{}]{}  {:<24}{}", job.id, marker, status, job.command)
            })
            .collect()
    }

    // ---- statement-level driving ----

    /// Alias-expand, parse and run a chunk of source
    pub(crate) fn run_text(&mut self, src: &str, io: &IoFrame) -> Result<i32, ExecError> {
        let expanded = self.aliases.expand(src);
        trace!(src = %expanded, "run");
        let program = parser::parse(&expanded)?;
        self.execute_list(&program, io)
    }

    /// Feed complete statements from `reader` to [`run_text`]
    pub(crate) fn run_stream<R: BufRead>(
        &mut self,
        mut reader: R,
        io: &IoFrame,
    ) -> Result<i32, ExecError> {
        let mut buffer = String::new();
        let mut start_line = 1;
        let mut line_no = 0;
        let mut status = 0;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;
            if line_no == 1 && line.starts_with("#!") {
                continue;
            }
            if self.env.options.verbose {
                let _ = io.stderr.write_str(&line);
            }
            if buffer.is_empty() {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    continue;
                }
                start_line = line_no;
            }
            buffer.push_str(&line);
            match parser::check_complete(&buffer) {
                Completeness::Incomplete => continue,
                Completeness::Invalid(errors) => {
                    self.line_base = start_line - 1;
                    self.report_parse(&errors, io);
                    self.last_status = 2;
                    status = 2;
                    buffer.clear();
                }
                Completeness::Complete => {
                    let chunk = std::mem::take(&mut buffer);
                    status = self.run_chunk(&chunk, start_line, io)?;
                }
            }
        }
        if !buffer.trim().is_empty() {
            status = self.run_chunk(&buffer, start_line, io)?;
        }
        Ok(status)
    }

    fn run_chunk(&mut self, chunk: &str, start_line: usize, io: &IoFrame) -> Result<i32, ExecError> {
        self.line_base = start_line - 1;
        match self.run_text(chunk, io) {
            Err(ExecError::Parse(errors)) => {
                self.report_parse(&errors, io);
                self.last_status = 2;
                Ok(2)
            }
            other => other,
        }
    }

    /// Print an error the way the shell reports failures:
    /// `posh: file: line N: message` in scripts, `posh: message` otherwise
    pub(crate) fn report(&self, message: &dyn std::fmt::Display, io: &IoFrame) {
        let text = match &self.source_name {
            Some(file) if !self.interactive => {
                format!("posh: {}: line {}: {}", file, self.current_line, message)
            }
            _ => format!("posh: {}", message),
        };
        io.stderr.line(&text);
    }

    pub(crate) fn report_parse(&self, errors: &ParseErrors, io: &IoFrame) {
        for err in errors.iter() {
            let text = err.to_string();
            let prefix = format!("line {}: ", err.line());
            let message = text.strip_prefix(&prefix).unwrap_or(&text);
            let line = self.line_base + err.line();
            let full = match &self.source_name {
                Some(file) if !self.interactive => {
                    format!("posh: {}: line {}: {}", file, line, message)
                }
                _ => format!("posh: line {}: {}", line, message),
            };
            io.stderr.line(&full);
        }
    }

    // ---- scoping helpers ----

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            env: self.env.clone(),
            functions: self.functions.clone(),
            aliases: self.aliases.clone(),
            cwd: self.cwd.clone(),
            loop_depth: self.loop_depth,
            func_depth: self.func_depth,
            source_depth: self.source_depth,
        }
    }

    fn restore(&mut self, snap: Snapshot) {
        self.env = snap.env;
        self.functions = snap.functions;
        self.aliases = snap.aliases;
        self.cwd = snap.cwd;
        self.loop_depth = snap.loop_depth;
        self.func_depth = snap.func_depth;
        self.source_depth = snap.source_depth;
    }

    /// Run `f` as a subshell: nothing it changes survives, and `exit` or
    /// `return` only end the subshell
    pub(crate) fn subshell<F>(&mut self, io: &IoFrame, f: F) -> Result<i32, ExecError>
    where
        F: FnOnce(&mut Shell) -> Result<i32, ExecError>,
    {
        let snap = self.snapshot();
        let result = f(self);
        self.restore(snap);
        match result {
            Ok(status) => Ok(status),
            Err(ExecError::Control(signal)) => match signal {
                ControlSignal::Break(_) | ControlSignal::Continue(_) => Ok(self.last_status),
                other => Ok(other.status()),
            },
            Err(ExecError::Interrupted) => Err(ExecError::Interrupted),
            Err(e) => {
                self.report(&e, io);
                Ok(e.status())
            }
        }
    }

    pub(crate) fn check_interrupt(&self) -> Result<(), ExecError> {
        if self.job_control && signals::take_interrupt() {
            return Err(ExecError::Interrupted);
        }
        Ok(())
    }

    /// Value of `$-`
    pub(crate) fn option_flags(&self) -> String {
        let mut flags = self.env.options.flags();
        if self.interactive {
            flags.push('i');
        }
        flags
    }

    pub(crate) fn next_random(&mut self) -> u32 {
        // xorshift32
        let mut x = self.random_state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state = x;
        x % 32768
    }

    pub(crate) fn seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Resolve a path argument against the shell's working directory
    pub(crate) fn resolve_path(&self, path: &str) -> PathBuf {
        self.cwd.join(path)
    }
}

//! Simple commands: assignments, function calls, built-ins and external
//! programs

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command as Process;
use std::rc::Rc;
use std::thread::JoinHandle;

use tracing::debug;

use super::builtin::{Builtin, BuiltinContext, BuiltinError};
use super::env::ScopeKind;
use super::io::{Collector, IoFrame};
use super::{ControlSignal, ExecError, ExpandError, Shell};
use crate::ast::{Assignment, FunctionDef, SimpleCommand};
use crate::jobs::{self, JobStatus, WaitOutcome};
use crate::resolver;
use crate::sys;

/// A started external process and the helper threads bridging its
/// in-memory streams
pub(crate) struct Spawned {
    pub pid: i32,
    writer: Option<JoinHandle<()>>,
    collectors: Vec<Collector>,
}

impl Spawned {
    /// A forked copy of the shell running one pipeline stage
    pub(crate) fn forked(pid: i32, collector: Option<Collector>) -> Self {
        Spawned {
            pid,
            writer: None,
            collectors: collector.into_iter().collect(),
        }
    }

    /// Join the helpers; only valid once the process has exited
    fn finish(self) {
        if let Some(writer) = self.writer {
            let _ = writer.join();
        }
        for collector in self.collectors {
            collector.finish();
        }
    }
}

/// Quote a word for `set -x` output
fn trace_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_alphanumeric() || "-_./=:,+%@^".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// A file with neither `#!` nor binary content runs as a posh script
fn is_plain_script(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let Ok(mut file) = std::fs::File::open(path) else {
        return false;
    };
    let mut head = [0u8; 64];
    let n = file.read(&mut head).unwrap_or(0);
    let head = &head[..n];
    !head.starts_with(b"#!") && !head.contains(&0)
}

impl Shell {
    pub(crate) fn run_simple(
        &mut self,
        cmd: &SimpleCommand,
        io: &IoFrame,
        expanded: Option<Vec<String>>,
    ) -> Result<i32, ExecError> {
        self.current_line = self.line_base + cmd.line;
        self.subst_status = None;
        let words = match expanded {
            Some(words) => words,
            None => match self.expand_words(&cmd.words, io) {
                Ok(words) => words,
                Err(e) => return self.handle_error(e, io),
            },
        };
        if words.is_empty() {
            return match self.run_assignments_only(cmd, io) {
                Err(e) => self.handle_error(e, io),
                ok => ok,
            };
        }
        let frame = match self.apply_redirects(&cmd.redirects, io) {
            Ok(frame) => frame,
            Err(e) => return self.handle_error(e, io),
        };
        match self.invoke(&words, cmd, io, &frame) {
            Err(e) => self.handle_error(e, &frame),
            ok => ok,
        }
    }

    /// Report a failure and turn it into the command's status. Control
    /// signals pass through; everything else only fails this command,
    /// and `set -e` decides whether that ends the script.
    pub(crate) fn handle_error(&mut self, err: ExecError, io: &IoFrame) -> Result<i32, ExecError> {
        if err.is_control() {
            return Err(err);
        }
        self.report(&err, io);
        Ok(err.status())
    }

    fn invoke(
        &mut self,
        words: &[String],
        cmd: &SimpleCommand,
        io: &IoFrame,
        frame: &IoFrame,
    ) -> Result<i32, ExecError> {
        let name = words[0].as_str();

        if let Some(func) = self.functions.get(name).cloned() {
            self.env.push_scope(ScopeKind::Temporary);
            let result = self
                .temporary_assignments(&cmd.assignments, frame)
                .and_then(|_| {
                    self.trace(words, io);
                    self.call_function(&func, words[1..].to_vec(), frame)
                });
            self.env.pop_scope();
            return result;
        }

        if resolver::is_builtin(name) || self.extra_builtins.contains_key(name) {
            if resolver::is_special_builtin(name) {
                for assignment in &cmd.assignments {
                    self.assign(assignment, frame)?;
                }
                self.trace(words, io);
                return self.run_builtin(name, &words[1..], frame);
            }
            self.env.push_scope(ScopeKind::Temporary);
            let result = self
                .temporary_assignments(&cmd.assignments, frame)
                .and_then(|_| {
                    self.trace(words, io);
                    self.run_builtin(name, &words[1..], frame)
                });
            self.env.pop_scope();
            return result;
        }

        let overlay = self.expand_overlay(&cmd.assignments, frame)?;
        self.trace(words, io);
        self.run_external(words, &overlay, frame)
    }

    fn run_assignments_only(&mut self, cmd: &SimpleCommand, io: &IoFrame) -> Result<i32, ExecError> {
        for assignment in &cmd.assignments {
            self.assign(assignment, io)?;
            if self.env.options.xtrace {
                let value = self.env.get_scalar(assignment.name()).unwrap_or_default();
                let line = format!("{}={}", assignment.name(), trace_quote(&value));
                self.trace_line(&line, io);
            }
        }
        // Files are still created or truncated
        let _frame = self.apply_redirects(&cmd.redirects, io)?;
        Ok(self.subst_status.unwrap_or(0))
    }

    fn trace(&mut self, words: &[String], io: &IoFrame) {
        if self.env.options.xtrace {
            let line: Vec<String> = words.iter().map(|w| trace_quote(w)).collect();
            self.trace_line(&line.join(" "), io);
        }
    }

    fn trace_line(&self, text: &str, io: &IoFrame) {
        let prefix = self.env.get_scalar("PS4").unwrap_or_else(|| "+ ".to_string());
        io.stderr.line(&format!("{}{}", prefix, text));
    }

    /// Apply one assignment to the shell's variables
    pub(crate) fn assign(&mut self, assignment: &Assignment, io: &IoFrame) -> Result<(), ExecError> {
        match assignment {
            Assignment::Scalar {
                name,
                index: None,
                value,
                append,
            } => {
                let value = self.expand_string(value, io)?;
                if *append {
                    self.env.append_scalar(name, &value)?;
                } else {
                    self.env.set_scalar(name, value)?;
                }
            }
            Assignment::Scalar {
                name,
                index: Some(index),
                value,
                append,
            } => {
                let i = self.element_index(name, index, io)?;
                let mut value = self.expand_string(value, io)?;
                if *append {
                    value = self.env.get_element(name, i).unwrap_or_default() + &value;
                }
                self.env.set_element(name, i, value)?;
            }
            Assignment::Array {
                name,
                elements,
                append,
            } => {
                let mut items = BTreeMap::new();
                let mut next = 0;
                for element in elements {
                    match &element.index {
                        Some(index) => {
                            let i = self.element_index(name, index, io)?;
                            items.insert(i, self.expand_string(&element.value, io)?);
                            next = i + 1;
                        }
                        None => {
                            for field in self.expand_fields(&element.value, io)? {
                                items.insert(next, field);
                                next += 1;
                            }
                        }
                    }
                }
                self.env.set_array(name, items, *append)?;
            }
        }
        Ok(())
    }

    fn element_index(
        &mut self,
        name: &str,
        index: &crate::ast::Word,
        io: &IoFrame,
    ) -> Result<usize, ExecError> {
        let i = self.arith_word(index, io)?;
        let i = if i < 0 {
            self.env.next_index(name) as i64 + i
        } else {
            i
        };
        usize::try_from(i).map_err(|_| ExpandError::BadSubscript(name.to_string()).into())
    }

    /// Prefix assignments for a function or regular built-in: visible
    /// (and exported) for the duration of the call only
    fn temporary_assignments(&mut self, assignments: &[Assignment], io: &IoFrame) -> Result<(), ExecError> {
        for assignment in assignments {
            match assignment {
                Assignment::Scalar {
                    name,
                    index: None,
                    value,
                    append,
                } => {
                    if self.env.get(name).is_some_and(|v| v.readonly) {
                        return Err(super::EnvError::Readonly(name.clone()).into());
                    }
                    let mut value = self.expand_string(value, io)?;
                    if *append {
                        value = self.env.get_scalar(name).unwrap_or_default() + &value;
                    }
                    self.env.set_temporary(name, value);
                }
                other => self.assign(other, io)?,
            }
        }
        Ok(())
    }

    /// Prefix assignments for an external command: passed in its
    /// environment, never stored
    fn expand_overlay(
        &mut self,
        assignments: &[Assignment],
        io: &IoFrame,
    ) -> Result<Vec<(String, String)>, ExecError> {
        let mut overlay = Vec::new();
        for assignment in assignments {
            if let Assignment::Scalar {
                name,
                index: None,
                value,
                append,
            } = assignment
            {
                if self.env.get(name).is_some_and(|v| v.readonly) {
                    return Err(super::EnvError::Readonly(name.clone()).into());
                }
                let mut value = self.expand_string(value, io)?;
                if *append {
                    value = self.env.get_scalar(name).unwrap_or_default() + &value;
                }
                overlay.push((name.clone(), value));
            }
        }
        Ok(overlay)
    }

    pub(crate) fn call_function(
        &mut self,
        func: &Rc<FunctionDef>,
        args: Vec<String>,
        io: &IoFrame,
    ) -> Result<i32, ExecError> {
        if self.func_depth >= self.config.max_recursion {
            return Err(ExecError::TooDeep(func.name.clone(), self.config.max_recursion));
        }
        debug!(name = %func.name, depth = self.func_depth, "call function");
        let saved_positional = std::mem::replace(&mut self.env.positional, args);
        let saved_loops = std::mem::take(&mut self.loop_depth);
        self.env.push_scope(ScopeKind::Function);
        self.func_depth += 1;

        let result = self.execute_command(&func.body, io);

        self.func_depth -= 1;
        self.env.pop_scope();
        self.loop_depth = saved_loops;
        self.env.positional = saved_positional;
        match result {
            Err(ExecError::Control(ControlSignal::Return(code))) => Ok(code),
            other => other,
        }
    }

    /// Core built-ins first, then host-registered ones
    pub(crate) fn run_builtin(&mut self, name: &str, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if let Some(result) = self.try_builtin(name, args, io) {
            return result;
        }
        match self.extra_builtins.get(name).cloned() {
            Some(builtin) => self.run_registered(name, builtin, args, io),
            None => Err(ExecError::CommandNotFound(name.to_string())),
        }
    }

    fn run_registered(
        &mut self,
        name: &str,
        builtin: Rc<dyn Builtin>,
        args: &[String],
        io: &IoFrame,
    ) -> Result<i32, ExecError> {
        let mut ctx = BuiltinContext {
            args,
            variables: &mut self.env,
            aliases: &mut self.aliases,
            jobs: &mut self.jobs,
            stdin: &io.stdin,
            stdout: &io.stdout,
            stderr: &io.stderr,
            cwd: &self.cwd,
        };
        match builtin.run(&mut ctx) {
            Ok(status) => Ok(status),
            Err(BuiltinError::Exit(code)) => Err(ExecError::Control(ControlSignal::Exit(code))),
            Err(BuiltinError::Failed(message)) => Err(ExecError::builtin(name, message)),
            Err(BuiltinError::Io(e)) => Err(e.into()),
        }
    }

    fn locate(&mut self, name: &str) -> Result<PathBuf, ExecError> {
        let path_var = self.env.get_scalar("PATH").unwrap_or_default();
        self.resolver
            .resolve(name, &path_var, &self.cwd)
            .ok_or_else(|| {
                if name.contains('/') {
                    ExecError::NoSuchFile(name.to_string())
                } else {
                    ExecError::CommandNotFound(name.to_string())
                }
            })
    }

    /// Start an external program on `io`. With `pgid`, the child joins
    /// that process group (0 makes it a new group leader).
    pub(crate) fn spawn_external(
        &mut self,
        argv: &[String],
        overlay: &[(String, String)],
        io: &IoFrame,
        pgid: Option<i32>,
    ) -> Result<Spawned, ExecError> {
        let name = &argv[0];
        let path = self.locate(name)?;
        if !resolver::is_executable(&path) {
            return Err(ExecError::PermissionDenied(name.clone()));
        }

        let mut process = match std::env::current_exe() {
            Ok(exe) if is_plain_script(&path) => {
                let mut process = Process::new(exe);
                process.arg(&path);
                process
            }
            _ => Process::new(&path),
        };
        let (stdin, writer) = io.stdin.to_stdio()?;
        let (stdout, out_collector) = io.stdout.to_stdio()?;
        let (stderr, err_collector) = io.stderr.to_stdio()?;
        process
            .args(&argv[1..])
            .current_dir(&self.cwd)
            .env_clear()
            .envs(self.env.child_environment())
            .envs(overlay.iter().cloned())
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr);
        sys::prepare_child(&mut process, pgid, self.job_control);

        let spawned = process.spawn();
        // Release our copies of the pipe ends before anything waits
        drop(process);
        let child = spawned.map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => ExecError::PermissionDenied(name.clone()),
            std::io::ErrorKind::NotFound => ExecError::NoSuchFile(name.clone()),
            _ => ExecError::Io(e),
        })?;
        let pid = child.id() as i32;
        debug!(pid, command = %name, "spawned");
        Ok(Spawned {
            pid,
            writer,
            collectors: out_collector.into_iter().chain(err_collector).collect(),
        })
    }

    fn run_external(
        &mut self,
        argv: &[String],
        overlay: &[(String, String)],
        io: &IoFrame,
    ) -> Result<i32, ExecError> {
        let group = self.job_control.then_some(0);
        let spawned = self.spawn_external(argv, overlay, io, group)?;
        let pgid = spawned.pid;
        if self.job_control {
            sys::set_foreground(pgid);
        }
        let outcome = self.wait_foreground(vec![spawned], pgid, io)?;
        Ok(if outcome.stopped {
            148
        } else {
            outcome.statuses.last().copied().unwrap_or(0)
        })
    }

    /// Wait for a foreground group. A group stopped by the terminal is
    /// registered as a job instead.
    pub(crate) fn wait_foreground(
        &mut self,
        spawned: Vec<Spawned>,
        pgid: i32,
        io: &IoFrame,
    ) -> Result<WaitOutcome, ExecError> {
        let pids: Vec<i32> = spawned.iter().map(|s| s.pid).collect();
        let outcome = jobs::wait_for_pids(&pids, self.job_control);
        if self.job_control {
            sys::set_foreground(self.shell_pgid);
        }
        let outcome = outcome?;
        if outcome.stopped {
            let text = self.current_text.clone();
            let id = self.jobs.launch(pgid, pids, &text, JobStatus::Stopped);
            io.stderr.line("");
            io.stderr.line(&format!("[{}]+  {:<24}{}", id, "Stopped", text));
            return Ok(outcome);
        }
        for child in spawned {
            child.finish();
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_quote() {
        assert_eq!(trace_quote("echo"), "echo");
        assert_eq!(trace_quote("a b"), "'a b'");
        assert_eq!(trace_quote(""), "''");
        assert_eq!(trace_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_plain_script_detection() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s");
        std::fs::write(&script, "echo hi\n").unwrap();
        assert!(is_plain_script(&script));
        std::fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        assert!(!is_plain_script(&script));
        std::fs::write(&script, b"\x7fELF\x02\x01\x00").unwrap();
        assert!(!is_plain_script(&script));
    }
}

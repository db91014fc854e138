//! Core built-in commands
//!
//! Dispatch goes through `try_builtin()`. Every name it accepts is listed
//! in `resolver::SHELL_BUILTINS`, which `type` and command lookup rely on.
//! Job control built-ins live in `jobctl.rs`, `printf` and `test` in their
//! own modules.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::env::{Value, Variable, OPTION_NAMES};
use super::io::{Input, IoFrame};
use super::printf::{echo_escapes, shell_quote};
use super::{ControlSignal, ExecError, Shell};
use crate::lexer::is_valid_name;
use crate::resolver;
use crate::sys;

/// Lexically resolve `.` and `..`, the way `cd` treats logical paths
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push("/");
    }
    out
}

/// Double-quoted form used by `declare -p` and `export -p`
fn double_quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn declare_line(name: &str, var: &Variable, quote: fn(&str) -> String) -> String {
    let mut flags = String::new();
    if matches!(var.value, Value::Array(_)) {
        flags.push('a');
    }
    if var.readonly {
        flags.push('r');
    }
    if var.exported {
        flags.push('x');
    }
    if flags.is_empty() {
        flags.push('-');
    }
    format!("declare -{} {}={}", flags, name, render_value(&var.value, quote))
}

fn render_value(value: &Value, quote: fn(&str) -> String) -> String {
    match value {
        Value::Scalar(s) => quote(s),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|(i, v)| format!("[{}]={}", i, quote(v)))
                .collect();
            format!("({})", parts.join(" "))
        }
    }
}

/// Split a line read by `read` into at most `count` fields. The last one
/// keeps the rest of the line, minus trailing IFS whitespace.
fn split_read_fields(line: &str, ifs: &str, count: usize) -> Vec<String> {
    let is_ws = |c: char| ifs.contains(c) && c.is_whitespace();
    let is_sep = |c: char| ifs.contains(c);
    let mut fields = Vec::new();
    let mut rest = line.trim_start_matches(is_ws);
    while fields.len() + 1 < count && !rest.is_empty() {
        let end = rest.find(is_sep).unwrap_or(rest.len());
        fields.push(rest[..end].to_string());
        rest = &rest[end..];
        // One separator: any IFS whitespace around at most one other delimiter
        rest = rest.trim_start_matches(is_ws);
        if let Some(c) = rest.chars().next() {
            if is_sep(c) && !is_ws(c) {
                rest = rest[c.len_utf8()..].trim_start_matches(is_ws);
            }
        }
    }
    if count > 0 {
        fields.push(rest.trim_end_matches(is_ws).to_string());
    }
    fields
}

/// Options accepted by `read`
#[derive(Default)]
struct ReadOptions {
    raw: bool,
    prompt: Option<String>,
    array: Option<String>,
    delim: Option<u8>,
    count: Option<usize>,
}

impl Shell {
    /// Run a core built-in. `None` means `name` is not one.
    pub(crate) fn try_builtin(
        &mut self,
        name: &str,
        args: &[String],
        io: &IoFrame,
    ) -> Option<Result<i32, ExecError>> {
        let result = match name {
            ":" | "true" => Ok(0),
            "false" => Ok(1),
            "echo" => self.builtin_echo(args, io),
            "printf" => self.builtin_printf(args, io),
            "cd" => self.builtin_cd(args, io),
            "pwd" => self.builtin_pwd(args, io),
            "exit" => self.builtin_exit(args, io),
            "export" => self.builtin_export(args, io),
            "unset" => self.builtin_unset(args, io),
            "set" => self.builtin_set(args, io),
            "shift" => self.builtin_shift(args),
            "return" => self.builtin_return(args, io),
            "break" | "continue" => self.builtin_loop_control(name, args, io),
            "local" => self.builtin_local(args, io),
            "declare" | "typeset" => self.builtin_declare(name, args, io),
            "readonly" => self.builtin_readonly(args, io),
            "let" => self.builtin_let(args),
            "eval" => self.builtin_eval(args, io),
            "source" | "." => self.builtin_source(name, args, io),
            "test" | "[" => self.builtin_test(name, args, io),
            "read" => self.builtin_read(args, io),
            "type" => self.builtin_type(args, io),
            "hash" => self.builtin_hash(args, io),
            "alias" => self.builtin_alias(args, io),
            "unalias" => self.builtin_unalias(args, io),
            "jobs" => self.builtin_jobs(args, io),
            "fg" => self.builtin_fg(args, io),
            "bg" => self.builtin_bg(args, io),
            "wait" => self.builtin_wait(args, io),
            "kill" => self.builtin_kill(args, io),
            _ => return None,
        };
        Some(result)
    }

    fn builtin_echo(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let mut newline = true;
        let mut escapes = false;
        let mut start = 0;
        for arg in args {
            let Some(flags) = arg.strip_prefix('-') else {
                break;
            };
            if flags.is_empty() || !flags.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
                break;
            }
            for c in flags.chars() {
                match c {
                    'n' => newline = false,
                    'e' => escapes = true,
                    _ => escapes = false,
                }
            }
            start += 1;
        }
        let mut text = args[start..].join(" ");
        if escapes {
            let (expanded, stop) = echo_escapes(&text);
            text = expanded;
            if stop {
                newline = false;
            }
        }
        if newline {
            text.push('\n');
        }
        io.stdout.write_str(&text)?;
        Ok(0)
    }

    fn builtin_cd(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let args: Vec<&String> = args.iter().filter(|a| *a != "-L" && *a != "-P").collect();
        let (target, announce) = match args.first().map(|s| s.as_str()) {
            None => match self.env.get_scalar("HOME") {
                Some(home) => (home, false),
                None => return Err(ExecError::builtin("cd", "HOME not set")),
            },
            Some("-") => match self.env.get_scalar("OLDPWD") {
                Some(old) => (old, true),
                None => return Err(ExecError::builtin("cd", "OLDPWD not set")),
            },
            Some(dir) => (dir.to_string(), false),
        };
        if args.len() > 1 {
            return Err(ExecError::builtin("cd", "too many arguments"));
        }

        let path = normalize(&self.cwd.join(&target));
        let failure = |message: &str| Err(ExecError::builtin("cd", format!("{}: {}", target, message)));
        match std::fs::metadata(&path) {
            Ok(meta) if !meta.is_dir() => return failure("Not a directory"),
            Ok(_) => {}
            Err(e) => return failure(&super::redirect::os_message(&e)),
        }
        if let Err(e) = std::fs::read_dir(&path) {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                return failure("Permission denied");
            }
        }

        let old = std::mem::replace(&mut self.cwd, path);
        debug!(from = %old.display(), to = %self.cwd.display(), "cd");
        self.env.set_scalar("OLDPWD", old.to_string_lossy())?;
        self.env.set_scalar("PWD", self.cwd.to_string_lossy())?;
        if announce {
            io.stdout.line(&self.cwd.to_string_lossy());
        }
        Ok(0)
    }

    fn builtin_pwd(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let physical = args.iter().any(|a| a == "-P");
        let dir = if physical {
            self.cwd.canonicalize().unwrap_or_else(|_| self.cwd.clone())
        } else {
            self.cwd.clone()
        };
        io.stdout.line(&dir.to_string_lossy());
        Ok(0)
    }

    fn builtin_exit(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let code = match args {
            [] => self.last_status,
            [code] => match code.trim().parse::<i64>() {
                Ok(n) => (n & 0xff) as i32,
                Err(_) => {
                    self.report(&format!("exit: {}: numeric argument required", code), io);
                    2
                }
            },
            _ => return Err(ExecError::builtin("exit", "too many arguments")),
        };
        Err(ExecError::Control(ControlSignal::Exit(code)))
    }

    fn invalid_identifier(&self, name: &str, arg: &str, io: &IoFrame) {
        self.report(&format!("{}: `{}': not a valid identifier", name, arg), io);
    }

    fn builtin_export(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let mut unexport = false;
        let mut names = Vec::new();
        for arg in args {
            match arg.as_str() {
                "-n" => unexport = true,
                "-p" | "-f" | "--" => {}
                _ => names.push(arg),
            }
        }
        if names.is_empty() {
            for (name, var) in self.env.visible() {
                if var.exported {
                    io.stdout.line(&declare_line(&name, var, double_quote));
                }
            }
            return Ok(0);
        }

        let mut status = 0;
        for arg in names {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg.as_str(), None),
            };
            if !is_valid_name(name) {
                self.invalid_identifier("export", arg, io);
                status = 1;
                continue;
            }
            if let Some(value) = value {
                self.env.set_scalar(name, value)?;
            }
            self.env.set_exported(name, !unexport);
        }
        Ok(status)
    }

    fn builtin_unset(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let mut functions_only = false;
        let mut variables_only = false;
        let mut status = 0;
        for arg in args {
            match arg.as_str() {
                "-f" => functions_only = true,
                "-v" => variables_only = true,
                _ if functions_only => {
                    self.functions.remove(arg.as_str());
                }
                _ => {
                    if let Some((name, index)) = arg.strip_suffix(']').and_then(|a| a.split_once('[')) {
                        let index = self.eval_arith(index)?;
                        let index = usize::try_from(index)
                            .map_err(|_| ExecError::builtin("unset", format!("{}: bad array subscript", arg)))?;
                        self.env.unset_element(name, index)?;
                        continue;
                    }
                    if !is_valid_name(arg) {
                        self.invalid_identifier("unset", arg, io);
                        status = 1;
                        continue;
                    }
                    if self.env.is_set(arg) || variables_only {
                        self.env.unset(arg)?;
                    } else {
                        self.functions.remove(arg.as_str());
                    }
                }
            }
        }
        Ok(status)
    }

    fn builtin_set(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if args.is_empty() {
            for (name, var) in self.env.visible() {
                io.stdout.line(&format!("{}={}", name, render_value(&var.value, shell_quote)));
            }
            return Ok(0);
        }

        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if arg == "--" {
                self.env.positional = args[i + 1..].to_vec();
                return Ok(0);
            }
            if arg == "-" || arg == "+" {
                self.env.options.xtrace = false;
                self.env.options.verbose = false;
                self.env.positional = args[i + 1..].to_vec();
                return Ok(0);
            }
            let on = match arg.chars().next() {
                Some('-') => true,
                Some('+') => false,
                _ => {
                    self.env.positional = args[i..].to_vec();
                    return Ok(0);
                }
            };
            let flags = &arg[1..];
            if flags == "o" {
                match args.get(i + 1) {
                    Some(name) => {
                        if !self.env.options.set_named(name, on) {
                            return Err(ExecError::usage("set", format!("{}: invalid option name", name)));
                        }
                        i += 2;
                        continue;
                    }
                    None => {
                        self.print_options(on, io);
                        return Ok(0);
                    }
                }
            }
            for flag in flags.chars() {
                if !self.env.options.set_flag(flag, on) {
                    return Err(ExecError::usage("set", format!("{}{}: invalid option", &arg[..1], flag)));
                }
            }
            i += 1;
        }
        Ok(0)
    }

    /// `set -o` as a table, `set +o` as commands that restore the settings
    fn print_options(&self, table: bool, io: &IoFrame) {
        for (name, _) in OPTION_NAMES {
            let on = self.env.options.get_named(name).unwrap_or(false);
            let line = if table {
                format!("{:<15}\t{}", name, if on { "on" } else { "off" })
            } else {
                format!("set {}o {}", if on { '-' } else { '+' }, name)
            };
            io.stdout.line(&line);
        }
    }

    fn builtin_shift(&mut self, args: &[String]) -> Result<i32, ExecError> {
        let n = match args.first() {
            None => 1,
            Some(arg) => arg
                .parse::<usize>()
                .map_err(|_| ExecError::builtin("shift", format!("{}: numeric argument required", arg)))?,
        };
        if n > self.env.positional.len() {
            return Err(ExecError::builtin("shift", format!("{}: shift count out of range", n)));
        }
        self.env.positional.drain(..n);
        Ok(0)
    }

    fn builtin_return(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if self.func_depth == 0 && self.source_depth == 0 {
            self.report(&"return: can only `return' from a function or sourced script", io);
            return Ok(1);
        }
        let code = match args.first() {
            None => self.last_status,
            Some(arg) => match arg.trim().parse::<i64>() {
                Ok(n) => (n & 0xff) as i32,
                Err(_) => {
                    self.report(&format!("return: {}: numeric argument required", arg), io);
                    2
                }
            },
        };
        Err(ExecError::Control(ControlSignal::Return(code)))
    }

    fn builtin_loop_control(&mut self, name: &str, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if self.loop_depth == 0 {
            self.report(
                &format!("{}: only meaningful in a `for', `while', or `until' loop", name),
                io,
            );
            return Ok(0);
        }
        let n = match args.first() {
            None => 1,
            Some(arg) => match arg.parse::<usize>() {
                Ok(n) if n >= 1 => n,
                _ => return Err(ExecError::builtin(name, format!("{}: loop count out of range", arg))),
            },
        };
        let n = n.min(self.loop_depth);
        Err(ExecError::Control(if name == "break" {
            ControlSignal::Break(n)
        } else {
            ControlSignal::Continue(n)
        }))
    }

    fn builtin_local(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if !self.env.in_function() {
            return Err(ExecError::builtin("local", "can only be used in a function"));
        }
        self.declare_names("local", args, true, io)
    }

    fn builtin_declare(&mut self, name: &str, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let flags: String = args
            .iter()
            .take_while(|a| a.starts_with('-') && a.len() > 1)
            .flat_map(|a| a.chars().skip(1))
            .collect();
        let names: Vec<&String> = args.iter().skip_while(|a| a.starts_with('-') && a.len() > 1).collect();

        if flags.contains('f') || flags.contains('F') {
            let mut status = 0;
            if names.is_empty() {
                let mut all: Vec<&String> = self.functions.keys().collect();
                all.sort();
                for func in all {
                    io.stdout.line(&format!("declare -f {}", func));
                }
            }
            for func in names {
                if self.functions.contains_key(func.as_str()) {
                    io.stdout.line(func);
                } else {
                    status = 1;
                }
            }
            return Ok(status);
        }

        if names.is_empty() || flags.contains('p') {
            return self.print_declarations(&names, &flags, io);
        }
        let local = self.env.in_function() && !flags.contains('g');
        self.declare_names(name, args, local, io)
    }

    fn print_declarations(&self, names: &[&String], flags: &str, io: &IoFrame) -> Result<i32, ExecError> {
        let visible = self.env.visible();
        if names.is_empty() {
            for (name, var) in &visible {
                let wanted = (!flags.contains('x') || var.exported)
                    && (!flags.contains('r') || var.readonly)
                    && (!flags.contains('a') || matches!(var.value, Value::Array(_)));
                if wanted {
                    io.stdout.line(&declare_line(name, var, double_quote));
                }
            }
            return Ok(0);
        }
        let mut status = 0;
        for name in names {
            match visible.get(name.as_str()) {
                Some(var) => io.stdout.line(&declare_line(name, var, double_quote)),
                None => {
                    self.report(&format!("declare: {}: not found", name), io);
                    status = 1;
                }
            }
        }
        Ok(status)
    }

    /// Shared by `local`, `declare` and `typeset`: flags come first, then
    /// `name` or `name=value` operands
    fn declare_names(&mut self, builtin: &str, args: &[String], local: bool, io: &IoFrame) -> Result<i32, ExecError> {
        let mut array = false;
        let mut integer = false;
        let mut readonly = false;
        let mut export = None;
        let mut status = 0;
        for arg in args {
            if let Some(flags) = arg.strip_prefix('-').filter(|f| !f.is_empty() && !arg.contains('=')) {
                for c in flags.chars() {
                    match c {
                        'a' | 'A' => array = true,
                        'i' => integer = true,
                        'r' => readonly = true,
                        'x' => export = Some(true),
                        'g' | 'p' => {}
                        other => return Err(ExecError::usage(builtin, format!("-{}: invalid option", other))),
                    }
                }
                continue;
            }
            if let Some(flags) = arg.strip_prefix('+').filter(|f| !f.is_empty()) {
                if flags.contains('x') {
                    export = Some(false);
                }
                continue;
            }

            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value.to_string())),
                None => (arg.as_str(), None),
            };
            if !is_valid_name(name) {
                self.invalid_identifier(builtin, arg, io);
                status = 1;
                continue;
            }
            let value = match value {
                Some(v) if integer => Some(self.eval_arith(&v)?.to_string()),
                other => other,
            };
            let value = match (value, array) {
                (Some(v), true) => Some(Value::Array(BTreeMap::from([(0, v)]))),
                (Some(v), false) => Some(Value::Scalar(v)),
                (None, true) if !self.env.is_set(name) || local => Some(Value::Array(BTreeMap::new())),
                (None, _) => None,
            };
            if local {
                self.env.declare_local(name, value)?;
            } else {
                match value {
                    Some(Value::Scalar(v)) => self.env.set_scalar(name, v)?,
                    Some(Value::Array(items)) => self.env.set_array(name, items, false)?,
                    None => {}
                }
            }
            if let Some(on) = export {
                self.env.set_exported(name, on);
            }
            if readonly {
                self.env.set_readonly(name);
            }
        }
        Ok(status)
    }

    fn builtin_readonly(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let names: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();
        if names.is_empty() {
            for (name, var) in self.env.visible() {
                if var.readonly {
                    io.stdout.line(&declare_line(&name, var, double_quote));
                }
            }
            return Ok(0);
        }
        let mut status = 0;
        for arg in names {
            let (name, value) = match arg.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (arg.as_str(), None),
            };
            if !is_valid_name(name) {
                self.invalid_identifier("readonly", arg, io);
                status = 1;
                continue;
            }
            if let Some(value) = value {
                self.env.set_scalar(name, value)?;
            }
            self.env.set_readonly(name);
        }
        Ok(status)
    }

    fn builtin_let(&mut self, args: &[String]) -> Result<i32, ExecError> {
        if args.is_empty() {
            return Err(ExecError::builtin("let", "expression expected"));
        }
        let mut last = 0;
        for expr in args {
            last = self.eval_arith(expr)?;
        }
        Ok(i32::from(last == 0))
    }

    fn builtin_eval(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let src = args.join(" ");
        if src.trim().is_empty() {
            return Ok(0);
        }
        let saved = self.line_base;
        self.line_base = self.current_line.saturating_sub(1);
        let result = self.run_text(&src, io);
        let result = match result {
            Err(ExecError::Parse(errors)) => {
                self.report_parse(&errors, io);
                Ok(2)
            }
            other => other,
        };
        self.line_base = saved;
        result
    }

    /// Locate a file for `source`: names with a slash are taken as given,
    /// others are searched in PATH and then the working directory
    fn find_source(&self, file: &str) -> Option<PathBuf> {
        if file.contains('/') {
            let path = self.resolve_path(file);
            return path.is_file().then_some(path);
        }
        let path_var = self.env.get_scalar("PATH").unwrap_or_default();
        path_var
            .split(':')
            .filter(|dir| !dir.is_empty())
            .map(|dir| self.cwd.join(dir).join(file))
            .find(|candidate| candidate.is_file())
            .or_else(|| {
                let local = self.cwd.join(file);
                local.is_file().then_some(local)
            })
    }

    fn builtin_source(&mut self, name: &str, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let Some((file, rest)) = args.split_first() else {
            return Err(ExecError::usage(name, "filename argument required"));
        };
        let path = self
            .find_source(file)
            .ok_or_else(|| ExecError::builtin(name, format!("{}: No such file or directory", file)))?;
        let content = std::fs::read_to_string(&path).map_err(|e| ExecError::Open {
            path: file.clone(),
            message: super::redirect::os_message(&e),
        })?;
        if self.source_depth >= self.config.max_recursion {
            return Err(ExecError::TooDeep(file.clone(), self.config.max_recursion));
        }
        debug!(file = %path.display(), depth = self.source_depth, "source");

        let saved_positional = (!rest.is_empty()).then(|| std::mem::replace(&mut self.env.positional, rest.to_vec()));
        let saved_line = self.line_base;
        let saved_name = self.source_name.replace(file.clone());
        self.source_depth += 1;

        let result = self.run_stream(Cursor::new(content), io);

        self.source_depth -= 1;
        self.source_name = saved_name;
        self.line_base = saved_line;
        if let Some(positional) = saved_positional {
            self.env.positional = positional;
        }
        match result {
            Err(ExecError::Control(ControlSignal::Return(code))) => Ok(code),
            other => other,
        }
    }

    fn parse_read_options<'a>(&self, args: &'a [String]) -> Result<(ReadOptions, &'a [String]), ExecError> {
        let mut opts = ReadOptions::default();
        let mut i = 0;
        while i < args.len() {
            let arg = &args[i];
            if arg == "--" {
                i += 1;
                break;
            }
            let Some(flags) = arg.strip_prefix('-').filter(|f| !f.is_empty()) else {
                break;
            };
            for (pos, c) in flags.char_indices() {
                let needs_value = matches!(c, 'p' | 'a' | 'd' | 'n' | 't');
                if !needs_value {
                    match c {
                        'r' => opts.raw = true,
                        's' => {}
                        other => return Err(ExecError::usage("read", format!("-{}: invalid option", other))),
                    }
                    continue;
                }
                // The value is the rest of this word, or the next word
                let inline = &flags[pos + c.len_utf8()..];
                let value = if inline.is_empty() {
                    i += 1;
                    args.get(i)
                        .cloned()
                        .ok_or_else(|| ExecError::usage("read", format!("-{}: option requires an argument", c)))?
                } else {
                    inline.to_string()
                };
                match c {
                    'p' => opts.prompt = Some(value),
                    'a' => opts.array = Some(value),
                    'd' => opts.delim = Some(value.bytes().next().unwrap_or(0)),
                    'n' => {
                        opts.count = Some(value.parse().map_err(|_| {
                            ExecError::builtin("read", format!("{}: invalid number", value))
                        })?)
                    }
                    _ => {}
                }
                break;
            }
            i += 1;
        }
        Ok((opts, &args[i..]))
    }

    fn builtin_read(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let (opts, names) = self.parse_read_options(args)?;
        for name in names.iter().chain(opts.array.iter()) {
            if !is_valid_name(name) {
                return Err(ExecError::builtin("read", format!("`{}': not a valid identifier", name)));
            }
        }
        if let Some(prompt) = &opts.prompt {
            if matches!(io.stdin, Input::Stdin) && sys::is_tty(0) {
                io.stderr.write_str(prompt)?;
            }
        }

        let delim = opts.delim.unwrap_or(b'\n');
        let mut bytes = Vec::new();
        let mut hit_eof = false;
        loop {
            if opts.count.is_some_and(|n| bytes.len() >= n) {
                break;
            }
            let Some(byte) = io.stdin.read_byte()? else {
                hit_eof = true;
                break;
            };
            if byte == delim {
                break;
            }
            if byte == b'\\' && !opts.raw {
                match io.stdin.read_byte()? {
                    Some(b'\n') => continue,
                    Some(next) => bytes.push(next),
                    None => {
                        hit_eof = true;
                        break;
                    }
                }
                continue;
            }
            bytes.push(byte);
        }
        let line = String::from_utf8_lossy(&bytes).into_owned();
        let ifs = self.env.get_scalar("IFS").unwrap_or_else(|| " \t\n".to_string());

        if let Some(array) = &opts.array {
            let fields = split_read_fields(&line, &ifs, usize::MAX);
            let items = fields.into_iter().filter(|f| !f.is_empty()).enumerate().collect();
            self.env.set_array(array, items, false)?;
        } else if names.is_empty() {
            self.env.set_scalar("REPLY", line)?;
        } else {
            let mut fields = split_read_fields(&line, &ifs, names.len()).into_iter();
            for name in names {
                self.env.set_scalar(name, fields.next().unwrap_or_default())?;
            }
        }
        Ok(i32::from(hit_eof))
    }

    fn builtin_type(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let terse = args.iter().any(|a| a == "-t");
        let mut status = 0;
        for name in args.iter().filter(|a| !a.starts_with('-')) {
            let found = if let Some(value) = self.aliases.get(name) {
                Some(("alias", format!("{} is aliased to `{}'", name, value)))
            } else if resolver::is_keyword(name) {
                Some(("keyword", format!("{} is a shell keyword", name)))
            } else if self.functions.contains_key(name.as_str()) {
                Some(("function", format!("{} is a function", name)))
            } else if resolver::is_builtin(name) || self.extra_builtins.contains_key(name.as_str()) {
                Some(("builtin", format!("{} is a shell builtin", name)))
            } else {
                let path_var = self.env.get_scalar("PATH").unwrap_or_default();
                self.resolver
                    .resolve(name, &path_var, &self.cwd)
                    .map(|path| ("file", format!("{} is {}", name, path.display())))
            };
            match found {
                Some((kind, _)) if terse => io.stdout.line(kind),
                Some((_, description)) => io.stdout.line(&description),
                None => {
                    if !terse {
                        self.report(&format!("type: {}: not found", name), io);
                    }
                    status = 1;
                }
            }
        }
        Ok(status)
    }

    fn builtin_hash(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if args.iter().any(|a| a == "-r") {
            self.resolver.forget_all();
            return Ok(0);
        }
        if args.is_empty() {
            let mut empty = true;
            for (name, path) in self.resolver.entries() {
                io.stdout.line(&format!("{}\t{}", name, path.display()));
                empty = false;
            }
            if empty {
                io.stdout.line("hash: hash table empty");
            }
            return Ok(0);
        }
        let path_var = self.env.get_scalar("PATH").unwrap_or_default();
        let mut status = 0;
        for name in args {
            if resolver::is_builtin(name) || self.functions.contains_key(name.as_str()) {
                continue;
            }
            if self.resolver.resolve(name, &path_var, &self.cwd).is_none() {
                self.report(&format!("hash: {}: not found", name), io);
                status = 1;
            }
        }
        Ok(status)
    }

    fn builtin_alias(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let operands: Vec<&String> = args.iter().filter(|a| *a != "-p").collect();
        if operands.is_empty() {
            for (name, value) in self.aliases.iter() {
                io.stdout.line(&format!("alias {}={}", name, shell_quote(value)));
            }
            return Ok(0);
        }
        let mut status = 0;
        for arg in operands {
            match arg.split_once('=') {
                Some((name, value)) if !name.is_empty() => {
                    self.aliases.set(name, value);
                }
                _ => match self.aliases.get(arg) {
                    Some(value) => io.stdout.line(&format!("alias {}={}", arg, shell_quote(value))),
                    None => {
                        self.report(&format!("alias: {}: not found", arg), io);
                        status = 1;
                    }
                },
            }
        }
        Ok(status)
    }

    fn builtin_unalias(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if args.is_empty() {
            return Err(ExecError::usage("unalias", "usage: unalias [-a] name [name ...]"));
        }
        if args.iter().any(|a| a == "-a") {
            self.aliases.clear();
            return Ok(0);
        }
        let mut status = 0;
        for name in args {
            if !self.aliases.remove(name) {
                self.report(&format!("unalias: {}: not found", name), io);
                status = 1;
            }
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize(Path::new("/..")), PathBuf::from("/"));
    }

    #[test]
    fn test_split_read_fields() {
        let ifs = " \t\n";
        assert_eq!(split_read_fields("  a  b  c  ", ifs, 2), vec!["a", "b  c"]);
        assert_eq!(split_read_fields("a b", ifs, 3), vec!["a", "b"]);
        assert_eq!(split_read_fields("one", ifs, 1), vec!["one"]);
        assert_eq!(split_read_fields("x:y::z", ":", 4), vec!["x", "y", "", "z"]);
        assert_eq!(split_read_fields("", ifs, 1), vec![""]);
    }

    #[test]
    fn test_double_quote() {
        assert_eq!(double_quote("a \"b\" $c"), r#""a \"b\" \$c""#);
    }
}

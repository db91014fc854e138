//! `test` and `[`

use std::fs::Metadata;
use std::path::{Path, PathBuf};

use super::io::IoFrame;
use super::{ExecError, Shell};
use crate::sys;

const UNARY: &[&str] = &[
    "-e", "-f", "-d", "-r", "-w", "-x", "-s", "-L", "-h", "-p", "-S", "-b", "-c", "-t", "-z", "-n",
    "-v",
];

const BINARY: &[&str] = &[
    "=", "==", "!=", "<", ">", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot", "-ef",
];

/// Evaluates a tokenized test expression
struct TestEval<'a> {
    args: &'a [String],
    pos: usize,
    cwd: &'a Path,
    is_var_set: &'a dyn Fn(&str) -> bool,
}

impl<'a> TestEval<'a> {
    fn path(&self, arg: &str) -> PathBuf {
        self.cwd.join(arg)
    }

    /// Shapes with up to four arguments are decided by count, the way
    /// POSIX specifies, so `[ -n ]` and `[ ! = x ]` mean what they say
    fn run(&mut self) -> Result<bool, String> {
        let args = self.args;
        match args.len() {
            0 => Ok(false),
            1 => Ok(!args[0].is_empty()),
            2 if args[0] == "!" => Ok(args[1].is_empty()),
            2 => self.unary(&args[0], &args[1]),
            3 if BINARY.contains(&args[1].as_str()) => self.binary(&args[0], &args[1], &args[2]),
            3 if args[0] == "!" => self.sub(&args[1..]).map(|b| !b),
            3 if args[0] == "(" && args[2] == ")" => Ok(!args[1].is_empty()),
            4 if args[0] == "!" => self.sub(&args[1..]).map(|b| !b),
            4 if args[0] == "(" && args[3] == ")" => self.sub(&args[1..3]),
            _ => {
                let value = self.or_expr()?;
                match self.args.get(self.pos) {
                    None => Ok(value),
                    Some(extra) => Err(format!("{}: unexpected argument", extra)),
                }
            }
        }
    }

    fn sub(&self, args: &[String]) -> Result<bool, String> {
        TestEval {
            args,
            pos: 0,
            cwd: self.cwd,
            is_var_set: self.is_var_set,
        }
        .run()
    }

    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn take(&mut self) -> Result<&'a str, String> {
        let arg = self.peek().ok_or_else(|| "argument expected".to_string())?;
        self.pos += 1;
        Ok(arg)
    }

    fn or_expr(&mut self) -> Result<bool, String> {
        let mut value = self.and_expr()?;
        while self.peek() == Some("-o") {
            self.pos += 1;
            let rhs = self.and_expr()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and_expr(&mut self) -> Result<bool, String> {
        let mut value = self.not_expr()?;
        while self.peek() == Some("-a") {
            self.pos += 1;
            let rhs = self.not_expr()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not_expr(&mut self) -> Result<bool, String> {
        if self.peek() == Some("!") {
            self.pos += 1;
            return self.not_expr().map(|b| !b);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, String> {
        let first = self.take()?;
        if first == "(" {
            let value = self.or_expr()?;
            return match self.take() {
                Ok(")") => Ok(value),
                _ => Err("`)' expected".to_string()),
            };
        }
        if let Some(op) = self.peek() {
            if BINARY.contains(&op) && self.pos + 1 < self.args.len() {
                self.pos += 1;
                let rhs = self.take()?;
                return self.binary(first, op, rhs);
            }
        }
        if UNARY.contains(&first) {
            if let Ok(operand) = self.take() {
                return self.unary(first, operand);
            }
        }
        Ok(!first.is_empty())
    }

    fn unary(&self, op: &str, arg: &str) -> Result<bool, String> {
        let meta = || std::fs::metadata(self.path(arg)).ok();
        Ok(match op {
            "-z" => arg.is_empty(),
            "-n" => !arg.is_empty(),
            "-v" => (self.is_var_set)(arg),
            "-e" => meta().is_some(),
            "-f" => meta().is_some_and(|m| m.is_file()),
            "-d" => meta().is_some_and(|m| m.is_dir()),
            "-s" => meta().is_some_and(|m| m.len() > 0),
            "-L" | "-h" => std::fs::symlink_metadata(self.path(arg)).is_ok_and(|m| m.file_type().is_symlink()),
            "-r" => accessible(&self.path(arg), Access::Read),
            "-w" => accessible(&self.path(arg), Access::Write),
            "-x" => accessible(&self.path(arg), Access::Execute),
            "-p" | "-S" | "-b" | "-c" => meta().is_some_and(|m| special_kind(&m, op)),
            "-t" => {
                let fd = parse_int(arg)?;
                i32::try_from(fd).is_ok_and(sys::is_tty)
            }
            _ => return Err(format!("{}: unary operator expected", op)),
        })
    }

    fn binary(&self, lhs: &str, op: &str, rhs: &str) -> Result<bool, String> {
        let modified = |p: &str| std::fs::metadata(self.path(p)).and_then(|m| m.modified()).ok();
        Ok(match op {
            "=" | "==" => lhs == rhs,
            "!=" => lhs != rhs,
            "<" => lhs < rhs,
            ">" => lhs > rhs,
            "-eq" => parse_int(lhs)? == parse_int(rhs)?,
            "-ne" => parse_int(lhs)? != parse_int(rhs)?,
            "-lt" => parse_int(lhs)? < parse_int(rhs)?,
            "-le" => parse_int(lhs)? <= parse_int(rhs)?,
            "-gt" => parse_int(lhs)? > parse_int(rhs)?,
            "-ge" => parse_int(lhs)? >= parse_int(rhs)?,
            "-nt" => match (modified(lhs), modified(rhs)) {
                (Some(a), Some(b)) => a > b,
                (Some(_), None) => true,
                _ => false,
            },
            "-ot" => match (modified(lhs), modified(rhs)) {
                (Some(a), Some(b)) => a < b,
                (None, Some(_)) => true,
                _ => false,
            },
            "-ef" => same_file(&self.path(lhs), &self.path(rhs)),
            _ => return Err(format!("{}: binary operator expected", op)),
        })
    }
}

fn parse_int(s: &str) -> Result<i64, String> {
    s.trim()
        .parse::<i64>()
        .map_err(|_| format!("{}: integer expression expected", s))
}

enum Access {
    Read,
    Write,
    Execute,
}

#[cfg(unix)]
fn accessible(path: &Path, access: Access) -> bool {
    use nix::unistd::{access as check, AccessFlags};
    let flags = match access {
        Access::Read => AccessFlags::R_OK,
        Access::Write => AccessFlags::W_OK,
        Access::Execute => AccessFlags::X_OK,
    };
    check(path, flags).is_ok()
}

#[cfg(not(unix))]
fn accessible(path: &Path, access: Access) -> bool {
    match access {
        Access::Write => path.metadata().is_ok_and(|m| !m.permissions().readonly()),
        _ => path.exists(),
    }
}

#[cfg(unix)]
fn special_kind(meta: &Metadata, op: &str) -> bool {
    use std::os::unix::fs::FileTypeExt;
    let kind = meta.file_type();
    match op {
        "-p" => kind.is_fifo(),
        "-S" => kind.is_socket(),
        "-b" => kind.is_block_device(),
        _ => kind.is_char_device(),
    }
}

#[cfg(not(unix))]
fn special_kind(_meta: &Metadata, _op: &str) -> bool {
    false
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Evaluate a test expression. Errors mean a malformed expression.
pub(crate) fn evaluate(args: &[String], cwd: &Path, is_var_set: &dyn Fn(&str) -> bool) -> Result<bool, String> {
    TestEval {
        args,
        pos: 0,
        cwd,
        is_var_set,
    }
    .run()
}

impl Shell {
    /// `test expr` / `[ expr ]`: 0 true, 1 false, 2 malformed
    pub(crate) fn builtin_test(&mut self, name: &str, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let args = if name == "[" {
            match args.split_last() {
                Some((last, rest)) if last == "]" => rest,
                _ => {
                    io.stderr.line("posh: [: missing `]'");
                    return Ok(2);
                }
            }
        } else {
            args
        };
        let env = &self.env;
        let is_set = |var: &str| env.is_set(var);
        match evaluate(args, &self.cwd, &is_set) {
            Ok(result) => Ok(i32::from(!result)),
            Err(message) => {
                io.stderr.line(&format!("posh: {}: {}", name, message));
                Ok(2)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(args: &[&str]) -> Result<bool, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        evaluate(&args, Path::new("/"), &|name| name == "SET")
    }

    #[test]
    fn test_strings() {
        assert_eq!(check(&["abc"]), Ok(true));
        assert_eq!(check(&[""]), Ok(false));
        assert_eq!(check(&["-z", ""]), Ok(true));
        assert_eq!(check(&["-n", "x"]), Ok(true));
        assert_eq!(check(&["a", "=", "a"]), Ok(true));
        assert_eq!(check(&["a", "!=", "a"]), Ok(false));
        assert_eq!(check(&["a", "<", "b"]), Ok(true));
    }

    #[test]
    fn test_by_argument_count() {
        // A lone operator is just a non-empty string
        assert_eq!(check(&["-n"]), Ok(true));
        assert_eq!(check(&["!", ""]), Ok(true));
        assert_eq!(check(&["!", "=", "x"]), Ok(false));
        assert_eq!(check(&["(", "x", ")"]), Ok(true));
        assert_eq!(check(&["!", "a", "=", "b"]), Ok(true));
    }

    #[test]
    fn test_integers() {
        assert_eq!(check(&["3", "-lt", "10"]), Ok(true));
        assert_eq!(check(&["10", "-le", "3"]), Ok(false));
        assert_eq!(check(&["-2", "-eq", "-2"]), Ok(true));
        assert!(check(&["x", "-eq", "1"]).is_err());
    }

    #[test]
    fn test_connectives() {
        assert_eq!(check(&["a", "=", "a", "-a", "b", "=", "c"]), Ok(false));
        assert_eq!(check(&["a", "=", "a", "-o", "b", "=", "c"]), Ok(true));
        assert_eq!(check(&["(", "1", "-eq", "1", ")", "-a", "!", "-z", "x"]), Ok(true));
    }

    #[test]
    fn test_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, "data").unwrap();
        let f = file.to_string_lossy().into_owned();
        let d = dir.path().to_string_lossy().into_owned();
        assert_eq!(check(&["-f", &f]), Ok(true));
        assert_eq!(check(&["-d", &d]), Ok(true));
        assert_eq!(check(&["-s", &f]), Ok(true));
        assert_eq!(check(&["-e", &format!("{}/missing", d)]), Ok(false));
        assert_eq!(check(&[&f, "-ef", &f]), Ok(true));
    }

    #[test]
    fn test_variable_set() {
        assert_eq!(check(&["-v", "SET"]), Ok(true));
        assert_eq!(check(&["-v", "UNSET"]), Ok(false));
    }
}

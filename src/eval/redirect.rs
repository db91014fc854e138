//! Redirections: rewriting fds 0-2 of an [`IoFrame`]

use std::fs::{File, OpenOptions};
use std::io;
use std::rc::Rc;

use super::io::{Input, IoFrame, Output};
use super::{ExecError, Shell};
use crate::ast::{Redirect, RedirectTarget};
use crate::lexer::RedirectOp;

/// The text `strerror` would give, without Rust's `(os error N)` suffix
pub(crate) fn os_message(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::NotFound => "No such file or directory".to_string(),
        io::ErrorKind::PermissionDenied => "Permission denied".to_string(),
        io::ErrorKind::AlreadyExists => "File exists".to_string(),
        _ => {
            let text = err.to_string();
            match text.find(" (os error") {
                Some(i) => text[..i].to_string(),
                None => text,
            }
        }
    }
}

impl Shell {
    /// Apply `redirects` left to right on top of `io`. Files opened here
    /// are reference counted and close when the last frame using them is
    /// dropped.
    pub(crate) fn apply_redirects(
        &mut self,
        redirects: &[Redirect],
        io: &IoFrame,
    ) -> Result<IoFrame, ExecError> {
        let mut frame = io.clone();
        for redirect in redirects {
            self.apply_redirect(redirect, &mut frame, io)?;
        }
        Ok(frame)
    }

    fn apply_redirect(
        &mut self,
        redirect: &Redirect,
        frame: &mut IoFrame,
        io: &IoFrame,
    ) -> Result<(), ExecError> {
        let fd = redirect.target_fd();
        if fd > 2 {
            return Err(ExecError::Redirect(format!("{}: bad file descriptor", fd)));
        }

        let word = match &redirect.target {
            RedirectTarget::Heredoc(body) => {
                let text = self.expand_string(body, io)?;
                frame.stdin = Input::bytes(text.into_bytes());
                return Ok(());
            }
            RedirectTarget::Word(word) => word,
        };

        if redirect.op == RedirectOp::TLess {
            let mut text = self.expand_string(word, io)?;
            text.push('\n');
            frame.stdin = Input::bytes(text.into_bytes());
            return Ok(());
        }

        let fields = self.expand_fields(word, io)?;
        let target = match fields.as_slice() {
            [single] => single.clone(),
            _ => {
                let shown = word.as_literal().unwrap_or_else(|| fields.join(" "));
                return Err(ExecError::Redirect(format!("{}: ambiguous redirect", shown)));
            }
        };

        match redirect.op {
            RedirectOp::Less => {
                let file = self.open_file(&target, OpenOptions::new().read(true))?;
                frame.stdin = Input::File(file);
            }
            RedirectOp::LessGreat => {
                let file = self.open_file(
                    &target,
                    OpenOptions::new().read(true).write(true).create(true),
                )?;
                set_fd(frame, fd, file);
            }
            RedirectOp::Great | RedirectOp::Clobber | RedirectOp::DGreat => {
                let file = self.open_output(&target, redirect.op)?;
                set_fd(frame, fd, file);
            }
            RedirectOp::AndGreat | RedirectOp::AndDGreat => {
                let file = self.open_output(&target, redirect.op)?;
                frame.stdout = Output::File(file.clone());
                frame.stderr = Output::File(file);
            }
            RedirectOp::GreatAnd | RedirectOp::LessAnd => {
                self.duplicate(redirect, fd, &target, frame)?;
            }
            RedirectOp::DLess | RedirectOp::DLessDash | RedirectOp::TLess => {}
        }
        Ok(())
    }

    /// `n>&m`, `n<&m`, `n>&-` and the `>&file` spelling of `&>file`
    fn duplicate(
        &mut self,
        redirect: &Redirect,
        fd: u32,
        target: &str,
        frame: &mut IoFrame,
    ) -> Result<(), ExecError> {
        if target == "-" {
            match fd {
                0 => frame.stdin = Input::Null,
                1 => frame.stdout = Output::Null,
                _ => frame.stderr = Output::Null,
            }
            return Ok(());
        }
        if let Ok(source) = target.parse::<u32>() {
            match (fd, source) {
                (0, 0) => {}
                (1 | 2, 1 | 2) => {
                    let output = frame.output(source).cloned().unwrap_or(Output::Null);
                    if fd == 1 {
                        frame.stdout = output;
                    } else {
                        frame.stderr = output;
                    }
                }
                _ => {
                    return Err(ExecError::Redirect(format!(
                        "{}: bad file descriptor",
                        source
                    )))
                }
            }
            return Ok(());
        }
        if redirect.op == RedirectOp::GreatAnd && redirect.fd.is_none() {
            let file = self.open_output(target, RedirectOp::Great)?;
            frame.stdout = Output::File(file.clone());
            frame.stderr = Output::File(file);
            return Ok(());
        }
        Err(ExecError::Redirect(format!("{}: ambiguous redirect", target)))
    }

    fn open_output(&self, target: &str, op: RedirectOp) -> Result<Rc<File>, ExecError> {
        let append = matches!(op, RedirectOp::DGreat | RedirectOp::AndDGreat);
        let clobber = op == RedirectOp::Clobber;
        if !append && !clobber && self.env.options.noclobber {
            let path = self.resolve_path(target);
            if path.is_file() {
                return Err(ExecError::Redirect(format!(
                    "{}: cannot overwrite existing file",
                    target
                )));
            }
        }
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        self.open_file(target, &options)
    }

    fn open_file(&self, target: &str, options: &OpenOptions) -> Result<Rc<File>, ExecError> {
        let path = self.resolve_path(target);
        options
            .open(&path)
            .map(Rc::new)
            .map_err(|e| ExecError::Open {
                path: target.to_string(),
                message: os_message(&e),
            })
    }
}

fn set_fd(frame: &mut IoFrame, fd: u32, file: Rc<File>) {
    match fd {
        0 => frame.stdin = Input::File(file),
        1 => frame.stdout = Output::File(file),
        _ => frame.stderr = Output::File(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_message_strips_code() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(os_message(&err), "No such file or directory");
        let err = io::Error::from_raw_os_error(21);
        assert!(!os_message(&err).contains("os error"));
    }
}

//! Standard stream bindings for a running command
//!
//! Built-ins and functions run inside the shell process, so redirections
//! cannot simply `dup2` over the shell's own descriptors. Instead every
//! command runs against an [`IoFrame`] describing where fds 0-2 point.
//! External commands and forked pipeline stages get in-memory buffers
//! bridged with pipes and a helper thread.

use std::cell::RefCell;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::process::Stdio;
use std::rc::Rc;
use std::thread::JoinHandle;

use crate::sys;

pub type SharedBuffer = Rc<RefCell<Vec<u8>>>;

#[derive(Debug, Clone)]
pub enum Input {
    /// The shell's own stdin
    Stdin,
    File(Rc<File>),
    /// Here-documents, here-strings and in-process pipeline data
    Bytes(Rc<RefCell<Cursor<Vec<u8>>>>),
    Null,
}

#[derive(Debug, Clone)]
pub enum Output {
    Stdout,
    Stderr,
    File(Rc<File>),
    Buffer(SharedBuffer),
    Null,
}

#[derive(Debug, Clone)]
pub struct IoFrame {
    pub stdin: Input,
    pub stdout: Output,
    pub stderr: Output,
}

impl Default for IoFrame {
    fn default() -> Self {
        Self::inherit()
    }
}

impl IoFrame {
    pub fn inherit() -> Self {
        IoFrame {
            stdin: Input::Stdin,
            stdout: Output::Stdout,
            stderr: Output::Stderr,
        }
    }

    /// Frame writing both output streams into fresh buffers
    pub fn captured() -> (Self, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let frame = IoFrame {
            stdin: Input::Null,
            stdout: Output::Buffer(out.clone()),
            stderr: Output::Buffer(err.clone()),
        };
        (frame, out, err)
    }

    pub fn output(&self, fd: u32) -> Option<&Output> {
        match fd {
            1 => Some(&self.stdout),
            2 => Some(&self.stderr),
            _ => None,
        }
    }
}

impl Input {
    pub fn bytes(data: Vec<u8>) -> Self {
        Input::Bytes(Rc::new(RefCell::new(Cursor::new(data))))
    }

    /// Read a single byte without buffering ahead, so a following
    /// command sees exactly what `read` left behind
    pub fn read_byte(&self) -> io::Result<Option<u8>> {
        let mut byte = [0u8; 1];
        let n = match self {
            Input::Stdin => sys::read_stdin(&mut byte)?,
            Input::File(file) => (&**file).read(&mut byte)?,
            Input::Bytes(cursor) => cursor.borrow_mut().read(&mut byte)?,
            Input::Null => 0,
        };
        Ok((n == 1).then_some(byte[0]))
    }

    pub fn read_to_end(&self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        match self {
            Input::Stdin => {
                let mut chunk = [0u8; 4096];
                loop {
                    let n = sys::read_stdin(&mut chunk)?;
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&chunk[..n]);
                }
            }
            Input::File(file) => {
                (&**file).read_to_end(&mut data)?;
            }
            Input::Bytes(cursor) => {
                cursor.borrow_mut().read_to_end(&mut data)?;
            }
            Input::Null => {}
        }
        Ok(data)
    }

    /// Convert for a child process. In-memory bytes are fed through a
    /// pipe by a writer thread, which the caller must join.
    pub fn to_stdio(&self) -> io::Result<(Stdio, Option<JoinHandle<()>>)> {
        match self {
            Input::Stdin => Ok((Stdio::inherit(), None)),
            Input::File(file) => Ok((Stdio::from(file.try_clone()?), None)),
            Input::Null => Ok((Stdio::null(), None)),
            Input::Bytes(cursor) => {
                let remaining = {
                    let mut cursor = cursor.borrow_mut();
                    let mut rest = Vec::new();
                    cursor.read_to_end(&mut rest)?;
                    rest
                };
                let (read, write) = sys::pipe()?;
                Ok((Stdio::from(read), Some(spawn_writer(write, remaining))))
            }
        }
    }
}

/// Push `data` into a pipe from a helper thread. A reader that exits
/// early just ends the write with EPIPE.
pub fn spawn_writer(mut pipe: File, data: Vec<u8>) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let _ = pipe.write_all(&data);
    })
}

/// A buffer filled by a drain thread once the child has finished
pub struct Collector {
    target: SharedBuffer,
    handle: JoinHandle<io::Result<Vec<u8>>>,
}

impl Collector {
    /// Read `pipe` to its end on a helper thread, into `target`
    fn drain(mut pipe: File, target: SharedBuffer) -> Self {
        let handle = std::thread::spawn(move || {
            let mut data = Vec::new();
            pipe.read_to_end(&mut data)?;
            Ok(data)
        });
        Collector { target, handle }
    }

    pub fn finish(self) {
        if let Ok(Ok(data)) = self.handle.join() {
            self.target.borrow_mut().extend_from_slice(&data);
        }
    }
}

impl Output {
    pub fn write_all(&self, data: &[u8]) -> io::Result<()> {
        match self {
            Output::Stdout => {
                let mut out = io::stdout().lock();
                out.write_all(data)?;
                out.flush()
            }
            Output::Stderr => io::stderr().write_all(data),
            Output::File(file) => (&**file).write_all(data),
            Output::Buffer(buf) => {
                buf.borrow_mut().extend_from_slice(data);
                Ok(())
            }
            Output::Null => Ok(()),
        }
    }

    pub fn write_str(&self, text: &str) -> io::Result<()> {
        self.write_all(text.as_bytes())
    }

    /// Write a line, ignoring failures such as a closed pipe
    pub fn line(&self, text: &str) {
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        let _ = self.write_all(line.as_bytes());
    }

    /// Convert for a child process. Buffers are drained through a pipe by
    /// a reader thread; call [`Collector::finish`] after the child exits.
    pub fn to_stdio(&self) -> io::Result<(Stdio, Option<Collector>)> {
        match self {
            Output::Stdout => Ok((Stdio::from(io::stdout()), None)),
            Output::Stderr => Ok((Stdio::from(io::stderr()), None)),
            Output::File(file) => Ok((Stdio::from(file.try_clone()?), None)),
            Output::Null => Ok((Stdio::null(), None)),
            Output::Buffer(buf) => {
                let (read, write) = sys::pipe()?;
                Ok((Stdio::from(write), Some(Collector::drain(read, buf.clone()))))
            }
        }
    }

    /// Binding for a forked copy of the shell. A buffer lives in this
    /// process only, so the child writes into a pipe drained back here.
    pub fn for_child(&self) -> io::Result<(Output, Option<Collector>)> {
        match self {
            Output::Buffer(buf) => {
                let (read, write) = sys::pipe()?;
                Ok((Output::File(Rc::new(write)), Some(Collector::drain(read, buf.clone()))))
            }
            other => Ok((other.clone(), None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_output() {
        let (frame, out, err) = IoFrame::captured();
        frame.stdout.line("hello");
        frame.stderr.write_str("oops").unwrap();
        assert_eq!(out.borrow().as_slice(), b"hello\n");
        assert_eq!(err.borrow().as_slice(), b"oops");
    }

    #[test]
    fn test_bytes_input_is_consumed_progressively() {
        let input = Input::bytes(b"ab".to_vec());
        let shared = input.clone();
        assert_eq!(input.read_byte().unwrap(), Some(b'a'));
        assert_eq!(shared.read_byte().unwrap(), Some(b'b'));
        assert_eq!(input.read_byte().unwrap(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_buffer_bridged_to_child() {
        let buf = SharedBuffer::default();
        let (stdio, collector) = Output::Buffer(buf.clone()).to_stdio().unwrap();
        let mut child = std::process::Command::new("echo")
            .arg("from child")
            .stdout(stdio)
            .spawn()
            .unwrap();
        child.wait().unwrap();
        collector.unwrap().finish();
        assert_eq!(buf.borrow().as_slice(), b"from child\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_buffer_bridged_for_forked_stage() {
        let buf = SharedBuffer::default();
        let (output, collector) = Output::Buffer(buf.clone()).for_child().unwrap();
        assert!(matches!(output, Output::File(_)));
        output.write_str("from stage").unwrap();
        drop(output);
        collector.unwrap().finish();
        assert_eq!(buf.borrow().as_slice(), b"from stage");
        assert!(matches!(Output::Null.for_child().unwrap(), (Output::Null, None)));
    }
}

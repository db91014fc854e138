//! Thin platform layer over the process and terminal calls the executor
//! and job controller need. Unix gets the real thing through `nix` and
//! `libc`; other platforms get `Unsupported` errors.

use std::fs::File;
use std::io;

/// What `waitpid` reported for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Only returned for non-blocking waits
    Running,
    Exited(i32),
    Signaled(i32),
    Stopped(i32),
    Continued,
}

impl ProcState {
    /// Shell exit status for a finished process: the exit code, or
    /// 128 + signal number
    pub fn status(self) -> Option<i32> {
        match self {
            ProcState::Exited(code) => Some(code),
            ProcState::Signaled(sig) => Some(128 + sig),
            ProcState::Stopped(sig) => Some(128 + sig),
            ProcState::Running | ProcState::Continued => None,
        }
    }
}

/// Create an anonymous pipe, both ends close-on-exec: `(read, write)`
#[cfg(unix)]
pub fn pipe() -> io::Result<(File, File)> {
    use std::os::unix::io::FromRawFd;

    let (read, write) = cloexec_pipe().map_err(|e| io::Error::from_raw_os_error(e as i32))?;
    // SAFETY: both descriptors were just created and nothing else owns them
    let ends = unsafe { (File::from_raw_fd(read), File::from_raw_fd(write)) };
    Ok(ends)
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
    target_os = "illumos",
    target_os = "solaris"
))]
fn cloexec_pipe() -> nix::Result<(std::os::unix::io::RawFd, std::os::unix::io::RawFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

/// Platforms without `pipe2` set the flag after the fact
#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "illumos",
        target_os = "solaris"
    ))
))]
fn cloexec_pipe() -> nix::Result<(std::os::unix::io::RawFd, std::os::unix::io::RawFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};

    let (read, write) = nix::unistd::pipe()?;
    for fd in [read, write] {
        if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            let _ = nix::unistd::close(read);
            let _ = nix::unistd::close(write);
            return Err(e);
        }
    }
    Ok((read, write))
}

#[cfg(not(unix))]
pub fn pipe() -> io::Result<(File, File)> {
    Err(unsupported())
}

/// Wait for one child. `untraced` also reports stops, `nohang` returns
/// [`ProcState::Running`] instead of blocking.
#[cfg(unix)]
pub fn wait_pid(pid: i32, untraced: bool, nohang: bool) -> io::Result<ProcState> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
    use nix::unistd::Pid;

    let mut flags = WaitPidFlag::empty();
    if untraced {
        flags |= WaitPidFlag::WUNTRACED;
    }
    if nohang {
        flags |= WaitPidFlag::WNOHANG;
    }
    loop {
        match waitpid(Pid::from_raw(pid), Some(flags)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(ProcState::Exited(code)),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(ProcState::Signaled(sig as i32)),
            Ok(WaitStatus::Stopped(_, sig)) => return Ok(ProcState::Stopped(sig as i32)),
            Ok(WaitStatus::Continued(_)) => return Ok(ProcState::Continued),
            Ok(WaitStatus::StillAlive) => return Ok(ProcState::Running),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
}

#[cfg(not(unix))]
pub fn wait_pid(_pid: i32, _untraced: bool, _nohang: bool) -> io::Result<ProcState> {
    Err(unsupported())
}

/// Hand the controlling terminal to a process group. A no-op when stdin
/// is not a terminal.
#[cfg(unix)]
pub fn set_foreground(pgid: i32) {
    unsafe {
        if libc::isatty(libc::STDIN_FILENO) == 1 {
            libc::tcsetpgrp(libc::STDIN_FILENO, pgid);
        }
    }
}

#[cfg(not(unix))]
pub fn set_foreground(_pgid: i32) {}

/// Put the shell in its own process group and take the terminal.
/// Returns the shell's process group id.
#[cfg(unix)]
pub fn claim_terminal() -> i32 {
    unsafe {
        let pid = libc::getpid();
        if libc::getpgrp() != pid {
            libc::setpgid(0, 0);
        }
        let pgid = libc::getpgrp();
        set_foreground(pgid);
        pgid
    }
}

#[cfg(not(unix))]
pub fn claim_terminal() -> i32 {
    std::process::id() as i32
}

#[cfg(unix)]
pub fn is_tty(fd: i32) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

#[cfg(not(unix))]
pub fn is_tty(_fd: i32) -> bool {
    false
}

/// Unbuffered read from the process's real stdin, so that bytes not
/// consumed by `read` stay available to later child processes
#[cfg(unix)]
pub fn read_stdin(buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match nix::unistd::read(libc::STDIN_FILENO, buf) {
            Ok(n) => return Ok(n),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
}

#[cfg(not(unix))]
pub fn read_stdin(buf: &mut [u8]) -> io::Result<usize> {
    use std::io::Read;
    io::stdin().read(buf)
}

#[cfg(unix)]
pub fn parent_pid() -> i32 {
    nix::unistd::getppid().as_raw()
}

#[cfg(not(unix))]
pub fn parent_pid() -> i32 {
    0
}

/// Home directory of a named user, for `~user`
#[cfg(unix)]
pub fn home_of(user: &str) -> Option<String> {
    nix::unistd::User::from_name(user)
        .ok()
        .flatten()
        .map(|u| u.dir.to_string_lossy().into_owned())
}

#[cfg(not(unix))]
pub fn home_of(_user: &str) -> Option<String> {
    None
}

/// Put a child into process group `pgid` (0 starts a new group led by
/// the child) and restore default signal handling before exec
#[cfg(unix)]
pub fn prepare_child(cmd: &mut std::process::Command, pgid: Option<i32>, reset_signals: bool) {
    use std::os::unix::process::CommandExt;

    if let Some(pgid) = pgid {
        cmd.process_group(pgid);
    }
    if reset_signals {
        // SAFETY: the hook only calls signal(2), which is async-signal-safe
        unsafe {
            cmd.pre_exec(|| {
                crate::signals::reset_child_signals();
                Ok(())
            });
        }
    }
}

#[cfg(not(unix))]
pub fn prepare_child(_cmd: &mut std::process::Command, _pgid: Option<i32>, _reset_signals: bool) {}

pub enum Forked {
    Child,
    Parent(i32),
}

/// Fork the shell for work that has to run in-process in its own
/// process. With `pgid`, the child joins that process group, or leads a
/// new one when it is 0.
#[cfg(unix)]
pub fn fork_job(pgid: Option<i32>) -> io::Result<Forked> {
    use nix::unistd::{fork, setpgid, ForkResult, Pid};

    // SAFETY: the child only runs interpreter code on its own copies of
    // the shell's state and leaves through exit_child
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            if let Some(pgid) = pgid {
                let _ = setpgid(Pid::from_raw(0), Pid::from_raw(pgid));
            }
            crate::signals::reset_child_signals();
            Ok(Forked::Child)
        }
        Ok(ForkResult::Parent { child }) => {
            // Both sides set the group so neither races the other
            if let Some(pgid) = pgid {
                let group = if pgid == 0 { child } else { Pid::from_raw(pgid) };
                let _ = setpgid(child, group);
            }
            Ok(Forked::Parent(child.as_raw()))
        }
        Err(e) => Err(io::Error::from_raw_os_error(e as i32)),
    }
}

#[cfg(not(unix))]
pub fn fork_job(_pgid: Option<i32>) -> io::Result<Forked> {
    Err(unsupported())
}

/// End a forked child without running the exit handlers it inherited
#[cfg(unix)]
pub fn exit_child(status: i32) -> ! {
    // SAFETY: _exit never returns and touches no shared state
    unsafe { libc::_exit(status) }
}

#[cfg(not(unix))]
pub fn exit_child(status: i32) -> ! {
    std::process::exit(status)
}

#[cfg(not(unix))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "job control requires a Unix platform",
    )
}

//! Signal handling for posh
//!
//! Interactive shells need a small amount of signal plumbing:
//! - SIGINT (Ctrl+C): sets a flag that aborts in-process loops
//! - SIGTSTP, SIGTTIN, SIGTTOU, SIGQUIT: ignored by the shell itself
//! - children get default dispositions back before exec
//!
//! Signal numbers are passed around as plain `i32` so callers do not
//! need to depend on `nix` types.

use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(unix)]
use nix::sys::signal::{kill, killpg, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Set by the SIGINT handler, cleared by [`take_interrupt`]
pub static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Signal names accepted by `kill`, paired with their numbers
#[cfg(unix)]
const SIGNALS: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("ILL", libc::SIGILL),
    ("TRAP", libc::SIGTRAP),
    ("ABRT", libc::SIGABRT),
    ("BUS", libc::SIGBUS),
    ("FPE", libc::SIGFPE),
    ("KILL", libc::SIGKILL),
    ("USR1", libc::SIGUSR1),
    ("SEGV", libc::SIGSEGV),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("STOP", libc::SIGSTOP),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("WINCH", libc::SIGWINCH),
];

#[cfg(not(unix))]
const SIGNALS: &[(&str, i32)] = &[("INT", 2), ("KILL", 9), ("TERM", 15)];

pub const SIGTERM: i32 = 15;

/// Install the interactive shell's dispositions
#[cfg(unix)]
pub fn setup_interactive_signals() {
    use nix::sys::signal::{signal, SigHandler};
    use signal_hook::low_level;

    unsafe {
        let _ = low_level::register(signal_hook::consts::SIGINT, || {
            INTERRUPTED.store(true, Ordering::SeqCst);
        });
        for sig in [
            Signal::SIGTSTP,
            Signal::SIGTTIN,
            Signal::SIGTTOU,
            Signal::SIGQUIT,
        ] {
            let _ = signal(sig, SigHandler::SigIgn);
        }
    }
}

/// Install the interactive shell's dispositions (no-op on non-Unix)
#[cfg(not(unix))]
pub fn setup_interactive_signals() {}

/// Check if SIGINT was received and clear the flag
pub fn take_interrupt() -> bool {
    INTERRUPTED.swap(false, Ordering::SeqCst)
}

/// Restore default dispositions in a freshly forked child.
///
/// Only calls async-signal-safe functions, so it is usable from
/// `pre_exec`.
#[cfg(unix)]
pub fn reset_child_signals() {
    unsafe {
        for sig in [
            libc::SIGINT,
            libc::SIGQUIT,
            libc::SIGTSTP,
            libc::SIGTTIN,
            libc::SIGTTOU,
            libc::SIGPIPE,
        ] {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
}

#[cfg(not(unix))]
pub fn reset_child_signals() {}

/// Parse `TERM`, `SIGTERM`, `term` or `15`
pub fn parse_signal(spec: &str) -> Option<i32> {
    if let Ok(n) = spec.parse::<i32>() {
        return (n >= 0).then_some(n);
    }
    let upper = spec.to_ascii_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);
    SIGNALS.iter().find(|(n, _)| *n == name).map(|(_, num)| *num)
}

pub fn signal_name(num: i32) -> Option<&'static str> {
    SIGNALS.iter().find(|(_, n)| *n == num).map(|(name, _)| *name)
}

/// All known signals in numeric order, for `kill -l`
pub fn signal_list() -> Vec<(i32, &'static str)> {
    let mut list: Vec<_> = SIGNALS.iter().map(|(name, num)| (*num, *name)).collect();
    list.sort();
    list
}

/// Send a signal to a single process
#[cfg(unix)]
pub fn signal_process(pid: i32, sig: i32) -> Result<(), String> {
    let signal = to_signal(sig)?;
    kill(Pid::from_raw(pid), signal).map_err(|e| format!("({}) - {}", pid, e.desc()))
}

#[cfg(not(unix))]
pub fn signal_process(_pid: i32, _sig: i32) -> Result<(), String> {
    Err("Signal handling not supported on this platform".into())
}

/// Send a signal to every process in a process group
#[cfg(unix)]
pub fn signal_group(pgid: i32, sig: i32) -> Result<(), String> {
    let signal = to_signal(sig)?;
    killpg(Pid::from_raw(pgid), signal).map_err(|e| format!("({}) - {}", pgid, e.desc()))
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: i32, _sig: i32) -> Result<(), String> {
    Err("Signal handling not supported on this platform".into())
}

/// Resume a stopped process group
#[cfg(unix)]
pub fn continue_group(pgid: i32) -> Result<(), String> {
    signal_group(pgid, libc::SIGCONT)
}

#[cfg(not(unix))]
pub fn continue_group(_pgid: i32) -> Result<(), String> {
    Err("Signal handling not supported on this platform".into())
}

#[cfg(unix)]
fn to_signal(sig: i32) -> Result<Option<Signal>, String> {
    // 0 only checks that the target exists
    if sig == 0 {
        return Ok(None);
    }
    Signal::try_from(sig)
        .map(Some)
        .map_err(|_| format!("{}: invalid signal specification", sig))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_signal_forms() {
        assert_eq!(parse_signal("9"), Some(9));
        assert_eq!(parse_signal("KILL"), Some(9));
        assert_eq!(parse_signal("sigkill"), Some(9));
        assert_eq!(parse_signal("TERM"), Some(SIGTERM));
        assert_eq!(parse_signal("BOGUS"), None);
        assert_eq!(parse_signal("-1"), None);
    }

    #[test]
    fn test_signal_name_roundtrip() {
        assert_eq!(signal_name(15), Some("TERM"));
        assert_eq!(signal_name(9999), None);
        assert!(signal_list().windows(2).all(|w| w[0].0 < w[1].0));
    }
}

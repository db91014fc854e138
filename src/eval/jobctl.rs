//! Job control built-ins: `jobs`, `fg`, `bg`, `wait` and `kill`

use tracing::debug;

use super::io::IoFrame;
use super::{ExecError, Shell};
use crate::jobs::{JobError, JobStatus};
use crate::signals;
use crate::sys;

impl Shell {
    /// Job id named by the first argument, or the current job
    fn job_arg(&self, name: &str, args: &[String]) -> Result<usize, ExecError> {
        let spec = args.first().map(String::as_str).unwrap_or("%+");
        self.jobs
            .resolve(spec)
            .map_err(|e| ExecError::builtin(name, e.to_string()))
    }

    pub(crate) fn builtin_jobs(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let long = args.iter().any(|a| a == "-l");
        let pids_only = args.iter().any(|a| a == "-p");
        let specs: Vec<&String> = args.iter().filter(|a| !a.starts_with('-')).collect();

        for job in self.jobs.reap() {
            if pids_only {
                continue;
            }
            let status = match job.status {
                JobStatus::Done(0) => "Done".to_string(),
                other => other.to_string(),
            };
            io.stdout.line(&format!("[{}]   {:<24}{}", job.id, status, job.command));
        }

        let ids: Vec<usize> = if specs.is_empty() {
            self.jobs.list().iter().map(|j| j.id).collect()
        } else {
            let mut ids = Vec::new();
            for spec in specs {
                ids.push(
                    self.jobs
                        .resolve(spec)
                        .map_err(|e| ExecError::builtin("jobs", e.to_string()))?,
                );
            }
            ids
        };
        for id in ids {
            let Some(job) = self.jobs.get(id) else {
                continue;
            };
            let line = if pids_only {
                job.pgid.to_string()
            } else {
                self.jobs.describe(job, long)
            };
            io.stdout.line(&line);
        }
        Ok(0)
    }

    pub(crate) fn builtin_fg(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let id = self.job_arg("fg", args)?;
        let Some(job) = self.jobs.get(id) else {
            return Err(ExecError::builtin("fg", JobError::NoSuchJob(id.to_string()).to_string()));
        };
        let (pgid, command) = (job.pgid, job.command.clone());
        io.stdout.line(&command);

        if self.job_control {
            sys::set_foreground(pgid);
        }
        let result = self.jobs.foreground(id, self.job_control);
        if self.job_control {
            sys::set_foreground(self.shell_pgid);
        }
        let status = result.map_err(|e| ExecError::builtin("fg", e.to_string()))?;
        if status == 148 {
            io.stderr.line("");
            io.stderr.line(&format!("[{}]+  {:<24}{}", id, "Stopped", command));
        }
        Ok(status)
    }

    pub(crate) fn builtin_bg(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let specs: Vec<String> = if args.is_empty() {
            vec!["%+".to_string()]
        } else {
            args.to_vec()
        };
        let mut status = 0;
        for spec in &specs {
            let result = self
                .jobs
                .resolve(spec)
                .and_then(|id| self.jobs.background(id).map(|_| id));
            match result {
                Ok(id) => {
                    if let Some(job) = self.jobs.get(id) {
                        io.stdout.line(&format!("[{}]{} {} &", id, self.jobs.marker(id), job.command));
                    }
                }
                Err(e) => {
                    io.stderr.line(&format!("posh: bg: {}", e));
                    status = 1;
                }
            }
        }
        Ok(status)
    }

    /// `wait [id...]`: with no arguments, wait for every job and return 0
    pub(crate) fn builtin_wait(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if args.is_empty() {
            let ids: Vec<usize> = self.jobs.list().iter().map(|j| j.id).collect();
            for id in ids {
                self.check_interrupt()?;
                self.jobs.wait(id)?;
            }
            return Ok(0);
        }

        let mut status = 0;
        for arg in args {
            self.check_interrupt()?;
            let id = if arg.starts_with('%') {
                match self.jobs.resolve(arg) {
                    Ok(id) => Some(id),
                    Err(e) => {
                        io.stderr.line(&format!("posh: wait: {}", e));
                        status = 127;
                        continue;
                    }
                }
            } else {
                match arg.parse::<i32>() {
                    Ok(pid) => self.jobs.find_pid(pid),
                    Err(_) => {
                        io.stderr.line(&format!("posh: wait: `{}': not a pid or valid job spec", arg));
                        status = 2;
                        continue;
                    }
                }
            };
            status = match id {
                Some(id) => self.jobs.wait(id)?,
                None => {
                    io.stderr.line(&format!("posh: wait: pid {} is not a child of this shell", arg));
                    127
                }
            };
        }
        Ok(status)
    }

    /// `kill [-s SIG | -SIG] target...` and `kill -l [status]`
    pub(crate) fn builtin_kill(&mut self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        let usage = "usage: kill [-s sigspec | -sigspec] pid | jobspec ... or kill -l [sigspec]";
        let Some(first) = args.first() else {
            return Err(ExecError::usage("kill", usage));
        };

        if first == "-l" || first == "-L" {
            return self.list_signals(&args[1..], io);
        }

        let (sig, targets) = match first.as_str() {
            "-s" | "-n" => match args.get(1) {
                Some(spec) => (signals::parse_signal(spec), &args[2..]),
                None => return Err(ExecError::usage("kill", usage)),
            },
            "--" => (Some(signals::SIGTERM), &args[1..]),
            flag if flag.starts_with('-') && flag.len() > 1 => (signals::parse_signal(&flag[1..]), &args[1..]),
            _ => (Some(signals::SIGTERM), args),
        };
        let Some(sig) = sig else {
            let spec = if first == "-s" || first == "-n" { &args[1] } else { first };
            return Err(ExecError::builtin(
                "kill",
                format!("{}: invalid signal specification", spec.trim_start_matches('-')),
            ));
        };
        if targets.is_empty() {
            return Err(ExecError::usage("kill", usage));
        }

        let mut status = 0;
        for target in targets {
            if let Err(message) = self.send_signal(target, sig) {
                io.stderr.line(&format!("posh: kill: {}", message));
                status = 1;
            }
        }
        Ok(status)
    }

    fn send_signal(&mut self, target: &str, sig: i32) -> Result<(), String> {
        if target.starts_with('%') {
            let id = self.jobs.resolve(target).map_err(|e| e.to_string())?;
            self.jobs.signal(id, sig).map_err(|e| e.to_string())?;
            // A stopped job has to run to act on anything but a stop
            let stopped = self.jobs.get(id).is_some_and(|j| j.status == JobStatus::Stopped);
            if stopped && sig != 0 {
                if let Some(job) = self.jobs.get(id) {
                    let _ = signals::continue_group(job.pgid);
                }
            }
            debug!(job = id, sig, "signalled job");
            return Ok(());
        }
        match target.parse::<i32>() {
            Ok(pid) if pid < 0 => signals::signal_group(-pid, sig),
            Ok(pid) => signals::signal_process(pid, sig),
            Err(_) => Err(format!("{}: arguments must be process or job IDs", target)),
        }
    }

    fn list_signals(&self, args: &[String], io: &IoFrame) -> Result<i32, ExecError> {
        if args.is_empty() {
            let names: Vec<&str> = signals::signal_list().into_iter().map(|(_, name)| name).collect();
            io.stdout.line(&names.join(" "));
            return Ok(0);
        }
        let mut status = 0;
        for arg in args {
            match arg.parse::<i32>() {
                Ok(n) => {
                    // Exit statuses above 128 name the signal that killed
                    let num = if n > 128 { n - 128 } else { n };
                    match signals::signal_name(num) {
                        Some(name) => io.stdout.line(name),
                        None => {
                            io.stderr.line(&format!("posh: kill: {}: invalid signal specification", arg));
                            status = 1;
                        }
                    }
                }
                Err(_) => match signals::parse_signal(arg) {
                    Some(num) => io.stdout.line(&num.to_string()),
                    None => {
                        io.stderr.line(&format!("posh: kill: {}: invalid signal specification", arg));
                        status = 1;
                    }
                },
            }
        }
        Ok(status)
    }
}

//! Job control
//!
//! The [`JobController`] owns every pipeline launched with `&` or
//! stopped with Ctrl+Z. The executor holds one and hands it to built-ins
//! through the [`JobControl`] capability trait.

use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::signals;
use crate::sys::{self, ProcState};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("{0}: no such job")]
    NoSuchJob(String),

    #[error("no current job")]
    NoCurrentJob,

    #[error("job {0} has already completed")]
    AlreadyDone(usize),

    #[error("{0}")]
    Signal(String),

    #[error("wait failed: {0}")]
    Wait(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done(i32),
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Done(0) => write!(f, "Done"),
            JobStatus::Done(code) => write!(f, "Exit {}", code),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: usize,
    pub pgid: i32,
    pub pids: Vec<i32>,
    pub command: String,
    pub status: JobStatus,
    /// Exit status per pid, filled in as processes are reaped
    exits: Vec<Option<i32>>,
}

impl Job {
    pub fn is_done(&self) -> bool {
        matches!(self.status, JobStatus::Done(_))
    }

    /// Pid of the last process in the pipeline (`$!`)
    pub fn last_pid(&self) -> i32 {
        self.pids.last().copied().unwrap_or(self.pgid)
    }

    fn record(&mut self, index: usize, state: ProcState) {
        match state {
            ProcState::Exited(_) | ProcState::Signaled(_) => {
                self.exits[index] = state.status();
                if self.exits.iter().all(Option::is_some) {
                    let code = self.exits.last().copied().flatten().unwrap_or(0);
                    self.status = JobStatus::Done(code);
                }
            }
            ProcState::Stopped(_) => self.status = JobStatus::Stopped,
            ProcState::Continued => self.status = JobStatus::Running,
            ProcState::Running => {}
        }
    }
}

/// Outcome of waiting on a foreground pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitOutcome {
    /// One status per pid; stopped processes report 128 + signal
    pub statuses: Vec<i32>,
    pub stopped: bool,
}

/// Block until every pid has exited, or (with `untraced`) until one of
/// them stops
pub fn wait_for_pids(pids: &[i32], untraced: bool) -> std::io::Result<WaitOutcome> {
    let mut statuses = Vec::with_capacity(pids.len());
    let mut stopped = false;
    for &pid in pids {
        match sys::wait_pid(pid, untraced, false) {
            Ok(state @ ProcState::Stopped(_)) => {
                stopped = true;
                statuses.push(state.status().unwrap_or(148));
            }
            Ok(state) => statuses.push(state.status().unwrap_or(0)),
            // Already reaped elsewhere
            Err(e) if e.raw_os_error() == Some(libc_echild()) => statuses.push(0),
            Err(e) => return Err(e),
        }
    }
    Ok(WaitOutcome { statuses, stopped })
}

#[cfg(unix)]
fn libc_echild() -> i32 {
    libc::ECHILD
}

#[cfg(not(unix))]
fn libc_echild() -> i32 {
    10
}

/// A child that is already gone (ECHILD) was reaped elsewhere and counts
/// as finished; any other error leaves the process's state unknown
fn polled_state(result: std::io::Result<ProcState>) -> std::io::Result<ProcState> {
    match result {
        Err(e) if e.raw_os_error() == Some(libc_echild()) => Ok(ProcState::Exited(0)),
        other => other,
    }
}

/// Capability interface the `jobs`/`fg`/`bg`/`wait` built-ins depend on
pub trait JobControl {
    fn jobs(&self) -> &[Job];
    fn job(&self, id: usize) -> Option<&Job>;
    fn current_job(&self) -> Option<usize>;
    fn set_current_job(&mut self, id: usize) -> Result<(), JobError>;
    /// Block until the job finishes; returns its exit status
    fn wait_job(&mut self, id: usize) -> Result<i32, JobError>;
}

#[derive(Debug, Default)]
pub struct JobController {
    jobs: Vec<Job>,
    next_id: usize,
    current: Option<usize>,
    previous: Option<usize>,
}

impl JobController {
    pub fn new() -> Self {
        JobController {
            jobs: Vec::new(),
            next_id: 1,
            current: None,
            previous: None,
        }
    }

    /// Register a launched pipeline and make it the current job
    pub fn launch(&mut self, pgid: i32, pids: Vec<i32>, command: &str, status: JobStatus) -> usize {
        // Ids are reused once the table empties out, like other shells
        if self.jobs.is_empty() {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        debug!(job = id, pgid, ?status, command, "job registered");
        let exits = vec![None; pids.len()];
        self.jobs.push(Job {
            id,
            pgid,
            pids,
            command: command.to_string(),
            status,
            exits,
        });
        self.make_current(id);
        id
    }

    pub fn list(&self) -> &[Job] {
        &self.jobs
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// The most recently referenced job, falling back to the most recently
    /// launched one
    pub fn current(&self) -> Option<&Job> {
        self.current
            .and_then(|id| self.get(id))
            .or_else(|| self.jobs.last())
    }

    pub fn previous(&self) -> Option<&Job> {
        let current = self.current().map(|j| j.id);
        self.previous
            .filter(|id| Some(*id) != current)
            .and_then(|id| self.get(id))
            .or_else(|| self.jobs.iter().rev().find(|j| Some(j.id) != current))
    }

    fn make_current(&mut self, id: usize) {
        if self.current != Some(id) {
            self.previous = self.current;
            self.current = Some(id);
        }
    }

    /// Marker shown in `jobs` output: `+` current, `-` previous
    pub fn marker(&self, id: usize) -> char {
        if self.current().map(|j| j.id) == Some(id) {
            '+'
        } else if self.previous().map(|j| j.id) == Some(id) {
            '-'
        } else {
            ' '
        }
    }

    /// Resolve `N`, `%N`, `%%`, `%+`, `%-` or `%prefix` to a job id
    pub fn resolve(&self, spec: &str) -> Result<usize, JobError> {
        let body = spec.strip_prefix('%').unwrap_or(spec);
        let found = match body {
            "" | "%" | "+" => return self.current().map(|j| j.id).ok_or(JobError::NoCurrentJob),
            "-" => return self.previous().map(|j| j.id).ok_or(JobError::NoCurrentJob),
            _ => match body.parse::<usize>() {
                Ok(n) => self.get(n).map(|j| j.id),
                Err(_) if spec.starts_with('%') => self
                    .jobs
                    .iter()
                    .rev()
                    .find(|j| j.command.starts_with(body))
                    .map(|j| j.id),
                Err(_) => None,
            },
        };
        found.ok_or_else(|| JobError::NoSuchJob(spec.to_string()))
    }

    /// Find the job containing a pid
    pub fn find_pid(&self, pid: i32) -> Option<usize> {
        self.jobs
            .iter()
            .find(|j| j.pgid == pid || j.pids.contains(&pid))
            .map(|j| j.id)
    }

    /// Bring a job to the foreground and wait for it. `untraced` lets a
    /// second Ctrl+Z stop it again. Returns the job's status; finished
    /// jobs leave the table.
    pub fn foreground(&mut self, id: usize, untraced: bool) -> Result<i32, JobError> {
        let job = self
            .get(id)
            .ok_or_else(|| JobError::NoSuchJob(id.to_string()))?;
        if job.is_done() {
            return Err(JobError::AlreadyDone(id));
        }
        let pgid = job.pgid;
        if job.status == JobStatus::Stopped {
            signals::continue_group(pgid).map_err(JobError::Signal)?;
        }
        self.make_current(id);
        if let Some(job) = self.get_mut(id) {
            job.status = JobStatus::Running;
        }
        debug!(job = id, pgid, "foreground");
        self.wait_until_settled(id, untraced)?;
        let status = match self.get(id).map(|j| j.status) {
            Some(JobStatus::Done(code)) => {
                self.remove(id);
                code
            }
            Some(JobStatus::Stopped) => 148,
            _ => 0,
        };
        Ok(status)
    }

    /// Resume a stopped job without waiting for it
    pub fn background(&mut self, id: usize) -> Result<(), JobError> {
        let job = self
            .get(id)
            .ok_or_else(|| JobError::NoSuchJob(id.to_string()))?;
        if job.is_done() {
            return Err(JobError::AlreadyDone(id));
        }
        if job.status == JobStatus::Stopped {
            signals::continue_group(job.pgid).map_err(JobError::Signal)?;
        }
        if let Some(job) = self.get_mut(id) {
            job.status = JobStatus::Running;
        }
        self.make_current(id);
        debug!(job = id, "resumed in background");
        Ok(())
    }

    /// Send a signal to a job's process group
    pub fn signal(&self, id: usize, sig: i32) -> Result<(), JobError> {
        let job = self
            .get(id)
            .ok_or_else(|| JobError::NoSuchJob(id.to_string()))?;
        signals::signal_group(job.pgid, sig).map_err(JobError::Signal)
    }

    fn wait_until_settled(&mut self, id: usize, untraced: bool) -> Result<(), JobError> {
        let Some(job) = self.get(id) else {
            return Ok(());
        };
        let pending: Vec<(usize, i32)> = job
            .pids
            .iter()
            .enumerate()
            .filter(|(i, _)| job.exits[*i].is_none())
            .map(|(i, pid)| (i, *pid))
            .collect();
        for (index, pid) in pending {
            let state = polled_state(sys::wait_pid(pid, untraced, false))?;
            if let Some(job) = self.get_mut(id) {
                job.record(index, state);
                if job.status == JobStatus::Stopped {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Poll every unfinished job without blocking. Returns the jobs whose
    /// status changed; finished ones are removed from the table.
    pub fn reap(&mut self) -> Vec<Job> {
        let mut changed = Vec::new();
        for job in self.jobs.iter_mut().filter(|j| !j.is_done()) {
            let before = job.status;
            for index in 0..job.pids.len() {
                if job.exits[index].is_some() {
                    continue;
                }
                match polled_state(sys::wait_pid(job.pids[index], true, true)) {
                    Ok(state) => job.record(index, state),
                    Err(e) => debug!(job = job.id, pid = job.pids[index], error = %e, "waitpid failed"),
                }
            }
            if job.status != before {
                debug!(job = job.id, status = %job.status, "job changed");
                changed.push(job.clone());
            }
        }
        self.jobs.retain(|j| !j.is_done());
        self.forget_stale();
        changed
    }

    fn remove(&mut self, id: usize) {
        self.jobs.retain(|j| j.id != id);
        self.forget_stale();
    }

    fn forget_stale(&mut self) {
        if self.current.is_some_and(|id| self.get(id).is_none()) {
            self.current = None;
        }
        if self.previous.is_some_and(|id| self.get(id).is_none()) {
            self.previous = None;
        }
    }

    /// Wait for a job to finish, ignoring stops
    pub fn wait(&mut self, id: usize) -> Result<i32, JobError> {
        self.wait_until_settled(id, false)?;
        let status = match self.get(id).map(|j| j.status) {
            Some(JobStatus::Done(code)) => code,
            Some(_) => 0,
            None => return Err(JobError::NoSuchJob(id.to_string())),
        };
        self.remove(id);
        Ok(status)
    }

    /// Format a job the way `jobs` prints it
    pub fn describe(&self, job: &Job, with_pids: bool) -> String {
        let marker = self.marker(job.id);
        if with_pids {
            format!(
                "[{}]{} {} {:<24}{}",
                job.id,
                marker,
                job.pgid,
                job.status.to_string(),
                job.command
            )
        } else {
            format!(
                "[{}]{}  {:<24}{}",
                job.id,
                marker,
                job.status.to_string(),
                job.command
            )
        }
    }
}

impl JobControl for JobController {
    fn jobs(&self) -> &[Job] {
        self.list()
    }

    fn job(&self, id: usize) -> Option<&Job> {
        self.get(id)
    }

    fn current_job(&self) -> Option<usize> {
        self.current().map(|j| j.id)
    }

    fn set_current_job(&mut self, id: usize) -> Result<(), JobError> {
        if self.get(id).is_none() {
            return Err(JobError::NoSuchJob(id.to_string()));
        }
        self.make_current(id);
        Ok(())
    }

    fn wait_job(&mut self, id: usize) -> Result<i32, JobError> {
        self.wait(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polled_state_errors() {
        let gone = std::io::Error::from_raw_os_error(libc_echild());
        assert_eq!(polled_state(Err(gone)).unwrap(), ProcState::Exited(0));
        let invalid = std::io::Error::from_raw_os_error(22);
        assert!(polled_state(Err(invalid)).is_err());
        assert_eq!(polled_state(Ok(ProcState::Running)).unwrap(), ProcState::Running);
    }

    #[cfg(unix)]
    #[test]
    fn test_reap_finishes_job_of_missing_child() {
        let mut jobs = JobController::new();
        // Not our child: waitpid reports ECHILD, so the job is finished
        jobs.launch(1, vec![1], "init", JobStatus::Running);
        let changed = jobs.reap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].status, JobStatus::Done(0));
        assert!(jobs.list().is_empty());
    }

    fn controller_with(commands: &[&str]) -> JobController {
        let mut jobs = JobController::new();
        for (i, cmd) in commands.iter().enumerate() {
            // Fake pids; nothing here waits on them
            let pid = 900_000 + i as i32;
            jobs.launch(pid, vec![pid], cmd, JobStatus::Running);
        }
        jobs
    }

    #[test]
    fn test_launch_assigns_increasing_ids() {
        let jobs = controller_with(&["sleep 1", "sleep 2"]);
        let ids: Vec<_> = jobs.list().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(jobs.current().map(|j| j.id), Some(2));
        assert_eq!(jobs.previous().map(|j| j.id), Some(1));
    }

    #[test]
    fn test_resolve_specs() {
        let jobs = controller_with(&["sleep 10", "vim notes", "sleep 20"]);
        assert_eq!(jobs.resolve("1").unwrap(), 1);
        assert_eq!(jobs.resolve("%2").unwrap(), 2);
        assert_eq!(jobs.resolve("%%").unwrap(), 3);
        assert_eq!(jobs.resolve("%+").unwrap(), 3);
        assert_eq!(jobs.resolve("%-").unwrap(), 2);
        assert_eq!(jobs.resolve("%vim").unwrap(), 2);
        assert_eq!(jobs.resolve("%sleep").unwrap(), 3);
        assert!(matches!(jobs.resolve("%9"), Err(JobError::NoSuchJob(_))));
        assert!(matches!(jobs.resolve("%nope"), Err(JobError::NoSuchJob(_))));
    }

    #[test]
    fn test_empty_controller_has_no_current() {
        let jobs = JobController::new();
        assert!(jobs.current().is_none());
        assert!(matches!(jobs.resolve("%%"), Err(JobError::NoCurrentJob)));
    }

    #[test]
    fn test_set_current_changes_markers() {
        let mut jobs = controller_with(&["a", "b", "c"]);
        jobs.set_current_job(1).unwrap();
        assert_eq!(jobs.marker(1), '+');
        assert_eq!(jobs.marker(3), '-');
        assert_eq!(jobs.marker(2), ' ');
        assert!(jobs.set_current_job(7).is_err());
    }

    #[test]
    fn test_done_job_is_rejected_for_fg() {
        let mut jobs = controller_with(&["true"]);
        jobs.jobs[0].status = JobStatus::Done(0);
        assert!(matches!(jobs.foreground(1, false), Err(JobError::AlreadyDone(1))));
        assert!(matches!(jobs.background(1), Err(JobError::AlreadyDone(1))));
    }

    #[test]
    fn test_record_marks_done_after_all_pids() {
        let mut jobs = JobController::new();
        let id = jobs.launch(10, vec![10, 11], "a | b", JobStatus::Running);
        let job = jobs.get_mut(id).unwrap();
        job.record(0, ProcState::Exited(1));
        assert_eq!(job.status, JobStatus::Running);
        job.record(1, ProcState::Exited(0));
        assert_eq!(job.status, JobStatus::Done(0));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(JobStatus::Done(0).to_string(), "Done");
        assert_eq!(JobStatus::Done(2).to_string(), "Exit 2");
        assert_eq!(JobStatus::Stopped.to_string(), "Stopped");
    }

    #[cfg(unix)]
    #[test]
    fn test_reap_real_process() {
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        let mut jobs = JobController::new();
        jobs.launch(pid, vec![pid], "true", JobStatus::Running);
        let mut finished = Vec::new();
        for _ in 0..200 {
            finished = jobs.reap();
            if !finished.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, JobStatus::Done(0));
        assert!(jobs.list().is_empty());
    }
}

//! Pipelines and background jobs
//!
//! Every stage is connected to the next by an OS pipe and all stages run
//! at once. External stages are spawned directly; built-ins, functions
//! and compound commands that feed a pipe run in a forked copy of the
//! shell. The last stage, when it is not external, runs in-process
//! against a snapshot of the shell.

use std::collections::BTreeMap;
use std::fs::File;
use std::rc::Rc;

use tracing::debug;

use super::command::Spawned;
use super::io::{Input, IoFrame, Output};
use super::{ExecError, Shell};
use crate::ast::{AndOr, Command, ListItem, Pipeline, Redirect};
use crate::jobs::JobStatus;
use crate::resolver;
use crate::sys::{self, Forked};

enum Stage<'a> {
    External {
        argv: Vec<String>,
        overlay: Vec<(String, String)>,
        redirects: &'a [Redirect],
    },
    /// Runs in-process; `words` are set when they had to be expanded to
    /// classify the command
    Internal {
        command: &'a Command,
        words: Option<Vec<String>>,
    },
    /// Expansion failed and was reported
    Failed(i32),
}

impl Stage<'_> {
    fn is_external(&self) -> bool {
        matches!(self, Stage::External { .. })
    }
}

/// Pipe between stage `i` and `i + 1`. Each end is taken by the stage
/// that uses it.
struct Link {
    read: Option<File>,
    write: Option<File>,
}

impl Link {
    fn reader(&mut self) -> Input {
        self.read.take().map_or(Input::Null, |f| Input::File(Rc::new(f)))
    }

    fn writer(&mut self) -> Output {
        self.write.take().map_or(Output::Null, |f| Output::File(Rc::new(f)))
    }
}

impl Shell {
    fn is_internal_name(&self, name: &str) -> bool {
        self.functions.contains_key(name)
            || resolver::is_builtin(name)
            || self.extra_builtins.contains_key(name)
    }

    fn plan_stage<'a>(&mut self, command: &'a Command, io: &IoFrame) -> Result<Stage<'a>, ExecError> {
        let Command::Simple(simple) = command else {
            return Ok(Stage::Internal {
                command,
                words: None,
            });
        };
        let Some(first) = simple.words.first() else {
            return Ok(Stage::Internal {
                command,
                words: None,
            });
        };
        if let Some(name) = first.as_literal() {
            if self.is_internal_name(&name) {
                return Ok(Stage::Internal {
                    command,
                    words: None,
                });
            }
        }
        self.current_line = self.line_base + simple.line;
        let planned = self.expand_words(&simple.words, io).and_then(|argv| {
            match argv.first() {
                None => Ok(Stage::Internal {
                    command,
                    words: Some(argv),
                }),
                Some(name) if self.is_internal_name(name) => Ok(Stage::Internal {
                    command,
                    words: Some(argv),
                }),
                Some(_) => {
                    let overlay = simple
                        .assignments
                        .iter()
                        .filter_map(|a| match a {
                            crate::ast::Assignment::Scalar {
                                name,
                                index: None,
                                value,
                                ..
                            } => Some((name, value)),
                            _ => None,
                        })
                        .map(|(name, value)| Ok((name.clone(), self.expand_string(value, io)?)))
                        .collect::<Result<Vec<_>, ExecError>>()?;
                    Ok(Stage::External {
                        argv,
                        overlay,
                        redirects: &simple.redirects,
                    })
                }
            }
        });
        match planned {
            Ok(stage) => Ok(stage),
            Err(e) => self.handle_error(e, io).map(Stage::Failed),
        }
    }

    pub(crate) fn run_pipeline(&mut self, pipeline: &Pipeline, io: &IoFrame) -> Result<i32, ExecError> {
        if let [command] = pipeline.commands.as_slice() {
            let status = self.execute_command(command, io)?;
            self.set_pipestatus(&[status]);
            return Ok(status);
        }

        let mut stages = Vec::with_capacity(pipeline.commands.len());
        for command in &pipeline.commands {
            stages.push(self.plan_stage(command, io)?);
        }
        let (statuses, stopped) = self.run_stages(&stages, io)?;
        self.set_pipestatus(&statuses);
        if stopped {
            return Ok(148);
        }
        let last = statuses.last().copied().unwrap_or(0);
        if self.env.options.pipefail {
            return Ok(statuses.iter().rev().find(|&&s| s != 0).copied().unwrap_or(0));
        }
        Ok(last)
    }

    fn set_pipestatus(&mut self, statuses: &[i32]) {
        let items: BTreeMap<usize, String> = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.to_string()))
            .collect();
        let _ = self.env.set_array("PIPESTATUS", items, false);
    }

    fn make_links(stages: &[Stage<'_>]) -> Result<Vec<Link>, ExecError> {
        let mut links = Vec::with_capacity(stages.len().saturating_sub(1));
        for _ in 1..stages.len() {
            let (read, write) = sys::pipe()?;
            links.push(Link {
                read: Some(read),
                write: Some(write),
            });
        }
        Ok(links)
    }

    fn run_stage(&mut self, command: &Command, words: Option<&Vec<String>>, io: &IoFrame) -> Result<i32, ExecError> {
        match (command, words) {
            (Command::Simple(simple), Some(words)) => self.run_simple(simple, io, Some(words.clone())),
            _ => self.execute_command(command, io),
        }
    }

    /// Start every external stage. With `group`, they join `pgid`, or a
    /// new process group led by the first when there is none yet.
    fn spawn_stages(
        &mut self,
        stages: &[Stage<'_>],
        links: &mut [Link],
        io: &IoFrame,
        group: bool,
        mut pgid: Option<i32>,
        statuses: &mut [i32],
    ) -> Result<(Vec<Spawned>, Vec<usize>, Option<i32>), ExecError> {
        let last = stages.len() - 1;
        let mut spawned = Vec::new();
        let mut positions = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            let Stage::External {
                argv,
                overlay,
                redirects,
            } = stage
            else {
                continue;
            };
            let base = IoFrame {
                stdin: if i == 0 { io.stdin.clone() } else { links[i - 1].reader() },
                stdout: if i == last { io.stdout.clone() } else { links[i].writer() },
                stderr: io.stderr.clone(),
            };
            let group_id = group.then_some(pgid.unwrap_or(0));
            let result = self
                .apply_redirects(redirects, &base)
                .and_then(|frame| self.spawn_external(argv, overlay, &frame, group_id));
            match result {
                Ok(child) => {
                    pgid.get_or_insert(child.pid);
                    positions.push(i);
                    spawned.push(child);
                }
                Err(e) => statuses[i] = self.handle_error(e, &base)?,
            }
        }
        Ok((spawned, positions, pgid))
    }

    /// Run a multi-stage pipeline in the foreground. Returns one status
    /// per stage and whether the pipeline was stopped.
    fn run_stages(&mut self, stages: &[Stage<'_>], io: &IoFrame) -> Result<(Vec<i32>, bool), ExecError> {
        let last = stages.len() - 1;
        let group = self.job_control;
        let mut statuses = vec![0; stages.len()];
        let mut links = Self::make_links(stages)?;
        let mut spawned = Vec::new();
        let mut positions = Vec::new();
        let mut pgid = None;

        // Forks come before any external spawn so that no child inherits
        // the write end of a pipe feeding an external stage
        let mut tail = None;
        for (i, stage) in stages.iter().enumerate() {
            let (command, words) = match stage {
                Stage::External { .. } => continue,
                Stage::Failed(status) => {
                    statuses[i] = *status;
                    if i > 0 {
                        drop(links[i - 1].reader());
                    }
                    if i < last {
                        drop(links[i].writer());
                    }
                    continue;
                }
                Stage::Internal { command, words } => (*command, words.as_ref()),
            };
            let stdin = if i == 0 { io.stdin.clone() } else { links[i - 1].reader() };
            if i == last {
                tail = Some((command, words, stdin));
                break;
            }

            let (stderr, collector) = io.stderr.for_child()?;
            let frame = IoFrame {
                stdin,
                stdout: links[i].writer(),
                stderr,
            };
            match sys::fork_job(group.then_some(pgid.unwrap_or(0))) {
                Ok(Forked::Child) => {
                    // Pipe ends meant for other stages must not stay open here
                    links.clear();
                    self.interactive = false;
                    self.job_control = false;
                    let status = self
                        .subshell(&frame, |shell| shell.run_stage(command, words, &frame))
                        .unwrap_or_else(|e| e.status());
                    sys::exit_child(status);
                }
                Ok(Forked::Parent(pid)) => {
                    pgid.get_or_insert(pid);
                    positions.push(i);
                    spawned.push(Spawned::forked(pid, collector));
                }
                Err(e) => statuses[i] = self.handle_error(e.into(), &frame)?,
            }
        }
        let (external, external_positions, pgid) =
            self.spawn_stages(stages, &mut links, io, group, pgid, &mut statuses)?;
        spawned.extend(external);
        positions.extend(external_positions);
        drop(links);
        if let (true, Some(pgid)) = (group, pgid) {
            sys::set_foreground(pgid);
        }

        let tail_result = tail.map(|(command, words, stdin)| {
            let frame = IoFrame {
                stdin,
                stdout: io.stdout.clone(),
                stderr: io.stderr.clone(),
            };
            self.subshell(&frame, |shell| shell.run_stage(command, words, &frame))
        });

        let mut stopped = false;
        if let Some(pgid) = pgid {
            let outcome = self.wait_foreground(spawned, pgid, io)?;
            for (k, &i) in positions.iter().enumerate() {
                statuses[i] = outcome.statuses.get(k).copied().unwrap_or(0);
            }
            stopped = outcome.stopped;
        }
        if let Some(result) = tail_result {
            statuses[last] = result?;
        }
        Ok((statuses, stopped))
    }

    /// `cmd &`: start the and-or list without waiting for it
    pub(crate) fn run_background(&mut self, item: &ListItem, io: &IoFrame) -> Result<i32, ExecError> {
        // Background jobs never write into the caller's buffers, and only
        // read the terminal when job control can stop them for it
        let detach = |output: &Output| match output {
            Output::Buffer(_) => Output::Null,
            other => other.clone(),
        };
        let io = IoFrame {
            stdin: match io.stdin {
                Input::Stdin if !self.job_control => Input::Null,
                ref other => other.clone(),
            },
            stdout: detach(&io.stdout),
            stderr: detach(&io.stderr),
        };

        let (pgid, pids) = match self.plan_detached(&item.and_or, &io)? {
            Some(stages) => {
                let mut statuses = vec![0; stages.len()];
                let mut links = Self::make_links(&stages)?;
                let (spawned, _, pgid) =
                    self.spawn_stages(&stages, &mut links, &io, true, None, &mut statuses)?;
                let Some(pgid) = pgid else {
                    return Ok(statuses.last().copied().unwrap_or(1));
                };
                (pgid, spawned.iter().map(|s| s.pid).collect::<Vec<_>>())
            }
            None => match sys::fork_job(Some(0))? {
                Forked::Child => {
                    self.interactive = false;
                    self.job_control = false;
                    let status = match self.run_and_or(&item.and_or, &io) {
                        Ok(status) => status,
                        Err(e) => e.status(),
                    };
                    sys::exit_child(status);
                }
                Forked::Parent(pid) => (pid, vec![pid]),
            },
        };

        let id = self.jobs.launch(pgid, pids.clone(), &item.text, JobStatus::Running);
        let last_pid = pids.last().copied().unwrap_or(pgid);
        self.last_bg_pid = Some(last_pid);
        debug!(job = id, pgid, "background job");
        if self.interactive {
            io.stderr.line(&format!("[{}] {}", id, last_pid));
        }
        Ok(0)
    }

    /// Stages for a background pipeline made only of external commands,
    /// which can be started directly instead of forking the shell
    fn plan_detached<'a>(&mut self, and_or: &'a AndOr, io: &IoFrame) -> Result<Option<Vec<Stage<'a>>>, ExecError> {
        if !and_or.rest.is_empty() || and_or.first.negated {
            return Ok(None);
        }
        let all_external = and_or.first.commands.iter().all(|command| match command {
            Command::Simple(simple) => simple
                .words
                .first()
                .and_then(|w| w.as_literal())
                .is_some_and(|name| !self.is_internal_name(&name)),
            _ => false,
        });
        if !all_external {
            return Ok(None);
        }
        let mut stages = Vec::new();
        for command in &and_or.first.commands {
            let stage = self.plan_stage(command, io)?;
            if !stage.is_external() {
                return Ok(None);
            }
            stages.push(stage);
        }
        Ok(Some(stages))
    }
}

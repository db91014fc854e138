//! Lists, and-or chains and compound commands

use std::rc::Rc;

use super::io::IoFrame;
use super::pattern::ShellPattern;
use super::{ControlSignal, ExecError, Shell};
use crate::ast::{AndOr, CaseArm, CaseTerminator, Command, CompoundCommand, Connector, List, Pipeline};

/// What a loop does after one run of its body
enum LoopFlow {
    Next(i32),
    Stop(i32),
}

impl Shell {
    pub(crate) fn execute_list(&mut self, list: &List, io: &IoFrame) -> Result<i32, ExecError> {
        let mut status = 0;
        for item in &list.items {
            self.check_interrupt()?;
            self.current_line = self.line_base + item.line;
            status = if item.background {
                self.run_background(item, io)?
            } else {
                self.current_text = item.text.clone();
                self.run_and_or(&item.and_or, io)?
            };
            self.last_status = status;
        }
        Ok(status)
    }

    pub(crate) fn run_and_or(&mut self, and_or: &AndOr, io: &IoFrame) -> Result<i32, ExecError> {
        let last = and_or.rest.len();
        let mut status = self.run_checked(&and_or.first, last == 0, io)?;
        for (i, (connector, pipeline)) in and_or.rest.iter().enumerate() {
            let run = match connector {
                Connector::And => status == 0,
                Connector::Or => status != 0,
            };
            if run {
                status = self.run_checked(pipeline, i + 1 == last, io)?;
            }
        }
        Ok(status)
    }

    /// Run one pipeline of an and-or chain. Only the final pipeline of a
    /// chain, when not negated, can trigger `set -e`.
    fn run_checked(&mut self, pipeline: &Pipeline, last: bool, io: &IoFrame) -> Result<i32, ExecError> {
        let exempt = !last || pipeline.negated;
        if exempt {
            self.cond_depth += 1;
        }
        let result = self.run_pipeline(pipeline, io);
        if exempt {
            self.cond_depth -= 1;
        }
        let mut status = result?;
        if pipeline.negated {
            status = i32::from(status == 0);
        }
        self.last_status = status;
        if status != 0 && !exempt && self.cond_depth == 0 && self.env.options.errexit {
            return Err(ExecError::Control(ControlSignal::ErrExit(status)));
        }
        Ok(status)
    }

    pub(crate) fn execute_command(&mut self, command: &Command, io: &IoFrame) -> Result<i32, ExecError> {
        match command {
            Command::Simple(simple) => self.run_simple(simple, io, None),
            Command::Compound(compound, redirects) => {
                let frame = match self.apply_redirects(redirects, io) {
                    Ok(frame) => frame,
                    Err(e) => return self.handle_error(e, io),
                };
                match self.run_compound(compound, &frame) {
                    Err(e) => self.handle_error(e, &frame),
                    ok => ok,
                }
            }
            Command::FunctionDef(def) => {
                self.functions.insert(def.name.clone(), Rc::new(def.clone()));
                Ok(0)
            }
        }
    }

    fn run_compound(&mut self, compound: &CompoundCommand, io: &IoFrame) -> Result<i32, ExecError> {
        match compound {
            CompoundCommand::Brace(list) => self.execute_list(list, io),
            CompoundCommand::Subshell(list) => self.subshell(io, |shell| shell.execute_list(list, io)),
            CompoundCommand::If {
                branches,
                else_branch,
            } => {
                for (cond, body) in branches {
                    if self.condition(cond, io)? == 0 {
                        return self.execute_list(body, io);
                    }
                }
                match else_branch {
                    Some(body) => self.execute_list(body, io),
                    None => Ok(0),
                }
            }
            CompoundCommand::While { cond, body } => self.run_while(cond, body, true, io),
            CompoundCommand::Until { cond, body } => self.run_while(cond, body, false, io),
            CompoundCommand::For { var, words, body } => {
                let items = match words {
                    Some(words) => self.expand_words(words, io)?,
                    None => self.env.positional.clone(),
                };
                self.in_loop(|shell| {
                    let mut status = 0;
                    for item in items {
                        shell.check_interrupt()?;
                        shell.env.set_scalar(var, item)?;
                        match shell.loop_body(body, io)? {
                            LoopFlow::Next(s) => status = s,
                            LoopFlow::Stop(s) => return Ok(s),
                        }
                    }
                    Ok(status)
                })
            }
            CompoundCommand::ArithFor {
                init,
                cond,
                step,
                body,
            } => {
                if let Some(init) = init {
                    self.arith_word(init, io)?;
                }
                self.in_loop(|shell| {
                    let mut status = 0;
                    loop {
                        shell.check_interrupt()?;
                        if let Some(cond) = cond {
                            if shell.arith_word(cond, io)? == 0 {
                                break;
                            }
                        }
                        match shell.loop_body(body, io)? {
                            LoopFlow::Next(s) => status = s,
                            LoopFlow::Stop(s) => return Ok(s),
                        }
                        if let Some(step) = step {
                            shell.arith_word(step, io)?;
                        }
                    }
                    Ok(status)
                })
            }
            CompoundCommand::Case { subject, arms } => {
                let subject = self.expand_string(subject, io)?;
                self.run_case(&subject, arms, io)
            }
            CompoundCommand::Arith(expr) => {
                let value = self.arith_word(expr, io)?;
                Ok(i32::from(value == 0))
            }
        }
    }

    /// Run a condition list with `set -e` suspended
    fn condition(&mut self, list: &List, io: &IoFrame) -> Result<i32, ExecError> {
        self.cond_depth += 1;
        let result = self.execute_list(list, io);
        self.cond_depth -= 1;
        result
    }

    fn in_loop<F>(&mut self, f: F) -> Result<i32, ExecError>
    where
        F: FnOnce(&mut Shell) -> Result<i32, ExecError>,
    {
        self.loop_depth += 1;
        let result = f(self);
        self.loop_depth -= 1;
        result
    }

    /// Run a loop body, consuming one level of `break`/`continue`
    fn loop_body(&mut self, body: &List, io: &IoFrame) -> Result<LoopFlow, ExecError> {
        match self.execute_list(body, io) {
            Ok(status) => Ok(LoopFlow::Next(status)),
            Err(ExecError::Control(ControlSignal::Break(n))) if n > 1 => {
                Err(ExecError::Control(ControlSignal::Break(n - 1)))
            }
            Err(ExecError::Control(ControlSignal::Break(_))) => Ok(LoopFlow::Stop(0)),
            Err(ExecError::Control(ControlSignal::Continue(n))) if n > 1 => {
                Err(ExecError::Control(ControlSignal::Continue(n - 1)))
            }
            Err(ExecError::Control(ControlSignal::Continue(_))) => Ok(LoopFlow::Next(0)),
            Err(e) => Err(e),
        }
    }

    fn run_while(&mut self, cond: &List, body: &List, keep_on_success: bool, io: &IoFrame) -> Result<i32, ExecError> {
        self.in_loop(|shell| {
            let mut status = 0;
            loop {
                shell.check_interrupt()?;
                let passed = shell.condition(cond, io)? == 0;
                if passed != keep_on_success {
                    break;
                }
                match shell.loop_body(body, io)? {
                    LoopFlow::Next(s) => status = s,
                    LoopFlow::Stop(s) => return Ok(s),
                }
            }
            Ok(status)
        })
    }

    fn run_case(&mut self, subject: &str, arms: &[CaseArm], io: &IoFrame) -> Result<i32, ExecError> {
        let mut status = 0;
        let mut falling = false;
        for arm in arms {
            if !falling && !self.arm_matches(arm, subject, io)? {
                continue;
            }
            status = self.execute_list(&arm.body, io)?;
            match arm.terminator {
                CaseTerminator::Break => return Ok(status),
                CaseTerminator::FallThrough => falling = true,
                CaseTerminator::Continue => falling = false,
            }
        }
        Ok(status)
    }

    fn arm_matches(&mut self, arm: &CaseArm, subject: &str, io: &IoFrame) -> Result<bool, ExecError> {
        for pattern in &arm.patterns {
            let text = self.expand_pattern(pattern, io)?;
            if ShellPattern::new(&text).matches(subject) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

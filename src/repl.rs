use std::path::PathBuf;

use posh::parser::{check_complete, Completeness};
use posh::resolver::{is_executable, KEYWORDS, SHELL_BUILTINS};
use posh::{History, JobStatus, Shell, ShellError};
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::history::DefaultHistory;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use tracing::{debug, warn};

use crate::prompt;
use crate::rcfile;

/// Tab completion against the shell's commands and working directory
#[derive(Default)]
struct PoshHelper {
    /// Functions and aliases
    definitions: Vec<String>,
    cwd: PathBuf,
    path: String,
    home: Option<String>,
}

impl PoshHelper {
    /// Pick up the state completion depends on before each prompt
    fn refresh(&mut self, shell: &Shell) {
        let mut names = shell.function_names();
        names.extend(shell.aliases().iter().map(|(name, _)| name.clone()));
        self.definitions = names;
        self.cwd = shell.cwd().to_path_buf();
        self.path = shell.get_variable("PATH").unwrap_or_default();
        self.home = shell.get_variable("HOME");
    }

    fn complete_command(&self, prefix: &str) -> Vec<String> {
        let mut completions: Vec<String> = SHELL_BUILTINS
            .iter()
            .chain(KEYWORDS)
            .map(|s| s.to_string())
            .chain(self.definitions.iter().cloned())
            .filter(|name| name.starts_with(prefix))
            .collect();

        for dir in self.path.split(':').filter(|d| !d.is_empty()) {
            let Ok(entries) = std::fs::read_dir(self.cwd.join(dir)) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                if let Some(name) = entry.file_name().to_str() {
                    if name.starts_with(prefix) && is_executable(&entry.path()) {
                        completions.push(name.to_string());
                    }
                }
            }
        }
        completions.sort();
        completions.dedup();
        completions
    }

    fn complete_path(&self, prefix: &str) -> Vec<String> {
        let (dir_part, file_prefix) = match prefix.rfind('/') {
            Some(idx) => (&prefix[..=idx], &prefix[idx + 1..]),
            None => ("", prefix),
        };
        let dir = match (dir_part.strip_prefix('~'), &self.home) {
            (Some(rest), Some(home)) => PathBuf::from(format!("{}{}", home, rest)),
            _ => PathBuf::from(dir_part),
        };
        let Ok(entries) = std::fs::read_dir(self.cwd.join(&dir)) else {
            return Vec::new();
        };

        let mut completions = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(file_prefix) || (name.starts_with('.') && !file_prefix.starts_with('.')) {
                continue;
            }
            let full = format!("{}{}", dir_part, name);
            completions.push(if entry.path().is_dir() { full + "/" } else { full });
        }
        completions.sort();
        completions
    }
}

/// True when the word starting at `start` is in command position
fn at_command_position(line: &str, start: usize) -> bool {
    let before = line[..start].trim_end();
    before.is_empty() || before.ends_with([';', '|', '&', '(', '{', '\n'])
}

impl Completer for PoshHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(|c: char| c.is_whitespace() || matches!(c, ';' | '|' | '&' | '(' | '<' | '>'))
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &line[start..pos];

        let completions = if at_command_position(line, start) && !prefix.contains('/') && !prefix.is_empty() {
            self.complete_command(prefix)
        } else {
            self.complete_path(prefix)
        };
        let pairs = completions
            .into_iter()
            .map(|c| Pair {
                display: c.clone(),
                replacement: c,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for PoshHelper {
    type Hint = String;
}

impl Highlighter for PoshHelper {}

impl Validator for PoshHelper {}

impl Helper for PoshHelper {}

fn load_history(shell: &Shell) -> History {
    let config = shell.config();
    let Some(path) = &config.histfile else {
        return History::new(config.histsize);
    };
    History::load(path, config.histsize).unwrap_or_else(|e| {
        warn!(file = %path.display(), error = %e, "could not read history");
        History::new(config.histsize)
    })
}

fn has_stopped_jobs(shell: &Shell) -> bool {
    shell
        .jobs()
        .list()
        .iter()
        .any(|job| job.status == JobStatus::Stopped)
}

/// Run one complete input
fn execute(shell: &mut Shell, input: &str) -> Option<i32> {
    // A Ctrl-C that arrived while a child had the terminal is stale now
    posh::signals::take_interrupt();
    match shell.execute(input) {
        Ok(_) => None,
        Err(e) if e.is_exit() => Some(e.exit_code()),
        Err(ShellError::Parse(errors)) => {
            for err in errors.iter() {
                eprintln!("posh: {}", err);
            }
            None
        }
        Err(e) => {
            eprintln!("posh: {}", e);
            None
        }
    }
}

/// The interactive loop. Returns the shell's exit status.
pub(crate) fn run(mut shell: Shell, norc: bool) -> i32 {
    shell.set_interactive(true);
    if !norc {
        if let Some(code) = rcfile::load_poshrc(&mut shell) {
            return code;
        }
    }

    let mut rl = match Editor::<PoshHelper, DefaultHistory>::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("posh: cannot start line editor: {}", e);
            return 1;
        }
    };
    rl.set_helper(Some(PoshHelper::default()));

    let mut history = load_history(&shell);
    for entry in history.entries() {
        let _ = rl.add_history_entry(entry.as_str());
    }
    debug!(entries = history.entries().len(), "history loaded");

    let mut buffer = String::new();
    let mut warned_stopped = false;
    let status = loop {
        if buffer.is_empty() {
            for note in shell.reap_jobs() {
                eprintln!("{}", note);
            }
        }
        if let Some(helper) = rl.helper_mut() {
            helper.refresh(&shell);
        }

        let prompt = prompt::prompt(&shell, !buffer.is_empty());
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) if !buffer.is_empty() => {
                eprintln!("posh: syntax error: unexpected end of file");
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => {
                if has_stopped_jobs(&shell) && !warned_stopped {
                    eprintln!("There are stopped jobs.");
                    warned_stopped = true;
                    continue;
                }
                break shell.last_status();
            }
            Err(e) => {
                eprintln!("posh: {}", e);
                break 1;
            }
        };
        warned_stopped = false;

        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);
        if buffer.trim().is_empty() {
            buffer.clear();
            continue;
        }
        if check_complete(&buffer) == Completeness::Incomplete {
            continue;
        }

        let input = std::mem::take(&mut buffer);
        if history.add(&input) {
            let _ = rl.add_history_entry(input.as_str());
        }
        if let Some(code) = execute(&mut shell, &input) {
            break code;
        }
    };

    if let Err(e) = history.save() {
        warn!(error = %e, "could not save history");
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_position() {
        assert!(at_command_position("ec", 0));
        assert!(at_command_position("ls | gr", 5));
        assert!(at_command_position("a; b", 3));
        assert!(!at_command_position("echo fi", 5));
    }

    #[test]
    fn test_path_completion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("setup.sh"), "").unwrap();
        std::fs::write(dir.path().join(".secret"), "").unwrap();
        let helper = PoshHelper {
            cwd: dir.path().to_path_buf(),
            ..PoshHelper::default()
        };
        assert_eq!(helper.complete_path("s"), vec!["setup.sh", "src/"]);
        assert_eq!(helper.complete_path(".s"), vec![".secret"]);
        assert!(helper.complete_path("missing/x").is_empty());
    }

    #[test]
    fn test_command_completion() {
        let helper = PoshHelper {
            definitions: vec!["expand_all".to_string()],
            ..PoshHelper::default()
        };
        let found = helper.complete_command("ex");
        assert!(found.contains(&"exit".to_string()));
        assert!(found.contains(&"export".to_string()));
        assert!(found.contains(&"expand_all".to_string()));
    }
}

//! Persistent command history
//!
//! A plain newline-delimited file. Entries are read at startup, new ones
//! are appended at exit, and the file is trimmed to the configured size.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct History {
    path: Option<PathBuf>,
    entries: Vec<String>,
    /// Entries that came from the file; the rest are new this session
    loaded: usize,
    max: usize,
}

impl History {
    /// In-memory history with no backing file
    pub fn new(max: usize) -> Self {
        History {
            path: None,
            entries: Vec::new(),
            loaded: 0,
            max,
        }
    }

    /// Load from `path`; a missing file is an empty history
    pub fn load(path: &Path, max: usize) -> io::Result<Self> {
        let entries: Vec<String> = match fs::read_to_string(path) {
            Ok(text) => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let skip = entries.len().saturating_sub(max);
        let entries: Vec<String> = entries.into_iter().skip(skip).collect();
        Ok(History {
            path: Some(path.to_path_buf()),
            loaded: entries.len(),
            entries,
            max,
        })
    }

    /// Record a line, skipping blanks and immediate repeats
    pub fn add(&mut self, line: &str) -> bool {
        let line = line.trim_end_matches('\n');
        if line.trim().is_empty() || self.entries.last().map(String::as_str) == Some(line) {
            return false;
        }
        self.entries.push(line.to_string());
        true
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Append this session's entries, then trim the file to `max` lines
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let fresh = &self.entries[self.loaded.min(self.entries.len())..];
        if !fresh.is_empty() {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            for entry in fresh {
                writeln!(file, "{}", entry)?;
            }
        }
        let text = fs::read_to_string(path)?;
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() > self.max {
            let kept = lines[lines.len() - self.max..].join("\n");
            fs::write(path, kept + "\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let hist = History::load(&dir.path().join("none"), 10).unwrap();
        assert!(hist.entries().is_empty());
    }

    #[test]
    fn test_add_skips_blank_and_repeats() {
        let mut hist = History::new(10);
        assert!(hist.add("ls"));
        assert!(!hist.add("ls"));
        assert!(!hist.add("   "));
        assert!(hist.add("pwd\n"));
        assert_eq!(hist.entries(), &["ls".to_string(), "pwd".to_string()]);
    }

    #[test]
    fn test_save_appends_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hist");
        fs::write(&path, "one\ntwo\n").unwrap();

        let mut hist = History::load(&path, 3).unwrap();
        assert_eq!(hist.entries().len(), 2);
        hist.add("three");
        hist.add("four");
        hist.save().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "two\nthree\nfour\n");
    }
}

//! Shell configuration read from the process environment

use std::path::PathBuf;

const DEFAULT_MAX_RECURSION: usize = 1000;
const DEFAULT_HISTSIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Function and `source` nesting limit (`POSH_MAX_RECURSION`). The
    /// thread running the shell must have stack for this many levels; the
    /// `posh` binary runs on a thread sized for the default.
    pub max_recursion: usize,
    /// History file (`POSH_HISTFILE`, default `~/.posh_history`)
    pub histfile: Option<PathBuf>,
    /// Entries kept in the history file (`POSH_HISTSIZE`)
    pub histsize: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        ShellConfig {
            max_recursion: DEFAULT_MAX_RECURSION,
            histfile: home_dir().map(|h| h.join(".posh_history")),
            histsize: DEFAULT_HISTSIZE,
        }
    }
}

impl ShellConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; unparsable numbers fall back to
    /// the defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        ShellConfig {
            max_recursion: lookup("POSH_MAX_RECURSION")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_recursion),
            histfile: match lookup("POSH_HISTFILE") {
                Some(path) if path.is_empty() => None,
                Some(path) => Some(PathBuf::from(path)),
                None => defaults.histfile,
            },
            histsize: lookup("POSH_HISTSIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.histsize),
        }
    }
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> ShellConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ShellConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.max_recursion, 1000);
        assert_eq!(cfg.histsize, 1000);
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("POSH_MAX_RECURSION", "50"),
            ("POSH_HISTFILE", "/tmp/hist"),
            ("POSH_HISTSIZE", "10"),
        ]);
        assert_eq!(cfg.max_recursion, 50);
        assert_eq!(cfg.histfile, Some(PathBuf::from("/tmp/hist")));
        assert_eq!(cfg.histsize, 10);
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let cfg = config(&[("POSH_MAX_RECURSION", "lots"), ("POSH_HISTFILE", "")]);
        assert_eq!(cfg.max_recursion, 1000);
        assert_eq!(cfg.histfile, None);
    }
}

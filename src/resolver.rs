//! Command resolution
//!
//! Decides what a command name refers to:
//! 1. The shell's own built-ins (`SHELL_BUILTINS`, the single source of truth)
//! 2. Keywords, for `type`
//! 3. PATH lookup with a per-shell hash table (the `hash` built-in)

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Every built-in the executor dispatches itself
pub const SHELL_BUILTINS: &[&str] = &[
    ":", ".", "[", "alias", "bg", "break", "cd", "continue", "declare", "echo", "eval", "exit",
    "export", "false", "fg", "hash", "jobs", "kill", "let", "local", "printf", "pwd", "read",
    "readonly", "return", "set", "shift", "source", "test", "true", "type", "typeset", "unalias",
    "unset", "wait",
];

/// POSIX special built-ins: prefix assignments persist after them
pub const SPECIAL_BUILTINS: &[&str] = &[
    ":", ".", "break", "continue", "eval", "exit", "export", "readonly", "return", "set", "shift",
    "source", "unset",
];

pub const KEYWORDS: &[&str] = &[
    "if", "then", "elif", "else", "fi", "for", "in", "do", "done", "while", "until", "case",
    "esac", "function", "{", "}", "!",
];

pub fn is_builtin(name: &str) -> bool {
    SHELL_BUILTINS.contains(&name)
}

pub fn is_special_builtin(name: &str) -> bool {
    SPECIAL_BUILTINS.contains(&name)
}

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// Resolves command names against PATH, remembering hits
#[derive(Debug, Clone, Default)]
pub struct CommandResolver {
    /// Remembered name -> path entries
    table: BTreeMap<String, PathBuf>,
    /// PATH value the table was built against
    path_value: String,
}

impl CommandResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find an executable. Names containing `/` resolve against `cwd`
    /// without consulting PATH. Returns `None` when nothing matches.
    pub fn resolve(&mut self, name: &str, path_var: &str, cwd: &Path) -> Option<PathBuf> {
        if name.contains('/') {
            let path = cwd.join(name);
            return path.exists().then_some(path);
        }
        if path_var != self.path_value {
            // PATH changed: every remembered location is suspect
            self.table.clear();
            self.path_value = path_var.to_string();
        }
        if let Some(path) = self.table.get(name) {
            if is_executable(path) {
                return Some(path.clone());
            }
            self.table.remove(name);
        }
        let found = search_path(name, path_var, cwd)?;
        self.table.insert(name.to_string(), found.clone());
        Some(found)
    }

    pub fn forget_all(&mut self) {
        self.table.clear();
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.table.iter()
    }
}

fn search_path(name: &str, path_var: &str, cwd: &Path) -> Option<PathBuf> {
    path_var
        .split(':')
        .map(|dir| if dir.is_empty() { Path::new(".") } else { Path::new(dir) })
        .map(|dir| cwd.join(dir).join(name))
        .find(|candidate| is_executable(candidate))
}

/// Check if a path is an executable regular file
pub fn is_executable(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_tables() {
        assert!(is_builtin("cd"));
        assert!(is_builtin("["));
        assert!(!is_builtin("ls"));
        assert!(is_special_builtin("export"));
        assert!(!is_special_builtin("echo"));
        assert!(is_keyword("esac"));
    }

    #[test]
    fn test_missing_command() {
        let mut resolver = CommandResolver::new();
        let cwd = std::env::current_dir().unwrap();
        assert!(resolver
            .resolve("nonexistent_cmd_xyz", "/usr/bin:/bin", &cwd)
            .is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_path_lookup_is_remembered() {
        let mut resolver = CommandResolver::new();
        let cwd = std::env::current_dir().unwrap();
        let found = resolver.resolve("sh", "/usr/bin:/bin", &cwd).unwrap();
        assert!(found.ends_with("sh"));
        assert_eq!(resolver.entries().count(), 1);
        // A different PATH invalidates the table
        resolver.resolve("sh", "/bin", &cwd);
        assert!(resolver.entries().all(|(_, p)| p.starts_with("/bin")));
        resolver.forget_all();
        assert_eq!(resolver.entries().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plain"), "data").unwrap();
        let mut resolver = CommandResolver::new();
        let path = dir.path().to_string_lossy().into_owned();
        assert!(resolver.resolve("plain", &path, dir.path()).is_none());
    }
}

use std::path::{Path, PathBuf};

use posh::config::home_dir;
use posh::{Shell, ShellError};
use tracing::debug;

fn poshrc_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".poshrc"))
}

/// Run one startup file. Returns the status to exit with when the file
/// ran `exit`.
fn source_file(shell: &mut Shell, path: &Path) -> Option<i32> {
    if !path.is_file() {
        return None;
    }
    debug!(file = %path.display(), "sourcing startup file");
    let display = path.to_string_lossy().into_owned();
    match shell.execute_file(path) {
        Ok(_) => None,
        Err(e) if e.is_exit() => Some(e.exit_code()),
        Err(ShellError::Parse(errors)) => {
            for err in errors.iter() {
                eprintln!("posh: {}: {}", display, err);
            }
            None
        }
        Err(e) => {
            eprintln!("posh: {}: {}", display, e);
            None
        }
    }
}

/// Source `~/.poshrc` for interactive shells
pub(crate) fn load_poshrc(shell: &mut Shell) -> Option<i32> {
    let path = poshrc_path()?;
    source_file(shell, &path)
}

/// Source the first of `~/.posh_profile` and `~/.profile` that exists
pub(crate) fn load_profile(shell: &mut Shell) -> Option<i32> {
    let home = home_dir()?;
    let profile = [home.join(".posh_profile"), home.join(".profile")]
        .into_iter()
        .find(|p| p.is_file())?;
    source_file(shell, &profile)
}

use posh::Shell;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const DEFAULT_PS1: &str = r"\u@\h:\w\$ ";
pub(crate) const DEFAULT_PS2: &str = "> ";

#[cfg(unix)]
fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// What the prompt escapes draw from
pub(crate) struct PromptContext {
    pub(crate) user: String,
    pub(crate) host: String,
    pub(crate) cwd: String,
    pub(crate) home: Option<String>,
    pub(crate) root: bool,
    pub(crate) status: i32,
    pub(crate) jobs: usize,
}

impl PromptContext {
    pub(crate) fn from_shell(shell: &Shell) -> Self {
        PromptContext {
            user: shell.get_variable("USER").unwrap_or_default(),
            host: host_name(),
            cwd: shell.cwd().to_string_lossy().into_owned(),
            home: shell.get_variable("HOME"),
            root: is_root(),
            status: shell.last_status(),
            jobs: shell.jobs().list().len(),
        }
    }

    /// Working directory with `$HOME` shown as `~`
    fn tilde_cwd(&self) -> String {
        match &self.home {
            Some(home) if !home.is_empty() && self.cwd.starts_with(home.as_str()) => {
                let rest = &self.cwd[home.len()..];
                if rest.is_empty() || rest.starts_with('/') {
                    format!("~{}", rest)
                } else {
                    self.cwd.clone()
                }
            }
            _ => self.cwd.clone(),
        }
    }
}

/// Expand the backslash escapes of a `PS1`/`PS2` string
pub(crate) fn render(template: &str, ctx: &PromptContext) -> String {
    let now = chrono::Local::now();
    let mut out = String::new();
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('u') => out.push_str(&ctx.user),
            Some('h') => out.push_str(ctx.host.split('.').next().unwrap_or("")),
            Some('H') => out.push_str(&ctx.host),
            Some('w') => out.push_str(&ctx.tilde_cwd()),
            Some('W') => {
                let cwd = ctx.tilde_cwd();
                let base = if cwd == "/" {
                    "/"
                } else {
                    cwd.rsplit('/').next().unwrap_or(&cwd)
                };
                out.push_str(base);
            }
            Some('$') => out.push(if ctx.root { '#' } else { '$' }),
            Some('?') => out.push_str(&ctx.status.to_string()),
            Some('j') => out.push_str(&ctx.jobs.to_string()),
            Some('t') => out.push_str(&now.format("%H:%M:%S").to_string()),
            Some('T') => out.push_str(&now.format("%I:%M:%S").to_string()),
            Some('A') => out.push_str(&now.format("%H:%M").to_string()),
            Some('d') => out.push_str(&now.format("%a %b %d").to_string()),
            Some('s') => out.push_str("posh"),
            Some('v') | Some('V') => out.push_str(VERSION),
            Some('n') => out.push('\n'),
            Some('e') => out.push('\x1b'),
            // Non-printing markers only matter to readline's width counting
            Some('[') | Some(']') => {}
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// The primary or continuation prompt for the shell's current state
pub(crate) fn prompt(shell: &Shell, continuation: bool) -> String {
    let (var, default) = if continuation {
        ("PS2", DEFAULT_PS2)
    } else {
        ("PS1", DEFAULT_PS1)
    };
    let template = shell.get_variable(var).unwrap_or_else(|| default.to_string());
    render(&template, &PromptContext::from_shell(shell))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> PromptContext {
        PromptContext {
            user: "ana".to_string(),
            host: "box.example.org".to_string(),
            cwd: "/home/ana/src".to_string(),
            home: Some("/home/ana".to_string()),
            root: false,
            status: 3,
            jobs: 1,
        }
    }

    #[test]
    fn test_default_prompt() {
        assert_eq!(render(DEFAULT_PS1, &ctx()), "ana@box:~/src$ ");
    }

    #[test]
    fn test_escapes() {
        assert_eq!(render(r"\W \? \j \\", &ctx()), "src 3 1 \\");
        assert_eq!(render(r"\H\n\q", &ctx()), "box.example.org\n\\q");
        let mut root = ctx();
        root.root = true;
        root.cwd = "/home/anabel".to_string();
        assert_eq!(render(r"\w\$", &root), "/home/anabel#");
    }
}

use std::io::IsTerminal;
use std::path::Path;
use std::process::ExitCode;

use posh::{Shell, ShellError};
use tracing::debug;

use crate::rcfile;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Parsed command-line arguments
#[derive(Debug, Default, PartialEq)]
pub(crate) struct CliArgs {
    pub(crate) command: Option<String>,
    pub(crate) script: Option<String>,
    /// `$0` for `-c`
    pub(crate) name: Option<String>,
    pub(crate) args: Vec<String>,
    pub(crate) read_stdin: bool,
    pub(crate) interactive: bool,
    pub(crate) login: bool,
    pub(crate) norc: bool,
    /// Single-letter options to preset (`-e`, `-u`, `-x`)
    pub(crate) options: Vec<char>,
    pub(crate) help: bool,
    pub(crate) version: bool,
}

/// Parse command-line arguments (without the program name)
pub(crate) fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--" => {
                i += 1;
                break;
            }
            "--login" => cli.login = true,
            "--norc" => cli.norc = true,
            "--help" => cli.help = true,
            "--version" => cli.version = true,
            "-c" => {
                let cmd = args.get(i + 1).ok_or("-c: option requires an argument")?;
                cli.command = Some(cmd.clone());
                i += 2;
                break;
            }
            _ if arg.starts_with('-') && arg.len() > 1 => {
                for flag in arg[1..].chars() {
                    match flag {
                        'e' | 'u' | 'x' => cli.options.push(flag),
                        'i' => cli.interactive = true,
                        'l' => cli.login = true,
                        's' => cli.read_stdin = true,
                        'h' => cli.help = true,
                        'V' => cli.version = true,
                        other => return Err(format!("-{}: invalid option", other)),
                    }
                }
            }
            _ => break,
        }
        i += 1;
    }

    let rest = &args[i.min(args.len())..];
    if cli.command.is_some() {
        if let Some((name, args)) = rest.split_first() {
            cli.name = Some(name.clone());
            cli.args = args.to_vec();
        }
    } else if cli.read_stdin {
        cli.args = rest.to_vec();
    } else if let Some((script, args)) = rest.split_first() {
        cli.script = Some(script.clone());
        cli.args = args.to_vec();
    }
    Ok(cli)
}

pub(crate) fn print_help() {
    println!(
        r#"posh {} - a POSIX-style shell

USAGE:
    posh [options] [script [args...]]
    posh [options] -c command [name [args...]]
    posh [options] -s [args...]

OPTIONS:
    -c <command>        Run a command string
    -s                  Read commands from standard input
    -i                  Force an interactive shell
    -l, --login         Login shell: source ~/.posh_profile or ~/.profile
    -e, -u, -x          Start with errexit, nounset or xtrace set
    --norc              Do not read ~/.poshrc
    -h, --help          Show this help message
    -V, --version       Show version

ENVIRONMENT:
    POSH_LOG            Log filter for diagnostics (default: warn)
    POSH_HISTFILE       History file (default: ~/.posh_history)
    POSH_HISTSIZE       History entries kept (default: 1000)
    POSH_MAX_RECURSION  Function nesting limit (default: 1000)"#,
        VERSION
    );
}

pub(crate) fn print_version() {
    println!("posh {}", VERSION);
}

/// Process exit code for a shell status
pub(crate) fn exit_code(status: i32) -> ExitCode {
    ExitCode::from((status & 0xff) as u8)
}

fn new_shell(cli: &CliArgs) -> Shell {
    let mut shell = Shell::new();
    for flag in &cli.options {
        shell.options_mut().set_flag(*flag, true);
    }
    shell.set_positional(cli.args.clone());
    shell
}

/// Status to exit with after a top-level call returned
fn finish(shell: &Shell, result: Result<i32, ShellError>) -> i32 {
    match result {
        Ok(status) => status,
        Err(ShellError::Parse(errors)) => {
            for err in errors.iter() {
                eprintln!("posh: {}", err);
            }
            2
        }
        Err(e) if e.is_exit() => e.exit_code(),
        Err(e) => {
            eprintln!("posh: {}", e);
            if shell.last_status() != 0 {
                shell.last_status()
            } else {
                e.exit_code()
            }
        }
    }
}

/// Dispatch on the parsed arguments
pub(crate) fn run(cli: CliArgs) -> ExitCode {
    if cli.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if cli.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let mut shell = new_shell(&cli);
    if cli.login {
        if let Some(code) = rcfile::load_profile(&mut shell) {
            return exit_code(code);
        }
    }

    if let Some(cmd) = &cli.command {
        if let Some(name) = &cli.name {
            shell.set_script_name(name);
        }
        debug!(command = %cmd, "running -c");
        let result = shell.execute(cmd);
        return exit_code(finish(&shell, result));
    }

    if let Some(script) = &cli.script {
        return exit_code(run_script(&mut shell, script));
    }

    let interactive = cli.interactive || (std::io::stdin().is_terminal() && !cli.read_stdin);
    if interactive {
        return exit_code(crate::repl::run(shell, cli.norc));
    }
    let result = shell.execute_stream(std::io::stdin().lock());
    exit_code(finish(&shell, result))
}

fn run_script(shell: &mut Shell, script: &str) -> i32 {
    let path = Path::new(script);
    if let Err(e) = std::fs::metadata(shell.cwd().join(path)) {
        let message = match e.kind() {
            std::io::ErrorKind::NotFound => "No such file or directory".to_string(),
            _ => e.to_string(),
        };
        eprintln!("posh: {}: {}", script, message);
        return 127;
    }
    shell.set_script_name(script);
    debug!(script, "running script");
    let result = shell.execute_file(path);
    finish(shell, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_args(&args).unwrap()
    }

    #[test]
    fn test_command_with_name_and_args() {
        let cli = parse(&["-e", "-c", "echo $0 $1", "prog", "a", "b"]);
        assert_eq!(cli.command.as_deref(), Some("echo $0 $1"));
        assert_eq!(cli.name.as_deref(), Some("prog"));
        assert_eq!(cli.args, vec!["a", "b"]);
        assert_eq!(cli.options, vec!['e']);
    }

    #[test]
    fn test_script_and_args() {
        let cli = parse(&["-xu", "run.sh", "-v", "x"]);
        assert_eq!(cli.script.as_deref(), Some("run.sh"));
        assert_eq!(cli.args, vec!["-v", "x"]);
        assert_eq!(cli.options, vec!['x', 'u']);
    }

    #[test]
    fn test_stdin_mode() {
        let cli = parse(&["-s", "a", "b"]);
        assert!(cli.read_stdin);
        assert_eq!(cli.script, None);
        assert_eq!(cli.args, vec!["a", "b"]);
    }

    #[test]
    fn test_flags() {
        let cli = parse(&["--login", "--norc", "-i"]);
        assert!(cli.login && cli.norc && cli.interactive);
        assert!(parse_args(&["-q".to_string()]).is_err());
        assert!(parse_args(&["-c".to_string()]).is_err());
    }
}

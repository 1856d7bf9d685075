//! Command-line interface for the shell-relay daemon.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Clone)]
pub struct Args {
    /// Host address to bind to.
    pub host: IpAddr,
    /// Port to listen on.
    pub port: u16,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Path to the persisted entries file.
    pub entries: Option<PathBuf>,
    /// Per-command deadline in seconds.
    pub command_timeout_secs: Option<u64>,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".parse().unwrap(),
            port: 21721,
            config: None,
            entries: None,
            command_timeout_secs: None,
            log_level: None,
            version: false,
            help: false,
        }
    }
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('H') | Long("host") => {
                let value: String = parser.value()?.parse()?;
                result.host = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("host", value))?;
            }
            Short('p') | Long("port") => {
                let value: String = parser.value()?.parse()?;
                result.port = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("port", value))?;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Short('e') | Long("entries") => {
                result.entries = Some(parser.value()?.parse()?);
            }
            Short('t') | Long("command-timeout") => {
                let value: String = parser.value()?.parse()?;
                result.command_timeout_secs = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("command-timeout", value))?,
                );
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"shell-relay {version}
Connection manager and layered shell session engine

USAGE:
    shell-relay [OPTIONS]

OPTIONS:
    -H, --host <ADDR>            Host address to bind [default: 127.0.0.1]
    -p, --port <PORT>            Port to listen on [default: 21721]
    -c, --config <FILE>          Path to configuration file (JSON)
    -e, --entries <FILE>         Path to the persisted entries file
    -t, --command-timeout <SECS> Per-command deadline in seconds
    -l, --log-level <LVL>        Log level (error, warn, info, debug, trace)
    -h, --help                   Print help
    -V, --version                Print version

ENVIRONMENT VARIABLES:
    SHELL_RELAY_HOST             Host address (overrides config)
    SHELL_RELAY_PORT             Port number (overrides config)
    SHELL_RELAY_ENTRIES          Entries file path (overrides config)
    SHELL_RELAY_COMMAND_TIMEOUT  Per-command deadline (overrides config)
    SHELL_RELAY_LOG_LEVEL        Log level (overrides config)
    RUST_LOG                     Alternative log level setting

EXAMPLES:
    # Start with defaults (localhost:21721, empty store)
    shell-relay

    # Start with a persisted connection store
    shell-relay -e ~/.config/shell-relay/entries.json

    # Start with a config file
    shell-relay -c /etc/shell-relay/config.json
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("shell-relay {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(args: &[&str]) -> Vec<OsString> {
        std::iter::once("shell-relay")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn test_default_args() {
        let result = parse_args_from(args(&[])).unwrap();
        assert_eq!(result.host.to_string(), "127.0.0.1");
        assert_eq!(result.port, 21721);
        assert!(result.entries.is_none());
    }

    #[test]
    fn test_host_port() {
        let result = parse_args_from(args(&["-H", "0.0.0.0", "-p", "8080"])).unwrap();
        assert_eq!(result.host.to_string(), "0.0.0.0");
        assert_eq!(result.port, 8080);
    }

    #[test]
    fn test_entries_file() {
        let result = parse_args_from(args(&["-e", "/tmp/entries.json"])).unwrap();
        assert_eq!(result.entries, Some(PathBuf::from("/tmp/entries.json")));
    }

    #[test]
    fn test_command_timeout() {
        let result = parse_args_from(args(&["--command-timeout", "90"])).unwrap();
        assert_eq!(result.command_timeout_secs, Some(90));
    }

    #[test]
    fn test_config_file() {
        let result = parse_args_from(args(&["-c", "/etc/config.json"])).unwrap();
        assert_eq!(result.config, Some(PathBuf::from("/etc/config.json")));
    }

    #[test]
    fn test_help_flag() {
        let result = parse_args_from(args(&["-h"])).unwrap();
        assert!(result.help);

        let result = parse_args_from(args(&["--help"])).unwrap();
        assert!(result.help);
    }

    #[test]
    fn test_version_flag() {
        let result = parse_args_from(args(&["-V"])).unwrap();
        assert!(result.version);
    }

    #[test]
    fn test_log_level() {
        let result = parse_args_from(args(&["-l", "debug"])).unwrap();
        assert_eq!(result.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_invalid_port() {
        assert!(parse_args_from(args(&["-p", "invalid"])).is_err());
    }

    #[test]
    fn test_invalid_host() {
        assert!(parse_args_from(args(&["-H", "not-an-ip"])).is_err());
    }

    #[test]
    fn test_unexpected_positional() {
        assert!(parse_args_from(args(&["stray"])).is_err());
    }

    #[test]
    fn test_combined_options() {
        let result = parse_args_from(args(&[
            "-H",
            "0.0.0.0",
            "-p",
            "8080",
            "-e",
            "/tmp/e.json",
            "-l",
            "debug",
            "-t",
            "45",
        ]))
        .unwrap();

        assert_eq!(result.host.to_string(), "0.0.0.0");
        assert_eq!(result.port, 8080);
        assert_eq!(result.entries, Some(PathBuf::from("/tmp/e.json")));
        assert_eq!(result.log_level, Some("debug".to_string()));
        assert_eq!(result.command_timeout_secs, Some(45));
    }
}

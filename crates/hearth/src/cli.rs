//! Command-line interface for the hearth host.

use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Command line arguments. Everything except `config_path` overrides a
/// setting from the configuration file.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: PathBuf,
    /// Extra search path, tried before the configured ones
    pub plugin_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub json_logs: bool,
    /// Print discovered plugin files and exit
    pub list: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    pub fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("hearth.toml")),
            plugin_dir: matches.get_one::<String>("plugins").map(PathBuf::from),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            list: matches.get_flag("list"),
        }
    }
}

pub fn command() -> Command {
    Command::new("hearth")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Plugin host: loads versioned plugins and wires their events and services")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("hearth.toml"),
        )
        .arg(
            Arg::new("plugins")
                .short('p')
                .long("plugins")
                .value_name("DIR")
                .help("Additional plugin search path, searched first"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list")
                .long("list")
                .help("List plugin files found in the search paths and exit")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::from_matches(&command().try_get_matches_from(args).unwrap())
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["hearth"]);
        assert_eq!(args.config_path, PathBuf::from("hearth.toml"));
        assert_eq!(args.plugin_dir, None);
        assert_eq!(args.log_level, None);
        assert!(!args.json_logs);
        assert!(!args.list);
    }

    #[test]
    fn test_overrides() {
        let args = parse(&[
            "hearth",
            "-c",
            "custom.toml",
            "--plugins",
            "target/debug",
            "-l",
            "debug",
            "--json-logs",
            "--list",
        ]);
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.plugin_dir, Some(PathBuf::from("target/debug")));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
        assert!(args.list);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(command().try_get_matches_from(["hearth", "--bind", "x"]).is_err());
    }
}

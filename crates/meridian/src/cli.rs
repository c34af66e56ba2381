//! Command-line interface for the Meridian module host.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Command line arguments, used to override configuration file settings.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file.
    pub config_path: PathBuf,
    /// Optional override for the log level.
    pub log_level: Option<String>,
    /// Whether to force JSON log output.
    pub json_logs: bool,
    /// Whether to disable the telemetry module for this run.
    pub no_telemetry: bool,
}

impl CliArgs {
    /// Parses command line arguments using clap.
    pub fn parse() -> Self {
        let matches = Command::new("Meridian Module Host")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Modular server host with lifecycle-managed modules, a typed message bus, and session management")
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("meridian.toml"),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level override (trace, debug, info, warn, error)"),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Force JSON log output")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new("no-telemetry")
                    .long("no-telemetry")
                    .help("Disable the telemetry module for this run")
                    .action(ArgAction::SetTrue),
            )
            .get_matches();

        Self {
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or("meridian.toml"),
            ),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            no_telemetry: matches.get_flag("no-telemetry"),
        }
    }
}

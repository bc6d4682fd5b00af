use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// icsfusion - merge booking calendar feeds into one deduplicated calendar
#[derive(Debug, Parser)]
#[command(name = "icsfusion")]
#[command(about = "Merge and translate iCalendar booking feeds", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to the config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch, merge and translate once, then print the report as JSON
    Sync,

    /// Sync on the configured interval until interrupted
    Watch,

    /// Serve the published calendars over HTTP and sync in the background
    Serve {
        /// Bind address, overrides [server] host
        #[arg(long)]
        host: Option<String>,

        /// Bind port, overrides [server] port
        #[arg(long)]
        port: Option<u16>,

        /// Do not run the periodic sync alongside the server
        #[arg(long)]
        no_sync: bool,
    },

    /// Merge local ICS files without fetching anything
    Merge {
        /// Input files as ORIGIN=PATH, in priority order
        #[arg(required = true, num_args = 1.., value_parser = parse_origin_path)]
        inputs: Vec<(String, PathBuf)>,

        /// Origin whose events win conflicts (defaults to the first input)
        #[arg(long)]
        primary: Option<String>,

        /// Write the merged calendar here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Translate the SUMMARY lines of an ICS file
    Translate {
        #[arg(required = true)]
        file: PathBuf,

        /// Write the translated calendar here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigActions {
    /// Print the effective configuration as TOML
    Show,

    /// Print the config file location
    Path,
}

fn parse_origin_path(value: &str) -> Result<(String, PathBuf), String> {
    match value.split_once('=') {
        Some((origin, path)) if !origin.trim().is_empty() && !path.is_empty() => {
            Ok((origin.trim().to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected ORIGIN=PATH, got '{}'", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_parse_merge_command() {
        let cli = Cli::try_parse_from([
            "icsfusion",
            "merge",
            "airbnb=a.ics",
            "booking=feeds/b.ics",
            "--primary",
            "booking",
            "-o",
            "out.ics",
        ])
        .unwrap();

        match cli.command {
            Commands::Merge { inputs, primary, output } => {
                assert_eq!(inputs[0], ("airbnb".to_string(), PathBuf::from("a.ics")));
                assert_eq!(inputs[1], ("booking".to_string(), PathBuf::from("feeds/b.ics")));
                assert_eq!(primary.as_deref(), Some("booking"));
                assert_eq!(output, Some(PathBuf::from("out.ics")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["icsfusion", "sync", "--config", "/tmp/c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.toml")));
        assert!(matches!(cli.command, Commands::Sync));
    }

    #[test_case("a.ics" ; "missing separator")]
    #[test_case("=a.ics" ; "empty origin")]
    #[test_case("airbnb=" ; "empty path")]
    fn test_rejects_bad_merge_input(input: &str) {
        assert!(Cli::try_parse_from(["icsfusion", "merge", input]).is_err());
    }

    #[test]
    fn test_config_actions() {
        let cli = Cli::try_parse_from(["icsfusion", "config", "path"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { action: ConfigActions::Path }));
    }
}

//! Command-line interface for netsentry.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::LoggingConfig;

/// netsentry - network reachability and stability monitor
#[derive(Parser, Debug)]
#[command(
    name = "netsentry",
    author,
    version,
    about = "Network reachability and stability monitor",
    long_about = r#"
netsentry decides whether this machine has usable internet connectivity,
how good it is and whether a VPN is up, and reports only confirmed,
debounced transitions.

  - Fast interface polling with significant-change detection
  - DNS resolution through native and OS lookup strategies
  - Weighted TCP/HTTP endpoint probes with VPN-aware ambiguity handling
  - Hysteresis, consensus and flip-flop suppression before any transition

QUICK START:
  netsentry check
  netsentry watch
  netsentry resolve www.google.com
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "NETSENTRY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Layer command-line logging flags over the config file's settings.
    pub fn apply_logging_overrides(&self, logging: &mut LoggingConfig) {
        if let Some(ref level) = self.log_level {
            logging.level.clone_from(level);
        }
        if self.no_color {
            logging.color = false;
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the monitor and print every confirmed transition
    Watch(WatchArgs),

    /// Run one comprehensive check and print the state
    Check(CheckArgs),

    /// Show network interfaces
    Interfaces(InterfacesArgs),

    /// Resolve a hostname through the DNS strategy chain
    Resolve(ResolveArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),

    /// Show example configuration
    Config(ConfigArgs),
}

/// Watch command arguments
#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Print the initial state before waiting for transitions
    #[arg(long)]
    pub initial: bool,

    /// Override the consensus threshold
    #[arg(long)]
    pub consensus: Option<u32>,
}

/// Check command arguments
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Show per-signal diagnostics and interfaces
    #[arg(short, long)]
    pub detailed: bool,
}

/// Interfaces command arguments
#[derive(Args, Debug, Clone)]
pub struct InterfacesArgs {
    /// Include loopback and interfaces without routable addresses
    #[arg(short, long)]
    pub all: bool,
}

/// Resolve command arguments
#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    /// Hostname to resolve
    pub host: String,

    /// Only run the OS lookup command strategy
    #[arg(long)]
    pub command_only: bool,
}

/// Completions command arguments
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Shell for completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "netsentry",
            "--format",
            "json",
            "--no-color",
            "resolve",
            "example.com",
        ])
        .unwrap();

        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.no_color);
        match cli.command {
            Commands::Resolve(args) => {
                assert_eq!(args.host, "example.com");
                assert!(!args.command_only);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_logging_flags_override_config() {
        let mut logging = LoggingConfig {
            level: "debug".into(),
            format: "json".into(),
            file: Some(PathBuf::from("/var/log/netsentry.log")),
            color: true,
        };

        let cli = Cli::try_parse_from(["netsentry", "check"]).unwrap();
        cli.apply_logging_overrides(&mut logging);
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, "json");
        assert!(logging.file.is_some());
        assert!(logging.color);

        let cli =
            Cli::try_parse_from(["netsentry", "-l", "trace", "--no-color", "check"]).unwrap();
        cli.apply_logging_overrides(&mut logging);
        assert_eq!(logging.level, "trace");
        assert_eq!(logging.format, "json");
        assert!(!logging.color);
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}

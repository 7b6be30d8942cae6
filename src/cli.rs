//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// Config Repository - Keep pipeline configuration in sync with version control
#[derive(Parser, Debug)]
#[command(name = "config-repo")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(
        long,
        global = true,
        value_name = "LEVEL",
        default_value = "warn",
        env = "CONFIG_REPO_LOG_LEVEL"
    )]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update every declared config repository and merge the results
    Sync(commands::sync::SyncArgs),

    /// Validate the configuration fragments in a local directory
    Validate(commands::validate::ValidateArgs),

    /// Print the fingerprint of each declared config repository
    Fingerprint(commands::fingerprint::FingerprintArgs),

    /// Show the persisted update state of each config repository
    Status(commands::status::StatusArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);

        match self.command {
            Commands::Sync(args) => commands::sync::execute(args, &self.color),
            Commands::Validate(args) => commands::validate::execute(args, &self.color),
            Commands::Fingerprint(args) => commands::fingerprint::execute(args, &self.color),
            Commands::Status(args) => commands::status::execute(args, &self.color),
        }
    }
}

/// Route `log` records to stderr at `level`, which accepts any
/// `env_logger` filter string such as `info` or `config_repo::engine=debug`.
fn init_logging(level: &str) {
    let _ = env_logger::Builder::new()
        .parse_filters(level)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_with_only() {
        let cli = Cli::try_parse_from(["config-repo", "sync", "--only", "a", "--only", "b"]).unwrap();
        match cli.command {
            Commands::Sync(args) => assert_eq!(args.only, vec!["a".to_string(), "b".to_string()]),
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["config-repo", "validate", ".", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.log_level, "debug");
    }
}

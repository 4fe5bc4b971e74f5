//! Command line interface

use clap::{Parser, Subcommand};

/// Strategy retraining orchestrator
#[derive(Parser, Debug)]
#[command(name = "ploy-retrain")]
#[command(author, version, about = "Automated retraining orchestration for betting strategies")]
pub struct Cli {
    /// Directory holding default.toml and per-environment overrides
    #[arg(short, long, env = "PLOY_RETRAIN_CONFIG_DIR", default_value = "config")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run detector, scheduler and engine until Ctrl+C / SIGTERM
    Run {
        /// Use simulated collaborators (data, optimizer, validator, monitors)
        #[arg(long)]
        dry_run: bool,

        /// Seconds running jobs get to wind down on shutdown
        #[arg(long, default_value_t = 30)]
        drain_secs: u64,

        /// Seconds between status log lines (0 disables)
        #[arg(long, default_value_t = 300)]
        status_interval_secs: u64,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["ploy-retrain", "--config", "/etc/retrain", "run", "--dry-run"])
            .unwrap();
        assert_eq!(cli.config, "/etc/retrain");
        match cli.command {
            Commands::Run {
                dry_run,
                drain_secs,
                status_interval_secs,
            } => {
                assert!(dry_run);
                assert_eq!(drain_secs, 30);
                assert_eq!(status_interval_secs, 300);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_config() {
        let cli = Cli::try_parse_from(["ploy-retrain", "show-config"]).unwrap();
        assert!(matches!(cli.command, Commands::ShowConfig));
    }
}

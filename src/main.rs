use clap::Parser;
use ploy_retrain::cli::{Cli, Commands};
use ploy_retrain::collaborators::Collaborators;
use ploy_retrain::config::AppConfig;
use ploy_retrain::error::{Result, RetrainError};
use ploy_retrain::orchestrator::{shutdown_signal, Orchestrator};
use std::time::Duration;
use tracing::{error, info};

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    match cli.command {
        Commands::ShowConfig => {
            init_logging_simple();
            let rendered = toml::to_string_pretty(&config)
                .map_err(|e| RetrainError::Other(anyhow::anyhow!("render config: {}", e)))?;
            println!("{}", rendered);
        }
        Commands::Run {
            dry_run,
            drain_secs,
            status_interval_secs,
        } => {
            init_logging(&config.logging);
            if !dry_run {
                error!("Only --dry-run is available from the command line; real collaborators are wired by the embedding service");
                return Err(RetrainError::InvalidConfiguration(
                    "run requires --dry-run".to_string(),
                ));
            }
            run(config, Duration::from_secs(drain_secs), status_interval_secs).await?;
        }
    }
    Ok(())
}

async fn run(config: AppConfig, drain: Duration, status_interval_secs: u64) -> Result<()> {
    info!(
        strategies = config.strategies.len(),
        max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
        "Starting retraining orchestrator (dry run)"
    );

    let mut orchestrator = Orchestrator::build(config, Collaborators::simulated()).await?;
    orchestrator.start().await?;

    if status_interval_secs == 0 {
        shutdown_signal().await;
    } else {
        let mut ticker = tokio::time::interval(Duration::from_secs(status_interval_secs));
        ticker.tick().await;
        let signal = shutdown_signal();
        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => break,
                _ = ticker.tick() => {
                    let status = orchestrator.status().await;
                    info!(
                        queued = status.scheduler.queue.current_size,
                        running = status.scheduler.running,
                        locked = ?status.scheduler.locked_strategies,
                        active_triggers = status.triggers.active,
                        completed = status.engine.completed,
                        rolled_back = status.engine.rolled_back,
                        "Orchestrator status"
                    );
                }
            }
        }
    }

    orchestrator.shutdown(drain).await;
    Ok(())
}

//! Wires the trigger detector, job scheduler and retraining engine together
//!
//! Startup order: audit sink, restart recovery, strategy registration,
//! baselines, then the background loops. Shutdown runs in reverse: stop
//! accepting work (scheduler), stop detection, then drain the engine.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::engine::{EngineStatus, RetrainingEngine};
use crate::error::{Result, RetrainError};
use crate::persistence::{AuditSink, InMemoryAuditLog, PostgresAuditStore};
use crate::scheduler::{JobScheduler, Schedule, SchedulerStatus};
use crate::triggers::{TriggerDetector, TriggerStatistics};

/// Time allowed for background loops to exit after the engine has drained
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub scheduler: SchedulerStatus,
    pub engine: EngineStatus,
    pub triggers: TriggerStatistics,
}

pub struct Orchestrator {
    config: AppConfig,
    engine: RetrainingEngine,
    detector: TriggerDetector,
    scheduler: JobScheduler,
    audit: Arc<dyn AuditSink>,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build with the audit sink the configuration asks for: PostgreSQL when a
    /// database is configured, otherwise an in-memory log
    pub async fn build(config: AppConfig, collaborators: Collaborators) -> Result<Self> {
        let audit: Arc<dyn AuditSink> = match &config.database {
            Some(db) => {
                let store = PostgresAuditStore::connect(&db.url, db.max_connections).await?;
                store.initialize().await?;
                Arc::new(store)
            }
            None => {
                info!("No database configured, audit trail kept in memory");
                Arc::new(InMemoryAuditLog::new())
            }
        };
        Ok(Self::with_audit(config, collaborators, audit))
    }

    pub fn with_audit(
        config: AppConfig,
        collaborators: Collaborators,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let engine =
            RetrainingEngine::new(config.engine.clone(), collaborators.clone(), audit.clone());
        let detector = TriggerDetector::new(config.triggers.clone(), collaborators);
        let scheduler =
            JobScheduler::new(config.scheduler.clone(), engine.clone(), detector.clone());
        Self {
            config,
            engine,
            detector,
            scheduler,
            audit,
            handles: Vec::new(),
        }
    }

    pub fn engine(&self) -> &RetrainingEngine {
        &self.engine
    }

    pub fn detector(&self) -> &TriggerDetector {
        &self.detector
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    /// Register configured strategies and their schedules without starting any loop.
    /// Returns the ids of jobs that were marked failed by restart recovery.
    pub async fn prepare(&self) -> Result<Vec<Uuid>> {
        self.config
            .validate()
            .map_err(|errors| RetrainError::InvalidConfiguration(errors.join("; ")))?;

        let recovered = self.engine.recover_interrupted().await?;
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "Jobs interrupted by restart marked as failed");
        }

        for strategy in &self.config.strategies {
            self.detector.register_strategy(&strategy.name).await;

            if let Some(configuration) = &strategy.configuration {
                self.scheduler
                    .set_strategy_configuration(&strategy.name, configuration.clone())
                    .await?;
            }

            if let Some(spec) = strategy.schedule_spec() {
                let mut schedule = Schedule::new(&strategy.name, spec)
                    .with_priority(strategy.priority)
                    .with_kind(strategy.retraining_kind);
                if let Some(configuration) = &strategy.configuration {
                    schedule = schedule.with_configuration(configuration.clone());
                }
                if !strategy.enabled {
                    schedule = schedule.disabled();
                }
                self.scheduler.add_schedule(schedule).await?;
            }
        }

        self.detector.initialize().await?;
        info!(
            strategies = self.config.strategies.len(),
            "Retraining orchestrator prepared"
        );
        Ok(recovered)
    }

    /// Prepare, then start the engine monitor, detector sweeps and scheduler loops
    pub async fn start(&mut self) -> Result<()> {
        self.prepare().await?;
        self.engine.start();
        self.handles.extend(self.detector.start());
        self.handles.extend(self.scheduler.start());
        info!(tasks = self.handles.len(), "Retraining orchestrator started");
        Ok(())
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            scheduler: self.scheduler.get_scheduler_status().await,
            engine: self.engine.get_engine_status().await,
            triggers: self.detector.get_trigger_statistics().await,
        }
    }

    /// Ordered shutdown; `drain` bounds how long running jobs get to observe cancellation
    pub async fn shutdown(self, drain: Duration) {
        info!("Shutting down retraining orchestrator");
        self.scheduler.stop();
        self.detector.stop();
        self.engine.shutdown(drain).await;

        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        match tokio::time::timeout(LOOP_JOIN_TIMEOUT, join_all(self.handles)).await {
            Ok(results) => {
                for e in results.into_iter().filter_map(|r| r.err()) {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
            Err(_) => {
                warn!("Background tasks did not stop within {:?}, aborting", LOOP_JOIN_TIMEOUT);
                for abort in aborts {
                    abort.abort();
                }
            }
        }
        info!("Retraining orchestrator stopped");
    }
}

/// Resolves on Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::domain::JobPriority;

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.strategies = vec![
            StrategyConfig {
                cron: Some("0 4 * * *".into()),
                priority: JobPriority::High,
                ..StrategyConfig::new("sharp_action")
            },
            StrategyConfig::new("line_movement"),
        ];
        config
    }

    #[tokio::test]
    async fn test_prepare_registers_strategies_and_schedules() {
        let orchestrator = Orchestrator::with_audit(
            config(),
            Collaborators::simulated(),
            Arc::new(InMemoryAuditLog::new()),
        );
        let recovered = orchestrator.prepare().await.unwrap();
        assert!(recovered.is_empty());

        let mut strategies = orchestrator.detector().strategies().await;
        strategies.sort();
        assert_eq!(strategies, vec!["line_movement", "sharp_action"]);

        let schedules = orchestrator.scheduler().get_schedules().await;
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].strategy_name, "sharp_action");
        assert_eq!(schedules[0].priority, JobPriority::High);
        assert!(schedules[0].next_run.is_some());
    }

    #[tokio::test]
    async fn test_invalid_configuration_refused() {
        let mut config = config();
        config.scheduler.max_concurrent_jobs = 0;
        let orchestrator = Orchestrator::with_audit(
            config,
            Collaborators::simulated(),
            Arc::new(InMemoryAuditLog::new()),
        );
        assert!(matches!(
            orchestrator.prepare().await,
            Err(RetrainError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_shutdown() {
        let mut orchestrator = Orchestrator::with_audit(
            config(),
            Collaborators::simulated(),
            Arc::new(InMemoryAuditLog::new()),
        );
        orchestrator.start().await.unwrap();
        let status = orchestrator.status().await;
        assert_eq!(status.scheduler.schedules_total, 1);
        orchestrator.shutdown(Duration::from_secs(1)).await;
    }
}

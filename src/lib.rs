pub mod cli;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod persistence;
pub mod scheduler;
pub mod triggers;

pub use collaborators::Collaborators;
pub use config::AppConfig;
pub use engine::{EngineStatus, RetrainingEngine};
pub use error::{Result, RetrainError};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use persistence::{AuditSink, InMemoryAuditLog, PostgresAuditStore};
pub use scheduler::{JobScheduler, Schedule, ScheduleSpec, SchedulerStatus};
pub use triggers::{TriggerDetector, TriggerStatistics};

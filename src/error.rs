use thiserror::Error;

/// Main error type for the retraining orchestrator
#[derive(Error, Debug)]
pub enum RetrainError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid retraining configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Stage errors (terminal for the job that raised them)
    #[error("Data validation failed: {0}")]
    Validation(String),

    #[error("Optimization failed: {0}")]
    Optimization(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Regression detected at {stage_pct}% rollout: {reason}")]
    RegressionDetected { stage_pct: u8, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Scheduling
    #[error("Strategy {0} is locked by a running job")]
    SchedulingConflict(String),

    #[error("Engine at capacity: {active}/{max} active jobs")]
    Capacity { active: usize, max: usize },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job {0} is no longer active")]
    JobNotActive(uuid::Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    // Collaborator errors
    #[error("Collaborator {collaborator} failed: {reason}")]
    Collaborator { collaborator: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RetrainError {
    pub fn collaborator(collaborator: &str, reason: impl std::fmt::Display) -> Self {
        RetrainError::Collaborator {
            collaborator: collaborator.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors that end a job without it being a failure of the job itself
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RetrainError::Cancelled)
    }
}

/// Result type alias for RetrainError
pub type Result<T> = std::result::Result<T, RetrainError>;

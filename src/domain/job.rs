//! Scheduler-side job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use super::model::RetrainingConfiguration;
use super::state::RetrainingState;
use super::trigger::TriggerCondition;

/// Job priority (lower value = more urgent)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    /// Critical performance regression or operator override
    Critical = 0,
    High = 1,
    /// Recurring schedules and routine triggers
    Normal = 2,
    Low = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(JobPriority::Critical),
            "high" => Ok(JobPriority::High),
            "normal" => Ok(JobPriority::Normal),
            "low" => Ok(JobPriority::Low),
            other => Err(format!(
                "invalid priority '{}'; expected critical|high|normal|low",
                other
            )),
        }
    }
}

/// How much of the strategy is re-optimized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainingKind {
    /// Full search over the parameter space
    FullRetrain,
    /// Narrow search around the production parameters
    Incremental,
    /// Only the threshold-style parameters are searched
    ThresholdTuning,
}

impl Default for RetrainingKind {
    fn default() -> Self {
        RetrainingKind::FullRetrain
    }
}

impl fmt::Display for RetrainingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrainingKind::FullRetrain => write!(f, "full_retrain"),
            RetrainingKind::Incremental => write!(f, "incremental"),
            RetrainingKind::ThresholdTuning => write!(f, "threshold_tuning"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Scheduler view of a terminal engine state
    pub fn from_engine_state(state: RetrainingState) -> Option<JobStatus> {
        match state {
            RetrainingState::Completed => Some(JobStatus::Completed),
            RetrainingState::Failed | RetrainingState::RolledBack => Some(JobStatus::Failed),
            RetrainingState::Cancelled => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where a job came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSource {
    Schedule { schedule_id: Uuid },
    Trigger,
    Manual,
}

/// A unit of work owned by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub strategy_name: String,
    pub priority: JobPriority,
    pub scheduled_time: DateTime<Utc>,
    pub retraining_kind: RetrainingKind,
    pub configuration: Arc<RetrainingConfiguration>,
    pub triggers: Vec<TriggerCondition>,
    pub source: JobSource,
    pub status: JobStatus,
    pub engine_job_id: Option<Uuid>,
    /// Terminal engine state, kept to tell RolledBack apart from Failed
    pub engine_state: Option<RetrainingState>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn new(
        strategy_name: &str,
        priority: JobPriority,
        retraining_kind: RetrainingKind,
        configuration: Arc<RetrainingConfiguration>,
        triggers: Vec<TriggerCondition>,
        source: JobSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            priority,
            scheduled_time: Utc::now(),
            retraining_kind,
            configuration,
            triggers,
            source,
            status: JobStatus::Queued,
            engine_job_id: None,
            engine_state: None,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Pin the scheduled time (used by schedules that fire for a past slot)
    pub fn with_scheduled_time(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_time = at;
        self
    }

    pub fn trigger_ids(&self) -> Vec<Uuid> {
        self.triggers.iter().map(|t| t.id).collect()
    }
}

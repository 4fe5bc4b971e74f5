//! Recurring retraining schedules

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{JobPriority, RetrainingConfiguration, RetrainingKind, MAX_DURATION_HOURS};
use crate::error::{Result, RetrainError};

/// When a schedule fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Crontab expression, 5-field (minute first) or 6/7-field (seconds first)
    Cron(String),
    Interval { hours: f64 },
}

impl ScheduleSpec {
    pub fn validate(&self) -> Result<()> {
        match self {
            ScheduleSpec::Cron(expr) => parse_cron(expr).map(|_| ()),
            ScheduleSpec::Interval { hours } if *hours > 0.0 && *hours <= MAX_DURATION_HOURS => {
                Ok(())
            }
            ScheduleSpec::Interval { hours } => Err(RetrainError::InvalidSchedule(format!(
                "interval must be within (0, {}] hours, got {}",
                MAX_DURATION_HOURS, hours
            ))),
        }
    }

    /// Next firing strictly after `from`
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        match self {
            ScheduleSpec::Cron(expr) => Ok(parse_cron(expr)?.after(&from).next()),
            ScheduleSpec::Interval { hours } => {
                self.validate()?;
                let millis = (hours * 3_600_000.0).round() as i64;
                Ok(Some(from + ChronoDuration::milliseconds(millis.max(1))))
            }
        }
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleSpec::Cron(expr) => write!(f, "cron({})", expr),
            ScheduleSpec::Interval { hours } => write!(f, "every {}h", hours),
        }
    }
}

fn parse_cron(expr: &str) -> Result<cron::Schedule> {
    let fields = expr.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {}", expr.trim()),
        6 | 7 => expr.trim().to_string(),
        n => {
            return Err(RetrainError::InvalidSchedule(format!(
                "cron expression '{}' has {} fields; expected 5, 6 or 7",
                expr, n
            )))
        }
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| RetrainError::InvalidSchedule(format!("cron '{}': {}", expr, e)))
}

/// A recurring retraining schedule for one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub strategy_name: String,
    pub spec: ScheduleSpec,
    pub priority: JobPriority,
    pub retraining_kind: RetrainingKind,
    /// Overrides the scheduler default configuration
    pub configuration: Option<Arc<RetrainingConfiguration>>,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn new(strategy_name: &str, spec: ScheduleSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            spec,
            priority: JobPriority::Normal,
            retraining_kind: RetrainingKind::FullRetrain,
            configuration: None,
            enabled: true,
            last_run: None,
            next_run: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: RetrainingKind) -> Self {
        self.retraining_kind = kind;
        self
    }

    pub fn with_configuration(mut self, configuration: RetrainingConfiguration) -> Self {
        self.configuration = Some(Arc::new(configuration));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Recompute `next_run` from `from`. Disabled schedules never run.
    pub fn refresh_next_run(&mut self, from: DateTime<Utc>) -> Result<()> {
        self.next_run = if self.enabled {
            self.spec.next_after(from)?
        } else {
            None
        };
        Ok(())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.map(|at| at <= now).unwrap_or(false)
    }
}

/// Partial update applied by `update_schedule`
#[derive(Debug, Clone, Default)]
pub struct ScheduleUpdate {
    pub spec: Option<ScheduleSpec>,
    pub priority: Option<JobPriority>,
    pub retraining_kind: Option<RetrainingKind>,
    pub configuration: Option<Option<RetrainingConfiguration>>,
    pub enabled: Option<bool>,
}

impl ScheduleUpdate {
    /// Apply to `schedule`; returns true when `next_run` must be recomputed
    pub(crate) fn apply(self, schedule: &mut Schedule) -> Result<bool> {
        let mut timing_changed = false;
        if let Some(spec) = self.spec {
            spec.validate()?;
            timing_changed |= spec != schedule.spec;
            schedule.spec = spec;
        }
        if let Some(configuration) = self.configuration {
            if let Some(cfg) = &configuration {
                cfg.validate()?;
            }
            schedule.configuration = configuration.map(Arc::new);
        }
        if let Some(priority) = self.priority {
            schedule.priority = priority;
        }
        if let Some(kind) = self.retraining_kind {
            schedule.retraining_kind = kind;
        }
        if let Some(enabled) = self.enabled {
            timing_changed |= enabled != schedule.enabled;
            schedule.enabled = enabled;
        }
        Ok(timing_changed)
    }
}

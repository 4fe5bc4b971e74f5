//! Trigger conditions recommending a retrain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::job::JobPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    PerformanceDegradation,
    NewDataAvailable,
    MarketConditionChange,
    Scheduled,
    ManualOverride,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::PerformanceDegradation => "performance_degradation",
            TriggerKind::NewDataAvailable => "new_data_available",
            TriggerKind::MarketConditionChange => "market_condition_change",
            TriggerKind::Scheduled => "scheduled",
            TriggerKind::ManualOverride => "manual_override",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TriggerSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSeverity::Low => "low",
            TriggerSeverity::Medium => "medium",
            TriggerSeverity::High => "high",
            TriggerSeverity::Critical => "critical",
        }
    }

    /// Job priority used when a trigger of this severity is enqueued
    pub fn job_priority(&self) -> JobPriority {
        match self {
            TriggerSeverity::Critical => JobPriority::Critical,
            TriggerSeverity::High => JobPriority::High,
            TriggerSeverity::Medium | TriggerSeverity::Low => JobPriority::Normal,
        }
    }
}

impl fmt::Display for TriggerSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TriggerSeverity {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TriggerSeverity::Low),
            "medium" => Ok(TriggerSeverity::Medium),
            "high" => Ok(TriggerSeverity::High),
            "critical" => Ok(TriggerSeverity::Critical),
            other => Err(format!(
                "invalid severity '{}'; expected low|medium|high|critical",
                other
            )),
        }
    }
}

/// Live metric watched by the performance sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMetric {
    Roi,
    WinRate,
}

impl fmt::Display for PerformanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PerformanceMetric::Roi => write!(f, "roi"),
            PerformanceMetric::WinRate => write!(f, "win_rate"),
        }
    }
}

/// Kind-specific trigger data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerPayload {
    PerformanceDegradation {
        metric: PerformanceMetric,
        baseline_value: f64,
        current_value: f64,
        decline_pct: f64,
        sample_size: u64,
    },
    NewDataAvailable {
        new_samples: u64,
        since: DateTime<Utc>,
    },
    MarketConditionChange {
        indicator: String,
        baseline_value: f64,
        current_value: f64,
        change_pct: f64,
    },
    Scheduled {
        days_since_last_retrain: Option<i64>,
    },
    ManualOverride {
        reason: String,
        requested_by: String,
    },
}

impl TriggerPayload {
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerPayload::PerformanceDegradation { .. } => TriggerKind::PerformanceDegradation,
            TriggerPayload::NewDataAvailable { .. } => TriggerKind::NewDataAvailable,
            TriggerPayload::MarketConditionChange { .. } => TriggerKind::MarketConditionChange,
            TriggerPayload::Scheduled { .. } => TriggerKind::Scheduled,
            TriggerPayload::ManualOverride { .. } => TriggerKind::ManualOverride,
        }
    }
}

/// A detected condition recommending retraining. Immutable apart from `resolved_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub id: Uuid,
    pub strategy_name: String,
    pub severity: TriggerSeverity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
    pub payload: TriggerPayload,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl TriggerCondition {
    pub fn new(
        strategy_name: &str,
        severity: TriggerSeverity,
        description: impl Into<String>,
        payload: TriggerPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            severity,
            description: description.into(),
            detected_at: Utc::now(),
            payload,
            resolved_at: None,
        }
    }

    pub fn kind(&self) -> TriggerKind {
        self.payload.kind()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Relative decline of `current` against `baseline`, in percent.
///
/// Positive when `current` is worse. A zero baseline falls back to the absolute
/// difference scaled to percentage points.
pub fn decline_pct(baseline: f64, current: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        (baseline - current) * 100.0
    } else {
        (baseline - current) / baseline.abs() * 100.0
    }
}

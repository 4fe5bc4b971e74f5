//! Model versions, retraining configuration and engine job records

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::state::RetrainingState;
use crate::error::{Result, RetrainError};

/// Upper bound for every hour-valued setting (ten years)
pub const MAX_DURATION_HOURS: f64 = 87_600.0;

/// Opaque strategy parameters (thresholds, weights, lookbacks...)
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Opaque named metrics reported by collaborators
pub type Metrics = BTreeMap<String, f64>;

/// Closed time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Window of `days` ending at `end`
    pub fn trailing_days(end: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: end - ChronoDuration::days(days as i64),
            end,
        }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// A set of parameters for one strategy, with the metrics that justified it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version_id: String,
    pub strategy_name: String,
    pub parameters: Parameters,
    pub performance_metrics: Metrics,
    pub created_at: DateTime<Utc>,
    pub training_period: Option<TimeWindow>,
    pub is_baseline: bool,
    pub is_production: bool,
}

impl ModelVersion {
    pub fn new(strategy_name: &str, parameters: Parameters, performance_metrics: Metrics) -> Self {
        let created_at = Utc::now();
        Self {
            version_id: format!(
                "{}-{}-{}",
                strategy_name,
                created_at.format("%Y%m%dT%H%M%S"),
                &Uuid::new_v4().simple().to_string()[..8]
            ),
            strategy_name: strategy_name.to_string(),
            parameters,
            performance_metrics,
            created_at,
            training_period: None,
            is_baseline: false,
            is_production: false,
        }
    }

    pub fn with_training_period(mut self, window: TimeWindow) -> Self {
        self.training_period = Some(window);
        self
    }

    pub fn as_baseline(mut self) -> Self {
        self.is_baseline = true;
        self
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.performance_metrics.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationAlgorithm {
    Bayesian,
    Genetic,
    RandomSearch,
    GridSearch,
}

impl fmt::Display for OptimizationAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationAlgorithm::Bayesian => write!(f, "bayesian"),
            OptimizationAlgorithm::Genetic => write!(f, "genetic"),
            OptimizationAlgorithm::RandomSearch => write!(f, "random_search"),
            OptimizationAlgorithm::GridSearch => write!(f, "grid_search"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Basic,
    Standard,
    Rigorous,
}

/// Per-job retraining settings. Immutable once attached to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainingConfiguration {
    pub algorithm: OptimizationAlgorithm,
    /// Optimizer evaluation budget
    pub max_evaluations: u32,
    /// Wall-clock budget for the whole job
    pub timeout_hours: f64,
    pub training_period_days: u32,
    pub validation_period_days: u32,
    pub min_training_samples: u64,
    /// Minimum completeness ratio (0.0 - 1.0) of the training window
    pub data_quality_threshold: f64,
    pub validation_level: ValidationLevel,
    /// Minimum improvement (%) for the A/B analysis to recommend deployment
    pub improvement_threshold_pct: f64,
    /// Required confidence (0.0 - 1.0), e.g. 0.95
    pub significance_level: f64,
    pub ab_test_enabled: bool,
    pub ab_test_duration_hours: f64,
    /// Share of traffic (%) routed to the candidate during the A/B test
    pub ab_test_traffic_pct: u8,
    /// Minimum settled bets per arm before the A/B analysis is trusted
    pub min_ab_samples: u64,
    pub gradual_rollout_enabled: bool,
    /// Strictly increasing traffic percentages ending at 100
    pub rollout_stages: Vec<u8>,
    pub rollout_stage_duration_hours: f64,
    /// ROI decline (%) against the pre-rollout reference that counts as a regression
    pub regression_tolerance_pct: f64,
    pub optimizer_poll_secs: u64,
    pub max_concurrent_jobs: usize,
}

impl Default for RetrainingConfiguration {
    fn default() -> Self {
        Self {
            algorithm: OptimizationAlgorithm::Bayesian,
            max_evaluations: 200,
            timeout_hours: 12.0,
            training_period_days: 90,
            validation_period_days: 14,
            min_training_samples: 500,
            data_quality_threshold: 0.9,
            validation_level: ValidationLevel::Standard,
            improvement_threshold_pct: 2.0,
            significance_level: 0.95,
            ab_test_enabled: true,
            ab_test_duration_hours: 48.0,
            ab_test_traffic_pct: 10,
            min_ab_samples: 50,
            gradual_rollout_enabled: true,
            rollout_stages: vec![10, 25, 50, 100],
            rollout_stage_duration_hours: 6.0,
            regression_tolerance_pct: 15.0,
            optimizer_poll_secs: 30,
            max_concurrent_jobs: 2,
        }
    }
}

impl RetrainingConfiguration {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(RetrainError::InvalidConfiguration(msg));

        if self.max_evaluations == 0 {
            return invalid("max_evaluations must be positive".into());
        }
        if !(self.timeout_hours > 0.0 && self.timeout_hours <= MAX_DURATION_HOURS) {
            return invalid(format!(
                "timeout_hours must be within (0, {}], got {}",
                MAX_DURATION_HOURS, self.timeout_hours
            ));
        }
        if self.training_period_days == 0 {
            return invalid("training_period_days must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.data_quality_threshold) {
            return invalid(format!(
                "data_quality_threshold must be within [0, 1], got {}",
                self.data_quality_threshold
            ));
        }
        if !(0.0..1.0).contains(&self.significance_level) {
            return invalid(format!(
                "significance_level must be within [0, 1), got {}",
                self.significance_level
            ));
        }
        if self.ab_test_enabled {
            if self.ab_test_traffic_pct == 0 || self.ab_test_traffic_pct > 50 {
                return invalid(format!(
                    "ab_test_traffic_pct must be within 1..=50, got {}",
                    self.ab_test_traffic_pct
                ));
            }
            if !(0.0..=MAX_DURATION_HOURS).contains(&self.ab_test_duration_hours) {
                return invalid(format!(
                    "ab_test_duration_hours must be within [0, {}], got {}",
                    MAX_DURATION_HOURS, self.ab_test_duration_hours
                ));
            }
        }
        if self.rollout_stages.is_empty() {
            return invalid("rollout_stages must not be empty".into());
        }
        if self.rollout_stages.windows(2).any(|w| w[0] >= w[1]) {
            return invalid(format!(
                "rollout_stages must be strictly increasing, got {:?}",
                self.rollout_stages
            ));
        }
        if self.rollout_stages.last() != Some(&100) || self.rollout_stages[0] == 0 {
            return invalid(format!(
                "rollout_stages must start above 0 and end at 100, got {:?}",
                self.rollout_stages
            ));
        }
        if !(0.0..=MAX_DURATION_HOURS).contains(&self.rollout_stage_duration_hours) {
            return invalid(format!(
                "rollout_stage_duration_hours must be within [0, {}], got {}",
                MAX_DURATION_HOURS, self.rollout_stage_duration_hours
            ));
        }
        if self.optimizer_poll_secs == 0 {
            return invalid("optimizer_poll_secs must be positive".into());
        }
        if self.max_concurrent_jobs == 0 {
            return invalid("max_concurrent_jobs must be positive".into());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration> {
        hours("timeout_hours", self.timeout_hours)
    }

    pub fn ab_test_duration(&self) -> Result<Duration> {
        hours("ab_test_duration_hours", self.ab_test_duration_hours)
    }

    pub fn rollout_stage_duration(&self) -> Result<Duration> {
        hours("rollout_stage_duration_hours", self.rollout_stage_duration_hours)
    }

    pub fn optimizer_poll_interval(&self) -> Duration {
        Duration::from_secs(self.optimizer_poll_secs)
    }
}

fn hours(field: &str, h: f64) -> Result<Duration> {
    Duration::try_from_secs_f64((h * 3600.0).max(0.0)).map_err(|e| {
        RetrainError::InvalidConfiguration(format!("{} = {} is not a duration: {}", field, h, e))
    })
}

/// Live performance of a strategy (or one traffic arm) over a window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub roi: f64,
    pub win_rate: f64,
    pub sample_size: u64,
}

impl PerformanceSample {
    pub fn to_metrics(&self) -> Metrics {
        let mut metrics = Metrics::new();
        metrics.insert("roi".to_string(), self.roi);
        metrics.insert("win_rate".to_string(), self.win_rate);
        metrics.insert("sample_size".to_string(), self.sample_size as f64);
        metrics
    }
}

/// Outcome of the canary comparison between baseline and candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResult {
    pub baseline: PerformanceSample,
    pub candidate: PerformanceSample,
    pub improvement_pct: f64,
    pub significance: f64,
    pub p_value: Option<f64>,
    pub deployment_recommended: bool,
    pub summary: String,
}

/// Engine-side record of one retraining run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrainingJob {
    pub id: Uuid,
    pub strategy_name: String,
    pub state: RetrainingState,
    pub configuration: Arc<RetrainingConfiguration>,
    pub baseline_model: Option<ModelVersion>,
    pub candidate_model: Option<ModelVersion>,
    pub ab_test_result: Option<AbTestResult>,
    pub rollout_stage_pct: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub improvement_pct: Option<f64>,
    pub error_message: Option<String>,
    pub log: Vec<String>,
}

impl RetrainingJob {
    pub fn new(strategy_name: &str, configuration: Arc<RetrainingConfiguration>) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            state: RetrainingState::Pending,
            configuration,
            baseline_model: None,
            candidate_model: None,
            ab_test_result: None,
            rollout_stage_pct: 0,
            started_at: Utc::now(),
            completed_at: None,
            improvement_pct: None,
            error_message: None,
            log: Vec::new(),
        }
    }

    /// Append a timestamped line to the job log
    pub fn log(&mut self, message: impl AsRef<str>) {
        self.log.push(format!(
            "{} [{}] {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            self.state,
            message.as_ref()
        ));
    }

    /// Move to `target`, rejecting transitions the state machine forbids
    pub fn transition(&mut self, target: RetrainingState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(RetrainError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        let from = self.state;
        self.state = target;
        if target.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.log(format!("{} -> {}", from, target));
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

//! Contracts the orchestrator requires from external systems

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{
    Metrics, ModelVersion, OptimizationAlgorithm, Parameters, PerformanceSample, RetrainingKind,
    TimeWindow, ValidationLevel,
};
use crate::error::Result;

/// Trainable data available for a window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleCount {
    pub total: u64,
    /// Ratio (0.0 - 1.0) of expected records actually present
    pub completeness: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DataPipeline: Send + Sync {
    async fn count_trainable_samples(
        &self,
        strategy_name: &str,
        window: TimeWindow,
    ) -> Result<SampleCount>;
}

/// Searchable range of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

pub type ParameterSpace = BTreeMap<String, ParameterRange>;

/// Parameters at each range's default value
pub fn default_parameters(space: &ParameterSpace) -> Parameters {
    space
        .iter()
        .map(|(name, range)| (name.clone(), serde_json::json!(range.default)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub strategy_name: String,
    pub algorithm: OptimizationAlgorithm,
    pub kind: RetrainingKind,
    pub max_evaluations: u32,
    pub parameter_space: ParameterSpace,
    pub training_window: TimeWindow,
    pub validation_window: TimeWindow,
    /// Starting point (production parameters, or defaults)
    pub baseline_parameters: Parameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OptimizationStatus {
    Running { evaluations: u32 },
    Completed,
    Failed(String),
}

/// Handle to an in-flight optimization run
#[async_trait]
pub trait ProgressHandle: Send + Sync {
    async fn status(&self) -> Result<OptimizationStatus>;

    async fn best_params(&self) -> Result<Parameters>;

    async fn best_metrics(&self) -> Result<Metrics>;

    /// Ask the optimizer to stop early. Best effort.
    async fn cancel(&self) {}
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Optimizer: Send + Sync {
    fn parameter_space(&self, strategy_name: &str) -> ParameterSpace;

    async fn optimize(&self, request: OptimizationRequest) -> Result<Box<dyn ProgressHandle>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub improvement_pct: f64,
    pub significance: f64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        candidate: &ModelVersion,
        baseline: &ModelVersion,
        level: ValidationLevel,
    ) -> Result<ValidationOutcome>;
}

/// Which side of a traffic split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficArm {
    Baseline,
    Candidate,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PerformanceMonitor: Send + Sync {
    /// Aggregate settled-bet performance over the trailing `days`
    async fn recent_performance(&self, strategy_name: &str, days: u32)
        -> Result<PerformanceSample>;

    /// Performance of one traffic arm since `since`
    async fn arm_performance(
        &self,
        strategy_name: &str,
        arm: TrafficArm,
        since: DateTime<Utc>,
    ) -> Result<PerformanceSample>;
}

/// Market regime indicators over a window
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub volatility: f64,
    /// Mean absolute line movement between open and close
    pub line_movement: f64,
    pub sample_size: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn market_snapshot(&self, strategy_name: &str, days: u32) -> Result<MarketSnapshot>;
}

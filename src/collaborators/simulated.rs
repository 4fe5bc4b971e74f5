//! Simulated collaborators for dry-run mode
//!
//! Produce plausible, slightly noisy numbers so the whole pipeline can be
//! exercised without the ETL pipeline, optimizer service or metrics store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tracing::debug;

use super::traits::{
    DataPipeline, MarketDataSource, MarketSnapshot, OptimizationRequest, OptimizationStatus,
    Optimizer, ParameterRange, ParameterSpace, PerformanceMonitor, ProgressHandle, SampleCount,
    TrafficArm, ValidationOutcome, Validator,
};
use crate::domain::{
    Metrics, ModelVersion, Parameters, PerformanceSample, TimeWindow, ValidationLevel,
};
use crate::error::{Result, RetrainError};

/// Roughly `samples_per_day` settled bets per day, 97% complete
pub struct SimulatedDataPipeline {
    pub samples_per_day: u64,
}

impl Default for SimulatedDataPipeline {
    fn default() -> Self {
        Self {
            samples_per_day: 40,
        }
    }
}

#[async_trait]
impl DataPipeline for SimulatedDataPipeline {
    async fn count_trainable_samples(
        &self,
        strategy_name: &str,
        window: TimeWindow,
    ) -> Result<SampleCount> {
        let days = window.days().max(0) as u64;
        let (total, completeness) = {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.85..1.15);
            (
                ((days * self.samples_per_day) as f64 * jitter) as u64,
                rng.gen_range(0.93..0.99),
            )
        };
        debug!(strategy = strategy_name, total, completeness, "Simulated sample count");
        Ok(SampleCount {
            total,
            completeness,
        })
    }
}

/// Random search that finishes after a fixed number of polls
pub struct SimulatedOptimizer {
    pub polls_to_complete: u32,
}

impl Default for SimulatedOptimizer {
    fn default() -> Self {
        Self {
            polls_to_complete: 3,
        }
    }
}

struct SimulatedRun {
    polls_remaining: AtomicU32,
    max_evaluations: u32,
    polls_total: u32,
    params: Parameters,
    metrics: Metrics,
    cancelled: AtomicBool,
}

#[async_trait]
impl ProgressHandle for SimulatedRun {
    async fn status(&self) -> Result<OptimizationStatus> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(OptimizationStatus::Failed("cancelled".into()));
        }
        let remaining = self
            .polls_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if remaining == 0 {
            return Ok(OptimizationStatus::Completed);
        }
        let done = self.polls_total - remaining + 1;
        Ok(OptimizationStatus::Running {
            evaluations: self.max_evaluations * done / self.polls_total.max(1),
        })
    }

    async fn best_params(&self) -> Result<Parameters> {
        Ok(self.params.clone())
    }

    async fn best_metrics(&self) -> Result<Metrics> {
        Ok(self.metrics.clone())
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Optimizer for SimulatedOptimizer {
    fn parameter_space(&self, _strategy_name: &str) -> ParameterSpace {
        let mut space = ParameterSpace::new();
        for (name, min, max, default) in [
            ("edge_threshold", 0.01, 0.10, 0.03),
            ("kelly_fraction", 0.05, 0.50, 0.25),
            ("min_confidence", 0.50, 0.80, 0.60),
            ("lookback_games", 5.0, 40.0, 15.0),
        ] {
            space.insert(name.to_string(), ParameterRange { min, max, default });
        }
        space
    }

    async fn optimize(&self, request: OptimizationRequest) -> Result<Box<dyn ProgressHandle>> {
        if request.parameter_space.is_empty() {
            return Err(RetrainError::Optimization(format!(
                "empty parameter space for {}",
                request.strategy_name
            )));
        }

        let (params, metrics) = {
            let mut rng = rand::thread_rng();
            let params: Parameters = request
                .parameter_space
                .iter()
                .map(|(name, range)| {
                    (
                        name.clone(),
                        serde_json::json!(rng.gen_range(range.min..=range.max)),
                    )
                })
                .collect();
            let mut metrics = Metrics::new();
            metrics.insert("roi".into(), rng.gen_range(0.02..0.09));
            metrics.insert("win_rate".into(), rng.gen_range(0.52..0.58));
            (params, metrics)
        };

        let polls_total = self.polls_to_complete.max(1);
        Ok(Box::new(SimulatedRun {
            polls_remaining: AtomicU32::new(polls_total),
            max_evaluations: request.max_evaluations,
            polls_total,
            params,
            metrics,
            cancelled: AtomicBool::new(false),
        }))
    }
}

/// Compares the `roi` metric of candidate and baseline
#[derive(Default)]
pub struct SimulatedValidator;

#[async_trait]
impl Validator for SimulatedValidator {
    async fn validate(
        &self,
        candidate: &ModelVersion,
        baseline: &ModelVersion,
        level: ValidationLevel,
    ) -> Result<ValidationOutcome> {
        let candidate_roi = candidate.metric("roi").unwrap_or(0.0);
        let baseline_roi = baseline.metric("roi").unwrap_or(0.0);
        let improvement_pct = if baseline_roi.abs() < f64::EPSILON {
            (candidate_roi - baseline_roi) * 100.0
        } else {
            (candidate_roi - baseline_roi) / baseline_roi.abs() * 100.0
        };
        let required = match level {
            ValidationLevel::Basic => 0.0,
            ValidationLevel::Standard => 1.0,
            ValidationLevel::Rigorous => 3.0,
        };
        Ok(ValidationOutcome {
            passed: improvement_pct > required,
            improvement_pct,
            significance: if improvement_pct > required { 0.97 } else { 0.60 },
        })
    }
}

/// ROI around `base_roi`; the candidate arm gets `candidate_edge` on top
pub struct SimulatedPerformanceMonitor {
    pub base_roi: f64,
    pub base_win_rate: f64,
    pub candidate_edge: f64,
    pub bets_per_day: u64,
}

impl Default for SimulatedPerformanceMonitor {
    fn default() -> Self {
        Self {
            base_roi: 0.04,
            base_win_rate: 0.54,
            candidate_edge: 0.01,
            bets_per_day: 30,
        }
    }
}

impl SimulatedPerformanceMonitor {
    fn sample(&self, roi: f64, win_rate: f64, sample_size: u64) -> PerformanceSample {
        let mut rng = rand::thread_rng();
        PerformanceSample {
            roi: roi + rng.gen_range(-0.005..0.005),
            win_rate: (win_rate + rng.gen_range(-0.01..0.01)).clamp(0.0, 1.0),
            sample_size,
        }
    }
}

#[async_trait]
impl PerformanceMonitor for SimulatedPerformanceMonitor {
    async fn recent_performance(
        &self,
        _strategy_name: &str,
        days: u32,
    ) -> Result<PerformanceSample> {
        Ok(self.sample(
            self.base_roi,
            self.base_win_rate,
            self.bets_per_day * days as u64,
        ))
    }

    async fn arm_performance(
        &self,
        _strategy_name: &str,
        arm: TrafficArm,
        since: DateTime<Utc>,
    ) -> Result<PerformanceSample> {
        let hours = (Utc::now() - since).num_hours().max(1) as u64;
        let bets = (self.bets_per_day * hours / 24).max(self.bets_per_day);
        Ok(match arm {
            TrafficArm::Baseline => self.sample(self.base_roi, self.base_win_rate, bets),
            TrafficArm::Candidate => self.sample(
                self.base_roi + self.candidate_edge,
                self.base_win_rate + self.candidate_edge,
                bets,
            ),
        })
    }
}

/// Stable market with small noise
#[derive(Default)]
pub struct SimulatedMarketData;

#[async_trait]
impl MarketDataSource for SimulatedMarketData {
    async fn market_snapshot(&self, _strategy_name: &str, days: u32) -> Result<MarketSnapshot> {
        let mut rng = rand::thread_rng();
        Ok(MarketSnapshot {
            volatility: 0.12 + rng.gen_range(-0.01..0.01),
            line_movement: 1.5 + rng.gen_range(-0.1..0.1),
            sample_size: 25 * days as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::default_parameters;
    use crate::domain::{OptimizationAlgorithm, RetrainingKind};

    #[tokio::test]
    async fn test_simulated_run_completes() {
        let optimizer = SimulatedOptimizer {
            polls_to_complete: 2,
        };
        let space = optimizer.parameter_space("sharp_action");
        let window = TimeWindow::trailing_days(Utc::now(), 30);
        let handle = optimizer
            .optimize(OptimizationRequest {
                strategy_name: "sharp_action".into(),
                algorithm: OptimizationAlgorithm::RandomSearch,
                kind: RetrainingKind::FullRetrain,
                max_evaluations: 100,
                baseline_parameters: default_parameters(&space),
                parameter_space: space,
                training_window: window,
                validation_window: window,
            })
            .await
            .unwrap();

        assert!(matches!(
            handle.status().await.unwrap(),
            OptimizationStatus::Running { .. }
        ));
        assert!(matches!(
            handle.status().await.unwrap(),
            OptimizationStatus::Running { .. }
        ));
        assert_eq!(handle.status().await.unwrap(), OptimizationStatus::Completed);
        assert_eq!(handle.best_params().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_cancelled_run_reports_failure() {
        let optimizer = SimulatedOptimizer::default();
        let space = optimizer.parameter_space("sharp_action");
        let window = TimeWindow::trailing_days(Utc::now(), 30);
        let handle = optimizer
            .optimize(OptimizationRequest {
                strategy_name: "sharp_action".into(),
                algorithm: OptimizationAlgorithm::Bayesian,
                kind: RetrainingKind::Incremental,
                max_evaluations: 10,
                baseline_parameters: Parameters::new(),
                parameter_space: space,
                training_window: window,
                validation_window: window,
            })
            .await
            .unwrap();
        handle.cancel().await;
        assert!(matches!(
            handle.status().await.unwrap(),
            OptimizationStatus::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_validator_uses_roi() {
        let mut better = Metrics::new();
        better.insert("roi".into(), 0.06);
        let mut worse = Metrics::new();
        worse.insert("roi".into(), 0.04);

        let candidate = ModelVersion::new("s", Parameters::new(), better);
        let baseline = ModelVersion::new("s", Parameters::new(), worse);
        let outcome = SimulatedValidator
            .validate(&candidate, &baseline, ValidationLevel::Standard)
            .await
            .unwrap();
        assert!(outcome.passed);
        assert!((outcome.improvement_pct - 50.0).abs() < 1e-6);

        let outcome = SimulatedValidator
            .validate(&baseline, &candidate, ValidationLevel::Basic)
            .await
            .unwrap();
        assert!(!outcome.passed);
    }
}

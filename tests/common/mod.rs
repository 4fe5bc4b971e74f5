//! Deterministic collaborators and a wired-up engine/detector/scheduler for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ploy_retrain::collaborators::{
    Collaborators, DataPipeline, MarketDataSource, MarketSnapshot, OptimizationRequest,
    OptimizationStatus, Optimizer, ParameterRange, ParameterSpace, PerformanceMonitor,
    ProgressHandle, SampleCount, TrafficArm, ValidationOutcome, Validator,
};
use ploy_retrain::config::{EngineConfig, SchedulerConfig, TriggerConfig};
use ploy_retrain::domain::{
    Metrics, ModelVersion, Parameters, PerformanceSample, RetrainingConfiguration,
    RetrainingJob, RetrainingState, TimeWindow, ValidationLevel,
};
use ploy_retrain::error::Result;
use ploy_retrain::persistence::{AuditEventKind, InMemoryAuditLog};
use ploy_retrain::{JobScheduler, RetrainingEngine, TriggerDetector};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ==================== Fakes ====================

pub struct FixedData {
    pub total: u64,
    pub completeness: f64,
}

#[async_trait]
impl DataPipeline for FixedData {
    async fn count_trainable_samples(
        &self,
        _strategy_name: &str,
        _window: TimeWindow,
    ) -> Result<SampleCount> {
        Ok(SampleCount {
            total: self.total,
            completeness: self.completeness,
        })
    }
}

/// Completes after a fixed number of status polls
pub struct ScriptedOptimizer {
    pub polls_to_complete: u32,
    pub failure: Option<String>,
    pub runs: AtomicU32,
}

impl ScriptedOptimizer {
    pub fn completing_after(polls: u32) -> Self {
        Self {
            polls_to_complete: polls,
            failure: None,
            runs: AtomicU32::new(0),
        }
    }
}

struct ScriptedRun {
    remaining: AtomicU32,
    failure: Option<String>,
    cancelled: AtomicBool,
}

#[async_trait]
impl ProgressHandle for ScriptedRun {
    async fn status(&self) -> Result<OptimizationStatus> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Ok(OptimizationStatus::Failed("cancelled".into()));
        }
        let remaining = self.remaining.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(match &self.failure {
                Some(reason) => OptimizationStatus::Failed(reason.clone()),
                None => OptimizationStatus::Completed,
            });
        }
        self.remaining.store(remaining - 1, Ordering::SeqCst);
        Ok(OptimizationStatus::Running {
            evaluations: remaining.saturating_mul(10),
        })
    }

    async fn best_params(&self) -> Result<Parameters> {
        let mut params = Parameters::new();
        params.insert("edge_threshold".into(), serde_json::json!(0.035));
        Ok(params)
    }

    async fn best_metrics(&self) -> Result<Metrics> {
        let mut metrics = Metrics::new();
        metrics.insert("roi".into(), 0.06);
        metrics.insert("win_rate".into(), 0.57);
        Ok(metrics)
    }

    async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Optimizer for ScriptedOptimizer {
    fn parameter_space(&self, _strategy_name: &str) -> ParameterSpace {
        let mut space = ParameterSpace::new();
        space.insert(
            "edge_threshold".into(),
            ParameterRange {
                min: 0.01,
                max: 0.10,
                default: 0.03,
            },
        );
        space
    }

    async fn optimize(&self, _request: OptimizationRequest) -> Result<Box<dyn ProgressHandle>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedRun {
            remaining: AtomicU32::new(self.polls_to_complete),
            failure: self.failure.clone(),
            cancelled: AtomicBool::new(false),
        }))
    }
}

pub struct FixedValidator {
    pub passed: bool,
    pub calls: AtomicU32,
}

#[async_trait]
impl Validator for FixedValidator {
    async fn validate(
        &self,
        _candidate: &ModelVersion,
        _baseline: &ModelVersion,
        _level: ValidationLevel,
    ) -> Result<ValidationOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ValidationOutcome {
            passed: self.passed,
            improvement_pct: if self.passed { 12.0 } else { -3.0 },
            significance: if self.passed { 0.99 } else { 0.40 },
        })
    }
}

/// Steady performance, except one-day windows (rollout checks) which follow a script
pub struct ScriptedPerformance {
    pub steady: PerformanceSample,
    pub baseline_arm: PerformanceSample,
    pub candidate_arm: PerformanceSample,
    rollout_rois: Mutex<VecDeque<f64>>,
    pub rollout_checks: AtomicU32,
}

impl ScriptedPerformance {
    pub fn new(rollout_rois: Vec<f64>) -> Self {
        Self {
            steady: PerformanceSample {
                roi: 0.05,
                win_rate: 0.55,
                sample_size: 400,
            },
            baseline_arm: PerformanceSample {
                roi: 0.04,
                win_rate: 0.52,
                sample_size: 2_000,
            },
            candidate_arm: PerformanceSample {
                roi: 0.06,
                win_rate: 0.58,
                sample_size: 2_000,
            },
            rollout_rois: Mutex::new(rollout_rois.into()),
            rollout_checks: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl PerformanceMonitor for ScriptedPerformance {
    async fn recent_performance(&self, _strategy_name: &str, days: u32) -> Result<PerformanceSample> {
        if days != 1 {
            return Ok(self.steady);
        }
        self.rollout_checks.fetch_add(1, Ordering::SeqCst);
        let roi = self
            .rollout_rois
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.steady.roi);
        Ok(PerformanceSample { roi, ..self.steady })
    }

    async fn arm_performance(
        &self,
        _strategy_name: &str,
        arm: TrafficArm,
        _since: DateTime<Utc>,
    ) -> Result<PerformanceSample> {
        Ok(match arm {
            TrafficArm::Baseline => self.baseline_arm,
            TrafficArm::Candidate => self.candidate_arm,
        })
    }
}

pub struct QuietMarket;

#[async_trait]
impl MarketDataSource for QuietMarket {
    async fn market_snapshot(&self, _strategy_name: &str, _days: u32) -> Result<MarketSnapshot> {
        Ok(MarketSnapshot {
            volatility: 0.02,
            line_movement: 0.5,
            sample_size: 200,
        })
    }
}

// ==================== Harness ====================

pub struct HarnessOptions {
    pub defaults: RetrainingConfiguration,
    pub scheduler_max_concurrent_jobs: usize,
    pub validator_passes: bool,
    pub optimizer_polls: u32,
    pub rollout_rois: Vec<f64>,
    pub training_samples: u64,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            defaults: RetrainingConfiguration::default(),
            scheduler_max_concurrent_jobs: 2,
            validator_passes: true,
            optimizer_polls: 3,
            rollout_rois: Vec::new(),
            training_samples: 5_000,
        }
    }
}

pub struct Harness {
    pub engine: RetrainingEngine,
    pub detector: TriggerDetector,
    pub scheduler: JobScheduler,
    pub audit: Arc<InMemoryAuditLog>,
    pub optimizer: Arc<ScriptedOptimizer>,
    pub validator: Arc<FixedValidator>,
    pub performance: Arc<ScriptedPerformance>,
}

impl Harness {
    pub fn new(options: HarnessOptions) -> Self {
        let optimizer = Arc::new(ScriptedOptimizer::completing_after(options.optimizer_polls));
        let validator = Arc::new(FixedValidator {
            passed: options.validator_passes,
            calls: AtomicU32::new(0),
        });
        let performance = Arc::new(ScriptedPerformance::new(options.rollout_rois));
        let collaborators = Collaborators {
            data: Arc::new(FixedData {
                total: options.training_samples,
                completeness: 0.98,
            }),
            optimizer: optimizer.clone(),
            validator: validator.clone(),
            performance: performance.clone(),
            market: Arc::new(QuietMarket),
        };

        let audit = Arc::new(InMemoryAuditLog::new());
        let engine = RetrainingEngine::new(
            EngineConfig {
                defaults: options.defaults,
                ..EngineConfig::default()
            },
            collaborators.clone(),
            audit.clone(),
        );
        let detector = TriggerDetector::new(TriggerConfig::default(), collaborators);
        let scheduler = JobScheduler::new(
            SchedulerConfig {
                max_concurrent_jobs: options.scheduler_max_concurrent_jobs,
                ..SchedulerConfig::default()
            },
            engine.clone(),
            detector.clone(),
        );

        Self {
            engine,
            detector,
            scheduler,
            audit,
            optimizer,
            validator,
            performance,
        }
    }

    /// Engine job id assigned to a dispatched scheduler job
    pub async fn engine_job_id(&self, scheduled_job_id: Uuid) -> Uuid {
        self.scheduler
            .get_job(scheduled_job_id)
            .await
            .and_then(|j| j.engine_job_id)
            .expect("job has not been dispatched")
    }

    /// Advance (paused) time in `step` increments until the engine job satisfies `pred`
    pub async fn wait_for(
        &self,
        engine_job_id: Uuid,
        step: Duration,
        pred: impl Fn(RetrainingState) -> bool,
    ) -> RetrainingJob {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(14 * 24 * 3600);
        loop {
            if let Some(job) = self.engine.get_job_status(engine_job_id).await {
                if pred(job.state) {
                    return job;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} never reached the expected state",
                engine_job_id
            );
            tokio::time::sleep(step).await;
        }
    }

    pub async fn wait_for_terminal(&self, engine_job_id: Uuid) -> RetrainingJob {
        self.wait_for(engine_job_id, Duration::from_secs(60), |s| s.is_terminal())
            .await
    }

    /// Traffic percentages set by the job, in order
    pub async fn traffic_changes(&self, engine_job_id: Uuid) -> Vec<u64> {
        self.audit
            .events_for_job(engine_job_id)
            .await
            .into_iter()
            .filter(|e| e.kind == AuditEventKind::TrafficChange)
            .filter_map(|e| e.detail["traffic_pct"].as_u64())
            .collect()
    }

    pub async fn visited_states(&self, engine_job_id: Uuid) -> Vec<RetrainingState> {
        self.audit
            .events_for_job(engine_job_id)
            .await
            .into_iter()
            .filter(|e| e.kind == AuditEventKind::StateTransition)
            .map(|e| e.state)
            .collect()
    }
}

pub fn production_model(strategy: &str) -> ModelVersion {
    let mut metrics = Metrics::new();
    metrics.insert("roi".into(), 0.05);
    ModelVersion::new(strategy, Parameters::new(), metrics)
}

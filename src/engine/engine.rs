//! Retraining Engine - per-job workflow, production registry and timeout monitor
//!
//! Each accepted job runs in its own task:
//! PreparingData -> Optimizing -> Validating -> [ABTesting] -> Deploying -> Completed.
//! Stage errors are caught at the job boundary and turned into a terminal
//! state; finalization (state, promotion or rollback, traffic, history) is a
//! single write under the engine lock.

use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::ab_test;
use super::cancel::CancelToken;
use super::registry::ModelRegistry;
use crate::collaborators::{
    default_parameters, Collaborators, OptimizationRequest, OptimizationStatus, TrafficArm,
};
use crate::config::EngineConfig;
use crate::domain::{
    decline_pct, ModelVersion, RetrainingConfiguration, RetrainingJob, RetrainingKind,
    RetrainingState, TimeWindow,
};
use crate::error::{Result, RetrainError};
use crate::persistence::{AuditEvent, AuditEventKind, AuditSink};

/// Window (days) used for the rollout reference and per-stage checks
const ROLLOUT_CHECK_DAYS: u32 = 1;

struct ActiveJob {
    job: RetrainingJob,
    cancel: CancelToken,
    abort: Option<AbortHandle>,
    started: Instant,
    /// Production model when the job started; restored on rollback
    previous_production: Option<ModelVersion>,
}

#[derive(Default)]
struct EngineState {
    active: HashMap<Uuid, ActiveJob>,
    history: VecDeque<RetrainingJob>,
    registry: ModelRegistry,
}

/// How a job ends
#[derive(Debug)]
enum Finalization {
    Promote(ModelVersion),
    NoChange(String),
    RolledBack(String),
    Failed(String),
    Cancelled,
}

impl Finalization {
    fn from_error(err: RetrainError) -> Self {
        match err {
            RetrainError::Cancelled => Finalization::Cancelled,
            RetrainError::RegressionDetected { .. } => Finalization::RolledBack(err.to_string()),
            other => Finalization::Failed(other.to_string()),
        }
    }

    fn target_state(&self) -> RetrainingState {
        match self {
            Finalization::Promote(_) | Finalization::NoChange(_) => RetrainingState::Completed,
            Finalization::RolledBack(_) => RetrainingState::RolledBack,
            Finalization::Failed(_) => RetrainingState::Failed,
            Finalization::Cancelled => RetrainingState::Cancelled,
        }
    }
}

/// Engine summary
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub active_jobs: usize,
    pub max_concurrent_jobs: usize,
    pub active_by_state: BTreeMap<String, usize>,
    pub history_size: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub cancelled: usize,
    pub production_models: usize,
}

struct EngineInner {
    config: EngineConfig,
    collaborators: Collaborators,
    audit: Arc<dyn AuditSink>,
    state: RwLock<EngineState>,
    shutdown: CancelToken,
    monitor: std::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; all clones share one engine
#[derive(Clone)]
pub struct RetrainingEngine {
    inner: Arc<EngineInner>,
}

impl RetrainingEngine {
    pub fn new(
        config: EngineConfig,
        collaborators: Collaborators,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                collaborators,
                audit,
                state: RwLock::new(EngineState::default()),
                shutdown: CancelToken::new(),
                monitor: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn default_configuration(&self) -> &RetrainingConfiguration {
        &self.inner.config.defaults
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.inner.config.defaults.max_concurrent_jobs
    }

    /// Start the background timeout monitor. Idempotent.
    pub fn start(&self) {
        let mut monitor = match self.inner.monitor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if monitor.is_some() {
            return;
        }

        let engine = self.clone();
        let period = Duration::from_secs(self.inner.config.timeout_check_secs.max(1));
        *monitor = Some(tokio::spawn(async move {
            info!("Timeout monitor started (every {:?})", period);
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.enforce_timeouts().await;
                    }
                    _ = engine.inner.shutdown.cancelled() => break,
                }
            }
            debug!("Timeout monitor stopped");
        }));
    }

    /// Accept a job and start executing it
    #[instrument(skip(self, configuration), fields(strategy = %strategy_name))]
    pub async fn execute(
        &self,
        strategy_name: &str,
        configuration: Arc<RetrainingConfiguration>,
        kind: RetrainingKind,
    ) -> Result<Uuid> {
        configuration.validate()?;
        if self.inner.shutdown.is_cancelled() {
            return Err(RetrainError::Other(anyhow::anyhow!("engine is shutting down")));
        }

        let job = RetrainingJob::new(strategy_name, configuration);
        let job_id = job.id;
        let cancel = CancelToken::new();
        {
            let mut state = self.inner.state.write().await;
            let max = self.max_concurrent_jobs();
            if state.active.len() >= max {
                return Err(RetrainError::Capacity {
                    active: state.active.len(),
                    max,
                });
            }
            let previous_production = state.registry.production(strategy_name).cloned();
            state.active.insert(
                job_id,
                ActiveJob {
                    job,
                    cancel: cancel.clone(),
                    abort: None,
                    started: Instant::now(),
                    previous_production,
                },
            );
        }
        self.audit(AuditEvent::transition(
            job_id,
            strategy_name,
            RetrainingState::Pending,
        ))
        .await;

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            engine.run_job(job_id, kind, cancel).await;
        });

        let mut state = self.inner.state.write().await;
        if let Some(active) = state.active.get_mut(&job_id) {
            active.abort = Some(handle.abort_handle());
        }
        info!(job_id = %job_id, "Retraining job accepted");
        Ok(job_id)
    }

    async fn run_job(&self, job_id: Uuid, kind: RetrainingKind, cancel: CancelToken) {
        let outcome = match self.run_stages(job_id, kind, &cancel).await {
            Ok(outcome) => outcome,
            Err(RetrainError::JobNotActive(_)) => return,
            Err(err) => {
                if !err.is_cancellation() {
                    warn!(job_id = %job_id, error = %err, "Retraining job stage failed");
                }
                Finalization::from_error(err)
            }
        };
        self.finalize(job_id, outcome).await;
    }

    async fn run_stages(
        &self,
        job_id: Uuid,
        kind: RetrainingKind,
        cancel: &CancelToken,
    ) -> Result<Finalization> {
        let c = &self.inner.collaborators;
        let (strategy, config) = self
            .with_job(job_id, |job| (job.strategy_name.clone(), job.configuration.clone()))
            .await?;

        // PreparingData
        cancel.check()?;
        self.advance(job_id, RetrainingState::PreparingData).await?;
        let now = Utc::now();
        let training_window = TimeWindow::trailing_days(now, config.training_period_days);
        let validation_window = TimeWindow::trailing_days(now, config.validation_period_days);
        let samples = c
            .data
            .count_trainable_samples(&strategy, training_window)
            .await?;
        if samples.total < config.min_training_samples {
            return Err(RetrainError::Validation(format!(
                "Insufficient training data: {} samples, need {}",
                samples.total, config.min_training_samples
            )));
        }
        if samples.completeness < config.data_quality_threshold {
            return Err(RetrainError::Validation(format!(
                "Data completeness {:.3} below threshold {:.3}",
                samples.completeness, config.data_quality_threshold
            )));
        }
        self.log(
            job_id,
            format!(
                "{} training samples ({:.1}% complete)",
                samples.total,
                samples.completeness * 100.0
            ),
        )
        .await?;

        // Baseline
        let parameter_space = c.optimizer.parameter_space(&strategy);
        let production = {
            let state = self.inner.state.read().await;
            state.registry.production(&strategy).cloned()
        };
        let baseline = match production {
            Some(model) => model,
            None => {
                let recent = c
                    .performance
                    .recent_performance(&strategy, config.validation_period_days)
                    .await?;
                ModelVersion::new(
                    &strategy,
                    default_parameters(&parameter_space),
                    recent.to_metrics(),
                )
                .as_baseline()
            }
        };
        let baseline_params = baseline.parameters.clone();
        self.with_job(job_id, |job| {
            job.log(format!("baseline {}", baseline.version_id));
            job.baseline_model = Some(baseline.clone());
        })
        .await?;

        // Optimizing
        cancel.check()?;
        self.advance(job_id, RetrainingState::Optimizing).await?;
        let handle = c
            .optimizer
            .optimize(OptimizationRequest {
                strategy_name: strategy.clone(),
                algorithm: config.algorithm,
                kind,
                max_evaluations: config.max_evaluations,
                parameter_space,
                training_window,
                validation_window,
                baseline_parameters: baseline_params,
            })
            .await?;
        loop {
            match handle.status().await? {
                OptimizationStatus::Completed => break,
                OptimizationStatus::Failed(reason) => {
                    return Err(RetrainError::Optimization(reason));
                }
                OptimizationStatus::Running { evaluations } => {
                    debug!(job_id = %job_id, evaluations, "Optimizer running");
                }
            }
            if let Err(err) = cancel.sleep(config.optimizer_poll_interval()).await {
                handle.cancel().await;
                return Err(err);
            }
        }
        let candidate = ModelVersion::new(
            &strategy,
            handle.best_params().await?,
            handle.best_metrics().await?,
        )
        .with_training_period(training_window);
        {
            let mut state = self.inner.state.write().await;
            let active = state
                .active
                .get_mut(&job_id)
                .ok_or(RetrainError::JobNotActive(job_id))?;
            active.job.candidate_model = Some(candidate.clone());
            active.job.log(format!("candidate {}", candidate.version_id));
            state.registry.record_version(candidate.clone());
        }

        // Validating
        cancel.check()?;
        self.advance(job_id, RetrainingState::Validating).await?;
        let outcome = c
            .validator
            .validate(&candidate, &baseline, config.validation_level)
            .await?;
        self.with_job(job_id, |job| {
            job.improvement_pct = Some(outcome.improvement_pct);
            job.log(format!(
                "validation passed={} improvement={:.2}% significance={:.3}",
                outcome.passed, outcome.improvement_pct, outcome.significance
            ));
        })
        .await?;
        if !outcome.passed {
            return Ok(Finalization::NoChange(format!(
                "Candidate rejected by validation (improvement {:.2}%)",
                outcome.improvement_pct
            )));
        }

        // ABTesting
        if config.ab_test_enabled {
            cancel.check()?;
            self.advance(job_id, RetrainingState::ABTesting).await?;
            self.set_traffic(job_id, config.ab_test_traffic_pct).await?;
            let since = Utc::now();
            cancel.sleep(config.ab_test_duration()?).await?;

            let baseline_perf = c
                .performance
                .arm_performance(&strategy, TrafficArm::Baseline, since)
                .await?;
            let candidate_perf = c
                .performance
                .arm_performance(&strategy, TrafficArm::Candidate, since)
                .await?;
            let result = ab_test::analyze(baseline_perf, candidate_perf, &config);
            let recommended = result.deployment_recommended;
            let summary = result.summary.clone();
            self.with_job(job_id, |job| {
                job.improvement_pct = Some(result.improvement_pct);
                job.log(format!("A/B: {}", result.summary));
                job.ab_test_result = Some(result);
            })
            .await?;
            if !recommended {
                return Ok(Finalization::NoChange(summary));
            }
        }

        // Deploying
        cancel.check()?;
        self.advance(job_id, RetrainingState::Deploying).await?;
        if config.gradual_rollout_enabled {
            let reference = c
                .performance
                .recent_performance(&strategy, ROLLOUT_CHECK_DAYS)
                .await?;
            for &stage_pct in &config.rollout_stages {
                cancel.check()?;
                self.set_traffic(job_id, stage_pct).await?;
                cancel.sleep(config.rollout_stage_duration()?).await?;

                let current = c
                    .performance
                    .recent_performance(&strategy, ROLLOUT_CHECK_DAYS)
                    .await?;
                let decline = decline_pct(reference.roi, current.roi);
                if decline > config.regression_tolerance_pct {
                    return Err(RetrainError::RegressionDetected {
                        stage_pct,
                        reason: format!(
                            "ROI {:.4} vs reference {:.4} ({:.1}% decline > {:.1}% tolerance)",
                            current.roi, reference.roi, decline, config.regression_tolerance_pct
                        ),
                    });
                }
                self.log(job_id, format!("rollout stage {}% healthy", stage_pct))
                    .await?;
            }
        }

        Ok(Finalization::Promote(candidate))
    }

    /// Move the job to its terminal state in one write
    async fn finalize(&self, job_id: Uuid, outcome: Finalization) {
        let mut events = Vec::new();
        let final_state;
        let strategy;
        {
            let mut state = self.inner.state.write().await;
            let Some(ActiveJob {
                mut job,
                previous_production,
                ..
            }) = state.active.remove(&job_id)
            else {
                return;
            };
            strategy = job.strategy_name.clone();
            let had_live_traffic = job.state.has_live_traffic();

            let target = outcome.target_state();
            if let Err(err) = job.transition(target) {
                error!(job_id = %job_id, error = %err, "Invalid terminal transition, failing job");
                job.error_message = Some(err.to_string());
                let _ = job.transition(RetrainingState::Failed);
            }

            match outcome {
                Finalization::Promote(candidate) if job.state == RetrainingState::Completed => {
                    let version_id = candidate.version_id.clone();
                    state.registry.promote(candidate);
                    state.registry.set_traffic(&strategy, 100);
                    if let Some(c) = job.candidate_model.as_mut() {
                        c.is_production = true;
                    }
                    job.rollout_stage_pct = 100;
                    job.log(format!("promoted {}", version_id));
                    events.push(AuditEvent::new(
                        job_id,
                        &strategy,
                        AuditEventKind::Promotion,
                        job.state,
                        serde_json::json!({ "version_id": version_id }),
                    ));
                }
                Finalization::RolledBack(reason) => {
                    state
                        .registry
                        .restore(&strategy, previous_production.as_ref());
                    state.registry.set_traffic(&strategy, 0);
                    job.rollout_stage_pct = 0;
                    job.log(format!("rolled back: {}", reason));
                    job.error_message = Some(reason.clone());
                    events.push(AuditEvent::new(
                        job_id,
                        &strategy,
                        AuditEventKind::Rollback,
                        job.state,
                        serde_json::json!({
                            "reason": reason,
                            "restored_version": previous_production.as_ref().map(|m| m.version_id.clone()),
                        }),
                    ));
                }
                Finalization::NoChange(reason) => {
                    if had_live_traffic {
                        state.registry.set_traffic(&strategy, 0);
                        job.rollout_stage_pct = 0;
                    }
                    job.log(format!("no change: {}", reason));
                }
                Finalization::Failed(reason) => {
                    if had_live_traffic {
                        state.registry.set_traffic(&strategy, 0);
                        job.rollout_stage_pct = 0;
                    }
                    job.log(format!("failed: {}", reason));
                    job.error_message = Some(reason);
                }
                Finalization::Cancelled => {
                    if had_live_traffic {
                        state.registry.set_traffic(&strategy, 0);
                        job.rollout_stage_pct = 0;
                    }
                    job.log("cancelled");
                }
                Finalization::Promote(_) => {}
            }

            final_state = job.state;
            events.push(AuditEvent::new(
                job_id,
                &strategy,
                AuditEventKind::StateTransition,
                final_state,
                serde_json::json!({ "error": job.error_message }),
            ));

            state.history.push_back(job);
            while state.history.len() > self.inner.config.history_limit.max(1) {
                state.history.pop_front();
            }
        }

        match final_state {
            RetrainingState::Completed => {
                info!(job_id = %job_id, strategy = %strategy, "Retraining job completed")
            }
            RetrainingState::Cancelled => {
                info!(job_id = %job_id, strategy = %strategy, "Retraining job cancelled")
            }
            other => {
                warn!(job_id = %job_id, strategy = %strategy, state = %other, "Retraining job ended")
            }
        }
        for event in events {
            self.audit(event).await;
        }
    }

    /// Force-fail every job running past its timeout
    pub async fn enforce_timeouts(&self) -> Vec<Uuid> {
        let expired: Vec<(Uuid, f64, Option<AbortHandle>)> = {
            let state = self.inner.state.read().await;
            state
                .active
                .iter()
                .filter(|(_, a)| match a.job.configuration.timeout() {
                    Ok(timeout) => a.started.elapsed() > timeout,
                    // Unrepresentable timeouts never expire
                    Err(_) => false,
                })
                .map(|(id, a)| (*id, a.job.configuration.timeout_hours, a.abort.clone()))
                .collect()
        };

        for (job_id, hours, abort) in &expired {
            if let Some(abort) = abort {
                abort.abort();
            }
            error!(job_id = %job_id, "Retraining job timed out");
            self.finalize(
                *job_id,
                Finalization::Failed(format!("Job exceeded timeout of {} hours", hours)),
            )
            .await;
        }
        expired.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Request cancellation; the job ends as Cancelled at its next suspension point.
    /// Returns false when the job is not active.
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        let state = self.inner.state.read().await;
        match state.active.get(&job_id) {
            Some(active) => {
                info!(job_id = %job_id, "Cancelling retraining job");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Seed an existing production model (e.g. at startup)
    pub async fn register_production_model(&self, mut model: ModelVersion) {
        model.is_production = true;
        let mut state = self.inner.state.write().await;
        info!(strategy = %model.strategy_name, version = %model.version_id, "Registered production model");
        state.registry.promote(model);
    }

    /// Mark jobs left unfinished by a previous process as Failed
    pub async fn recover_interrupted(&self) -> Result<Vec<Uuid>> {
        let unfinished = self.inner.audit.unfinished_jobs().await?;
        let mut recovered = Vec::new();
        for event in unfinished {
            let mut job = RetrainingJob::new(
                &event.strategy_name,
                Arc::new(self.inner.config.defaults.clone()),
            );
            job.id = event.job_id;
            job.state = RetrainingState::Failed;
            job.completed_at = Some(Utc::now());
            job.error_message = Some("interrupted by restart".to_string());
            job.log(format!("interrupted in {}", event.state));

            {
                let mut state = self.inner.state.write().await;
                if state.active.contains_key(&job.id) {
                    continue;
                }
                state.history.push_back(job);
                while state.history.len() > self.inner.config.history_limit.max(1) {
                    state.history.pop_front();
                }
            }
            self.audit(AuditEvent::new(
                event.job_id,
                &event.strategy_name,
                AuditEventKind::StateTransition,
                RetrainingState::Failed,
                serde_json::json!({ "error": "interrupted by restart" }),
            ))
            .await;
            warn!(job_id = %event.job_id, strategy = %event.strategy_name, state = %event.state, "Marked interrupted job as failed");
            recovered.push(event.job_id);
        }
        Ok(recovered)
    }

    /// Cancel active jobs and stop the monitor; waits up to `drain` for jobs to finish
    pub async fn shutdown(&self, drain: Duration) {
        self.inner.shutdown.cancel();
        {
            let state = self.inner.state.read().await;
            for active in state.active.values() {
                active.cancel.cancel();
            }
        }

        let deadline = Instant::now() + drain;
        while Instant::now() < deadline {
            if self.inner.state.read().await.active.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let leftover: Vec<(Uuid, Option<AbortHandle>)> = {
            let state = self.inner.state.read().await;
            state
                .active
                .iter()
                .map(|(id, a)| (*id, a.abort.clone()))
                .collect()
        };
        for (job_id, abort) in leftover {
            if let Some(abort) = abort {
                abort.abort();
            }
            self.finalize(job_id, Finalization::Cancelled).await;
        }

        let monitor = match self.inner.monitor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        info!("Retraining engine stopped");
    }

    // ==================== Queries ====================

    pub async fn get_job_status(&self, job_id: Uuid) -> Option<RetrainingJob> {
        let state = self.inner.state.read().await;
        state
            .active
            .get(&job_id)
            .map(|a| a.job.clone())
            .or_else(|| state.history.iter().rev().find(|j| j.id == job_id).cloned())
    }

    pub async fn get_active_jobs(&self) -> Vec<RetrainingJob> {
        let state = self.inner.state.read().await;
        let mut jobs: Vec<RetrainingJob> = state.active.values().map(|a| a.job.clone()).collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Finished jobs, newest first
    pub async fn get_job_history(
        &self,
        strategy_name: Option<&str>,
        limit: usize,
    ) -> Vec<RetrainingJob> {
        let state = self.inner.state.read().await;
        state
            .history
            .iter()
            .rev()
            .filter(|j| strategy_name.map_or(true, |s| j.strategy_name == s))
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn get_model_versions(&self, strategy_name: &str) -> Vec<ModelVersion> {
        self.inner.state.read().await.registry.versions(strategy_name)
    }

    pub async fn get_production_model(&self, strategy_name: &str) -> Option<ModelVersion> {
        self.inner
            .state
            .read()
            .await
            .registry
            .production(strategy_name)
            .cloned()
    }

    /// Share of traffic (%) currently routed to the strategy's candidate
    pub async fn get_traffic_pct(&self, strategy_name: &str) -> u8 {
        self.inner.state.read().await.registry.traffic(strategy_name)
    }

    pub async fn active_job_count(&self) -> usize {
        self.inner.state.read().await.active.len()
    }

    pub async fn get_engine_status(&self) -> EngineStatus {
        let state = self.inner.state.read().await;
        let mut active_by_state = BTreeMap::new();
        for active in state.active.values() {
            *active_by_state
                .entry(active.job.state.to_string())
                .or_insert(0) += 1;
        }
        let count = |s: RetrainingState| state.history.iter().filter(|j| j.state == s).count();
        EngineStatus {
            active_jobs: state.active.len(),
            max_concurrent_jobs: self.max_concurrent_jobs(),
            active_by_state,
            history_size: state.history.len(),
            completed: count(RetrainingState::Completed),
            failed: count(RetrainingState::Failed),
            rolled_back: count(RetrainingState::RolledBack),
            cancelled: count(RetrainingState::Cancelled),
            production_models: state.registry.production_count(),
        }
    }

    // ==================== Job mutation helpers ====================

    /// Apply `f` to an active job under the write lock
    async fn with_job<T>(&self, job_id: Uuid, f: impl FnOnce(&mut RetrainingJob) -> T) -> Result<T> {
        let mut state = self.inner.state.write().await;
        let active = state
            .active
            .get_mut(&job_id)
            .ok_or(RetrainError::JobNotActive(job_id))?;
        Ok(f(&mut active.job))
    }

    async fn log(&self, job_id: Uuid, message: String) -> Result<()> {
        self.with_job(job_id, |job| job.log(message)).await
    }

    async fn advance(&self, job_id: Uuid, target: RetrainingState) -> Result<()> {
        let strategy = {
            let mut state = self.inner.state.write().await;
            let active = state
                .active
                .get_mut(&job_id)
                .ok_or(RetrainError::JobNotActive(job_id))?;
            active.job.transition(target)?;
            active.job.strategy_name.clone()
        };
        debug!(job_id = %job_id, state = %target, "Retraining job advanced");
        self.audit(AuditEvent::transition(job_id, &strategy, target))
            .await;
        Ok(())
    }

    async fn set_traffic(&self, job_id: Uuid, pct: u8) -> Result<()> {
        let (strategy, job_state) = {
            let mut state = self.inner.state.write().await;
            let EngineState {
                active, registry, ..
            } = &mut *state;
            let active = active
                .get_mut(&job_id)
                .ok_or(RetrainError::JobNotActive(job_id))?;
            active.job.rollout_stage_pct = pct;
            active.job.log(format!("candidate traffic {}%", pct));
            registry.set_traffic(&active.job.strategy_name, pct);
            (active.job.strategy_name.clone(), active.job.state)
        };
        info!(job_id = %job_id, strategy = %strategy, traffic_pct = pct, "Candidate traffic updated");
        self.audit(AuditEvent::new(
            job_id,
            &strategy,
            AuditEventKind::TrafficChange,
            job_state,
            serde_json::json!({ "traffic_pct": pct }),
        ))
        .await;
        Ok(())
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.inner.audit.record(event).await {
            warn!(error = %e, "Failed to record audit event");
        }
    }
}

//! Job Scheduler - recurring schedules, trigger jobs, dispatch and reconciliation
//!
//! All scheduler state lives behind one mutex which is never held across an
//! engine or detector call. Per-strategy exclusivity is enforced purely by the
//! scheduler's lock set: a strategy is locked from dispatch until
//! reconciliation observes the engine job in a terminal state.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::locks::StrategyLocks;
use super::queue::{JobQueue, QueueStats};
use super::schedule::{Schedule, ScheduleUpdate};
use crate::config::SchedulerConfig;
use crate::domain::{
    JobPriority, JobSource, JobStatus, RetrainingConfiguration, RetrainingKind, ScheduledJob,
    TriggerCondition, TriggerKind,
};
use crate::engine::{CancelToken, RetrainingEngine};
use crate::error::{Result, RetrainError};
use crate::triggers::TriggerDetector;

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub queue: QueueStats,
    pub running: usize,
    pub max_concurrent_jobs: usize,
    pub locked_strategies: Vec<String>,
    pub completed_last_24h: usize,
    pub failed_last_24h: usize,
    pub schedules_total: usize,
    pub schedules_enabled: usize,
}

#[derive(Default)]
struct SchedulerState {
    schedules: BTreeMap<Uuid, Schedule>,
    queue: JobQueue,
    running: HashMap<Uuid, ScheduledJob>,
    completed: VecDeque<ScheduledJob>,
    locks: StrategyLocks,
    /// Running jobs cancelled before the engine assigned an id
    pending_cancel: HashSet<Uuid>,
    strategy_configurations: HashMap<String, Arc<RetrainingConfiguration>>,
}

impl SchedulerState {
    fn has_job_for(&self, strategy_name: &str) -> bool {
        self.locks.is_locked(strategy_name)
            || self.queue.contains_strategy(strategy_name)
            || self
                .running
                .values()
                .any(|j| j.strategy_name == strategy_name)
    }

    fn finish(&mut self, mut job: ScheduledJob, status: JobStatus, limit: usize) {
        job.status = status;
        job.finished_at = Some(Utc::now());
        self.completed.push_back(job);
        while self.completed.len() > limit.max(1) {
            self.completed.pop_front();
        }
    }

    fn configuration_for(
        &self,
        strategy_name: &str,
        default: &Arc<RetrainingConfiguration>,
    ) -> Arc<RetrainingConfiguration> {
        self.strategy_configurations
            .get(strategy_name)
            .cloned()
            .unwrap_or_else(|| default.clone())
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    engine: RetrainingEngine,
    detector: TriggerDetector,
    default_configuration: Arc<RetrainingConfiguration>,
    state: Mutex<SchedulerState>,
    wake: Notify,
    shutdown: CancelToken,
}

/// Cheap to clone; all clones share one scheduler
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        engine: RetrainingEngine,
        detector: TriggerDetector,
    ) -> Self {
        let default_configuration = Arc::new(engine.default_configuration().clone());
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                engine,
                detector,
                default_configuration,
                state: Mutex::new(SchedulerState::default()),
                wake: Notify::new(),
                shutdown: CancelToken::new(),
            }),
        }
    }

    /// Configuration used for this strategy's trigger jobs
    pub async fn set_strategy_configuration(
        &self,
        strategy_name: &str,
        configuration: RetrainingConfiguration,
    ) -> Result<()> {
        configuration.validate()?;
        self.inner
            .state
            .lock()
            .await
            .strategy_configurations
            .insert(strategy_name.to_string(), Arc::new(configuration));
        Ok(())
    }

    // ==================== Schedules ====================

    pub async fn add_schedule(&self, mut schedule: Schedule) -> Result<Uuid> {
        schedule.spec.validate()?;
        if let Some(cfg) = &schedule.configuration {
            cfg.validate()?;
        }
        schedule.refresh_next_run(Utc::now())?;
        let id = schedule.id;
        info!(
            schedule_id = %id,
            strategy = %schedule.strategy_name,
            spec = %schedule.spec,
            next_run = ?schedule.next_run,
            "Schedule added"
        );
        self.inner.state.lock().await.schedules.insert(id, schedule);
        Ok(id)
    }

    pub async fn remove_schedule(&self, schedule_id: Uuid) -> bool {
        let removed = self
            .inner
            .state
            .lock()
            .await
            .schedules
            .remove(&schedule_id)
            .is_some();
        if removed {
            info!(schedule_id = %schedule_id, "Schedule removed");
        }
        removed
    }

    /// Patch a schedule; `next_run` is recomputed when its spec or `enabled` changes
    pub async fn update_schedule(&self, schedule_id: Uuid, update: ScheduleUpdate) -> Result<Schedule> {
        let mut state = self.inner.state.lock().await;
        let schedule = state
            .schedules
            .get_mut(&schedule_id)
            .ok_or_else(|| RetrainError::NotFound(format!("schedule {}", schedule_id)))?;

        let mut patched = schedule.clone();
        if update.apply(&mut patched)? {
            patched.refresh_next_run(Utc::now())?;
        }
        *schedule = patched.clone();
        debug!(schedule_id = %schedule_id, next_run = ?patched.next_run, "Schedule updated");
        Ok(patched)
    }

    pub async fn get_schedules(&self) -> Vec<Schedule> {
        self.inner
            .state
            .lock()
            .await
            .schedules
            .values()
            .cloned()
            .collect()
    }

    /// Enqueue a job for every enabled schedule due at `now`.
    ///
    /// Schedules whose strategy is locked keep their `next_run` and fire on the
    /// first pass after the lock is released.
    pub async fn fire_due_schedules_at(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut fired = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            let mut due = Vec::new();
            for schedule in state.schedules.values().filter(|s| s.is_due(now)) {
                if state.locks.is_locked(&schedule.strategy_name) {
                    debug!(
                        schedule_id = %schedule.id,
                        strategy = %schedule.strategy_name,
                        "Schedule due but strategy locked, deferring"
                    );
                } else {
                    due.push(schedule.id);
                }
            }

            for schedule_id in due {
                let Some(schedule) = state.schedules.get_mut(&schedule_id) else {
                    continue;
                };
                let slot = schedule.next_run.unwrap_or(now);
                schedule.last_run = Some(now);
                if let Err(e) = schedule.refresh_next_run(now) {
                    error!(schedule_id = %schedule_id, error = %e, "Cannot compute next run, disabling schedule");
                    schedule.enabled = false;
                    schedule.next_run = None;
                }
                let configuration = schedule
                    .configuration
                    .clone()
                    .unwrap_or_else(|| self.inner.default_configuration.clone());
                let job = ScheduledJob::new(
                    &schedule.strategy_name,
                    schedule.priority,
                    schedule.retraining_kind,
                    configuration,
                    Vec::new(),
                    JobSource::Schedule { schedule_id },
                )
                .with_scheduled_time(slot);

                info!(
                    schedule_id = %schedule_id,
                    job_id = %job.id,
                    strategy = %job.strategy_name,
                    "Schedule fired"
                );
                fired.push(job.id);
                state.queue.push(job);
            }
        }
        if !fired.is_empty() {
            self.inner.wake.notify_one();
        }
        fired
    }

    // ==================== Jobs ====================

    /// Enqueue a job now. Accepted regardless of lock state; only a malformed
    /// configuration is rejected.
    pub async fn schedule_immediate_job(
        &self,
        strategy_name: &str,
        triggers: Vec<TriggerCondition>,
        priority: JobPriority,
        kind: RetrainingKind,
        configuration: Option<RetrainingConfiguration>,
    ) -> Result<Uuid> {
        let configuration = match configuration {
            Some(cfg) => {
                cfg.validate()?;
                Arc::new(cfg)
            }
            None => self
                .inner
                .state
                .lock()
                .await
                .configuration_for(strategy_name, &self.inner.default_configuration),
        };
        let source = if triggers.is_empty() {
            JobSource::Manual
        } else {
            JobSource::Trigger
        };
        let job = ScheduledJob::new(strategy_name, priority, kind, configuration, triggers, source);
        let job_id = job.id;
        self.inner.state.lock().await.queue.push(job);
        info!(job_id = %job_id, strategy = strategy_name, priority = %priority, "Job scheduled");
        self.inner.wake.notify_one();
        Ok(job_id)
    }

    /// Cancel a queued job (removed at once) or a running one (forwarded to the
    /// engine; the lock is released when reconciliation sees it Cancelled).
    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        let engine_job_id = {
            let mut state = self.inner.state.lock().await;
            if let Some(job) = state.queue.remove(job_id) {
                info!(job_id = %job_id, strategy = %job.strategy_name, "Queued job cancelled");
                let limit = self.inner.config.completed_history_limit;
                state.finish(job, JobStatus::Cancelled, limit);
                return true;
            }
            match state.running.get(&job_id).map(|j| j.engine_job_id) {
                Some(Some(engine_job_id)) => engine_job_id,
                Some(None) => {
                    state.pending_cancel.insert(job_id);
                    return true;
                }
                None => return false,
            }
        };
        self.inner.engine.cancel_job(engine_job_id).await
    }

    /// One dispatch pass: start queued jobs in key order while capacity remains,
    /// skipping (not blocking on) jobs whose strategy is locked
    pub async fn dispatch_pending(&self) -> usize {
        let max = self.inner.config.max_concurrent_jobs;
        let limit = self.inner.config.completed_history_limit;
        let mut dispatched = 0;

        loop {
            let (key, job) = {
                let mut state = self.inner.state.lock().await;
                if state.running.len() >= max {
                    break;
                }

                let mut set_aside = Vec::new();
                let mut picked = None;
                while let Some((key, job)) = state.queue.pop() {
                    if state.locks.is_locked(&job.strategy_name) {
                        set_aside.push((key, job));
                    } else {
                        picked = Some((key, job));
                        break;
                    }
                }
                for (key, job) in set_aside {
                    state.queue.requeue(key, job);
                }
                let Some((key, mut job)) = picked else {
                    break;
                };

                if let Err(e) = state.locks.try_acquire(&job.strategy_name, job.id) {
                    // Unreachable while the lock check above holds
                    warn!(job_id = %job.id, error = %e, "Lock acquisition failed");
                    state.queue.requeue(key, job);
                    break;
                }
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                state.running.insert(job.id, job.clone());
                (key, job)
            };

            let result = self
                .inner
                .engine
                .execute(
                    &job.strategy_name,
                    job.configuration.clone(),
                    job.retraining_kind,
                )
                .await;

            let mut state = self.inner.state.lock().await;
            match result {
                Ok(engine_job_id) => {
                    let cancel_requested = state.pending_cancel.remove(&job.id);
                    if let Some(running) = state.running.get_mut(&job.id) {
                        running.engine_job_id = Some(engine_job_id);
                    }
                    drop(state);
                    info!(
                        job_id = %job.id,
                        engine_job_id = %engine_job_id,
                        strategy = %job.strategy_name,
                        priority = %job.priority,
                        "Job dispatched"
                    );
                    if cancel_requested {
                        self.inner.engine.cancel_job(engine_job_id).await;
                    }
                    dispatched += 1;
                }
                Err(RetrainError::Capacity { active, max }) => {
                    state.running.remove(&job.id);
                    state.locks.release(&job.strategy_name, job.id);
                    let mut job = job;
                    job.status = JobStatus::Queued;
                    job.started_at = None;
                    if state.pending_cancel.remove(&job.id) {
                        state.finish(job, JobStatus::Cancelled, limit);
                    } else {
                        state.queue.requeue(key, job);
                    }
                    debug!(active, max, "Engine at capacity, job requeued");
                    break;
                }
                Err(e) => {
                    state.running.remove(&job.id);
                    state.locks.release(&job.strategy_name, job.id);
                    state.pending_cancel.remove(&job.id);
                    error!(job_id = %job.id, strategy = %job.strategy_name, error = %e, "Dispatch failed");
                    let mut job = job;
                    job.error = Some(e.to_string());
                    state.finish(job, JobStatus::Failed, limit);
                }
            }
        }
        dispatched
    }

    /// Release locks and record results for running jobs the engine has finished
    pub async fn reconcile(&self) -> usize {
        let running: Vec<(Uuid, Uuid)> = {
            let state = self.inner.state.lock().await;
            state
                .running
                .values()
                .filter_map(|j| j.engine_job_id.map(|e| (j.id, e)))
                .collect()
        };

        let mut finished = Vec::new();
        for (job_id, engine_job_id) in running {
            match self.inner.engine.get_job_status(engine_job_id).await {
                Some(engine_job) if engine_job.is_terminal() => finished.push((
                    job_id,
                    Some(engine_job.state),
                    engine_job.error_message,
                    engine_job.completed_at,
                )),
                Some(_) => {}
                None => finished.push((
                    job_id,
                    None,
                    Some("engine has no record of the job".to_string()),
                    None,
                )),
            }
        }
        if finished.is_empty() {
            return 0;
        }

        let limit = self.inner.config.completed_history_limit;
        let mut completed = Vec::new();
        let count = finished.len();
        {
            let mut state = self.inner.state.lock().await;
            for (job_id, engine_state, error, completed_at) in finished {
                let Some(mut job) = state.running.remove(&job_id) else {
                    continue;
                };
                state.locks.release(&job.strategy_name, job.id);
                state.pending_cancel.remove(&job.id);

                let status = engine_state
                    .and_then(JobStatus::from_engine_state)
                    .unwrap_or(JobStatus::Failed);
                job.engine_state = engine_state;
                job.error = error;
                info!(
                    job_id = %job.id,
                    strategy = %job.strategy_name,
                    status = %status,
                    engine_state = ?engine_state,
                    "Job reconciled"
                );
                if status == JobStatus::Completed {
                    completed.push((
                        job.strategy_name.clone(),
                        job.trigger_ids(),
                        completed_at.unwrap_or_else(Utc::now),
                    ));
                }
                state.finish(job, status, limit);
            }
        }

        for (strategy, trigger_ids, at) in completed {
            for trigger_id in trigger_ids {
                self.inner.detector.resolve_trigger(trigger_id).await;
            }
            self.inner.detector.record_retraining(&strategy, at).await;
        }
        self.inner.wake.notify_one();
        count
    }

    /// Turn active detector triggers into jobs, one per strategy without a queued or running job
    pub async fn poll_triggers(&self) -> Vec<Uuid> {
        let active = self.inner.detector.get_active_triggers(None).await;
        let mut by_strategy: BTreeMap<String, Vec<TriggerCondition>> = BTreeMap::new();
        for trigger in active {
            by_strategy
                .entry(trigger.strategy_name.clone())
                .or_default()
                .push(trigger);
        }

        let mut created = Vec::new();
        {
            let mut state = self.inner.state.lock().await;
            for (strategy, triggers) in by_strategy {
                if state.has_job_for(&strategy) {
                    continue;
                }
                let priority = triggers
                    .iter()
                    .map(|t| t.severity.job_priority())
                    .min()
                    .unwrap_or_default();
                let kind = if triggers
                    .iter()
                    .all(|t| t.kind() == TriggerKind::NewDataAvailable)
                {
                    RetrainingKind::Incremental
                } else {
                    RetrainingKind::FullRetrain
                };
                let configuration =
                    state.configuration_for(&strategy, &self.inner.default_configuration);
                let job = ScheduledJob::new(
                    &strategy,
                    priority,
                    kind,
                    configuration,
                    triggers,
                    JobSource::Trigger,
                );
                info!(
                    job_id = %job.id,
                    strategy = %strategy,
                    priority = %priority,
                    triggers = job.triggers.len(),
                    "Trigger job enqueued"
                );
                created.push(job.id);
                state.queue.push(job);
            }
        }
        if !created.is_empty() {
            self.inner.wake.notify_one();
        }
        created
    }

    // ==================== Queries ====================

    /// Queued jobs in dispatch order
    pub async fn get_job_queue(&self) -> Vec<ScheduledJob> {
        self.inner.state.lock().await.queue.snapshot()
    }

    pub async fn get_running_jobs(&self) -> Vec<ScheduledJob> {
        let state = self.inner.state.lock().await;
        let mut jobs: Vec<ScheduledJob> = state.running.values().cloned().collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Finished jobs, newest first
    pub async fn get_completed_jobs(&self, limit: usize) -> Vec<ScheduledJob> {
        let state = self.inner.state.lock().await;
        state.completed.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_job(&self, job_id: Uuid) -> Option<ScheduledJob> {
        let state = self.inner.state.lock().await;
        state
            .queue
            .get(job_id)
            .cloned()
            .or_else(|| state.running.get(&job_id).cloned())
            .or_else(|| state.completed.iter().rev().find(|j| j.id == job_id).cloned())
    }

    pub async fn get_scheduler_status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock().await;
        let since = Utc::now() - ChronoDuration::hours(24);
        let recent = |status: JobStatus| {
            state
                .completed
                .iter()
                .filter(|j| j.status == status && j.finished_at.map_or(false, |t| t >= since))
                .count()
        };
        SchedulerStatus {
            queue: state.queue.stats(),
            running: state.running.len(),
            max_concurrent_jobs: self.inner.config.max_concurrent_jobs,
            locked_strategies: state.locks.locked_strategies(),
            completed_last_24h: recent(JobStatus::Completed),
            failed_last_24h: recent(JobStatus::Failed),
            schedules_total: state.schedules.len(),
            schedules_enabled: state.schedules.values().filter(|s| s.enabled).count(),
        }
    }

    // ==================== Loops ====================

    /// Start the schedule-fire, trigger-poll, dispatch and reconciliation loops
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let cfg = &self.inner.config;
        let check = Duration::from_secs(cfg.check_interval_secs.max(1));
        let mut handles = vec![
            self.spawn_periodic("schedule-fire", check, |s| async move {
                s.fire_due_schedules_at(Utc::now()).await;
            }),
            self.spawn_periodic(
                "reconcile",
                Duration::from_secs(cfg.reconcile_interval_secs.max(1)),
                |s| async move {
                    s.reconcile().await;
                },
            ),
        ];
        if cfg.trigger_polling_enabled {
            handles.push(self.spawn_periodic("trigger-poll", check * 2, |s| async move {
                s.poll_triggers().await;
            }));
        }

        let scheduler = self.clone();
        let retry = Duration::from_millis(cfg.dispatch_retry_ms.max(1));
        handles.push(tokio::spawn(async move {
            debug!("dispatch loop started");
            loop {
                scheduler.dispatch_pending().await;
                tokio::select! {
                    _ = scheduler.inner.wake.notified() => {}
                    _ = tokio::time::sleep(retry) => {}
                    _ = scheduler.inner.shutdown.cancelled() => break,
                }
            }
            debug!("dispatch loop stopped");
        }));

        info!("Job scheduler started");
        handles
    }

    fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn(JobScheduler) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let scheduler = self.clone();
        tokio::spawn(async move {
            debug!("{} loop started (every {:?})", name, period);
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick(scheduler.clone()).await,
                    _ = scheduler.inner.shutdown.cancelled() => break,
                }
            }
            debug!("{} loop stopped", name);
        })
    }

    /// Stop the loops. Queued jobs stay queued; running jobs are left to the engine.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
        info!("Job scheduler stopping");
    }
}

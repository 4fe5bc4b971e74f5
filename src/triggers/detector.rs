//! Trigger Detector - watches live strategies and raises retraining triggers
//!
//! Four independent sweeps (performance, data availability, market regime,
//! calendar) run over every registered strategy. Detection has no direct
//! effect on scheduling; the scheduler polls the active trigger set.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collaborators::{Collaborators, MarketSnapshot};
use crate::config::TriggerConfig;
use crate::domain::{
    decline_pct, PerformanceMetric, PerformanceSample, TimeWindow, TriggerCondition,
    TriggerPayload, TriggerSeverity,
};
use crate::engine::CancelToken;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Performance,
    DataAvailability,
    Market,
    Calendar,
}

impl std::fmt::Display for SweepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepKind::Performance => write!(f, "performance"),
            SweepKind::DataAvailability => write!(f, "data_availability"),
            SweepKind::Market => write!(f, "market"),
            SweepKind::Calendar => write!(f, "calendar"),
        }
    }
}

/// Why a trigger left the active set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Resolved,
    Superseded,
    Cleared,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerRecord {
    pub trigger: TriggerCondition,
    pub outcome: TriggerOutcome,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TriggerStatistics {
    pub total: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub by_strategy: BTreeMap<String, u64>,
    pub active: usize,
    pub resolved: u64,
    pub superseded: u64,
    pub cleared: u64,
    /// Mean detection-to-resolution time of resolved triggers
    pub avg_resolution_secs: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Baseline {
    performance: PerformanceSample,
    market: Option<MarketSnapshot>,
    computed_at: DateTime<Utc>,
}

#[derive(Default)]
struct DetectorState {
    /// strategy -> registration time
    strategies: BTreeMap<String, DateTime<Utc>>,
    baselines: HashMap<String, Baseline>,
    active: HashMap<Uuid, TriggerCondition>,
    history: VecDeque<TriggerRecord>,
    last_retrained: HashMap<String, DateTime<Utc>>,
    stats: TriggerStatistics,
    resolution_secs_total: f64,
}

impl DetectorState {
    fn close(&mut self, id: Uuid, outcome: TriggerOutcome, history_limit: usize) -> Option<TriggerCondition> {
        let mut trigger = self.active.remove(&id)?;
        let now = Utc::now();
        match outcome {
            TriggerOutcome::Resolved => {
                trigger.resolved_at = Some(now);
                self.stats.resolved += 1;
                self.resolution_secs_total +=
                    (now - trigger.detected_at).num_milliseconds() as f64 / 1000.0;
            }
            TriggerOutcome::Superseded => self.stats.superseded += 1,
            TriggerOutcome::Cleared => self.stats.cleared += 1,
        }
        self.history.push_back(TriggerRecord {
            trigger: trigger.clone(),
            outcome,
            closed_at: now,
        });
        while self.history.len() > history_limit.max(1) {
            self.history.pop_front();
        }
        Some(trigger)
    }
}

struct DetectorInner {
    config: TriggerConfig,
    collaborators: Collaborators,
    state: RwLock<DetectorState>,
    shutdown: CancelToken,
}

/// Cheap to clone; all clones share one detector
#[derive(Clone)]
pub struct TriggerDetector {
    inner: Arc<DetectorInner>,
}

impl TriggerDetector {
    pub fn new(config: TriggerConfig, collaborators: Collaborators) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                config,
                collaborators,
                state: RwLock::new(DetectorState::default()),
                shutdown: CancelToken::new(),
            }),
        }
    }

    pub async fn register_strategy(&self, strategy_name: &str) {
        let mut state = self.inner.state.write().await;
        if !state.strategies.contains_key(strategy_name) {
            state
                .strategies
                .insert(strategy_name.to_string(), Utc::now());
            debug!(strategy = strategy_name, "Registered strategy for trigger detection");
        }
    }

    pub async fn strategies(&self) -> Vec<String> {
        self.inner.state.read().await.strategies.keys().cloned().collect()
    }

    /// Compute long-term baselines for every registered strategy
    pub async fn initialize(&self) -> Result<()> {
        for strategy in self.strategies().await {
            if let Err(e) = self.refresh_baseline(&strategy).await {
                warn!(strategy = %strategy, error = %e, "Baseline computation failed");
            }
        }
        info!("Trigger detector initialized");
        Ok(())
    }

    /// Start the four sweep loops
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let c = &self.inner.config;
        [
            (SweepKind::Performance, c.performance_check_interval_secs),
            (SweepKind::DataAvailability, c.data_check_interval_secs),
            (SweepKind::Market, c.market_check_interval_secs),
            (SweepKind::Calendar, c.calendar_check_interval_secs),
        ]
        .into_iter()
        .map(|(kind, secs)| {
            let detector = self.clone();
            let period = Duration::from_secs(secs.max(1));
            tokio::spawn(async move {
                debug!("{} sweep started (every {:?})", kind, period);
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => detector.sweep(kind).await,
                        _ = detector.inner.shutdown.cancelled() => break,
                    }
                }
                debug!("{} sweep stopped", kind);
            })
        })
        .collect()
    }

    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }

    /// Run one sweep over every registered strategy
    pub async fn sweep(&self, kind: SweepKind) {
        for strategy in self.strategies().await {
            let result = match kind {
                SweepKind::Performance => self.check_performance(&strategy).await,
                SweepKind::DataAvailability => self.check_data_availability(&strategy).await,
                SweepKind::Market => self.check_market_conditions(&strategy).await,
                SweepKind::Calendar => self.check_calendar(&strategy).await,
            };
            if let Err(e) = result {
                warn!(strategy = %strategy, sweep = %kind, error = %e, "Trigger check failed");
            }
        }
    }

    /// Run every check for one strategy now; returns its active triggers
    pub async fn check_triggers(&self, strategy_name: &str) -> Result<Vec<TriggerCondition>> {
        self.check_performance(strategy_name).await?;
        self.check_data_availability(strategy_name).await?;
        self.check_market_conditions(strategy_name).await?;
        self.check_calendar(strategy_name).await?;
        Ok(self.get_active_triggers(Some(strategy_name)).await)
    }

    pub async fn check_performance(&self, strategy_name: &str) -> Result<Option<TriggerCondition>> {
        let cfg = &self.inner.config;
        let current = self
            .inner
            .collaborators
            .performance
            .recent_performance(strategy_name, cfg.short_window_days)
            .await?;
        if current.sample_size < cfg.min_sample_size {
            debug!(
                strategy = strategy_name,
                samples = current.sample_size,
                "Too few samples for performance check"
            );
            return Ok(None);
        }

        let baseline = self.baseline(strategy_name).await?.performance;
        if baseline.sample_size < cfg.min_sample_size {
            return Ok(None);
        }

        let candidates = [
            (
                PerformanceMetric::Roi,
                baseline.roi,
                current.roi,
                cfg.roi_decline_threshold_pct,
            ),
            (
                PerformanceMetric::WinRate,
                baseline.win_rate,
                current.win_rate,
                cfg.win_rate_decline_threshold_pct,
            ),
        ];
        let worst = candidates
            .into_iter()
            .map(|(metric, base, cur, threshold)| (metric, base, cur, decline_pct(base, cur), threshold))
            .filter(|(_, _, _, decline, threshold)| decline > threshold)
            .max_by(|a, b| a.3.total_cmp(&b.3));

        let Some((metric, baseline_value, current_value, decline, _)) = worst else {
            return Ok(None);
        };
        let severity = if decline > cfg.critical_decline_pct {
            TriggerSeverity::Critical
        } else if decline > cfg.high_decline_pct {
            TriggerSeverity::High
        } else {
            TriggerSeverity::Medium
        };

        let trigger = TriggerCondition::new(
            strategy_name,
            severity,
            format!(
                "{} declined {:.1}% ({:.4} -> {:.4})",
                metric, decline, baseline_value, current_value
            ),
            TriggerPayload::PerformanceDegradation {
                metric,
                baseline_value,
                current_value,
                decline_pct: decline,
                sample_size: current.sample_size,
            },
        );
        Ok(Some(self.raise(trigger).await))
    }

    pub async fn check_data_availability(
        &self,
        strategy_name: &str,
    ) -> Result<Option<TriggerCondition>> {
        let cfg = &self.inner.config;
        let now = Utc::now();
        let since = {
            let state = self.inner.state.read().await;
            state.last_retrained.get(strategy_name).copied()
        }
        .unwrap_or_else(|| now - ChronoDuration::days(cfg.long_window_days as i64));

        let count = self
            .inner
            .collaborators
            .data
            .count_trainable_samples(strategy_name, TimeWindow { start: since, end: now })
            .await?;
        if count.total < cfg.new_data_threshold {
            return Ok(None);
        }

        let severity = if count.total >= cfg.new_data_threshold.saturating_mul(3) {
            TriggerSeverity::Medium
        } else {
            TriggerSeverity::Low
        };
        let trigger = TriggerCondition::new(
            strategy_name,
            severity,
            format!("{} new samples since {}", count.total, since.format("%Y-%m-%d")),
            TriggerPayload::NewDataAvailable {
                new_samples: count.total,
                since,
            },
        );
        Ok(Some(self.raise(trigger).await))
    }

    pub async fn check_market_conditions(
        &self,
        strategy_name: &str,
    ) -> Result<Option<TriggerCondition>> {
        let cfg = &self.inner.config;
        let current = self
            .inner
            .collaborators
            .market
            .market_snapshot(strategy_name, cfg.short_window_days)
            .await?;
        let Some(baseline) = self.baseline(strategy_name).await?.market else {
            return Ok(None);
        };

        let shifts = [
            ("volatility", baseline.volatility, current.volatility),
            ("line_movement", baseline.line_movement, current.line_movement),
        ];
        let worst = shifts
            .into_iter()
            .map(|(name, base, cur)| (name, base, cur, change_pct(base, cur)))
            .filter(|(_, _, _, change)| *change > cfg.market_change_threshold_pct)
            .max_by(|a, b| a.3.total_cmp(&b.3));

        let Some((indicator, baseline_value, current_value, change)) = worst else {
            return Ok(None);
        };
        let severity = if change > cfg.market_change_threshold_pct * 2.0 {
            TriggerSeverity::High
        } else {
            TriggerSeverity::Medium
        };
        let trigger = TriggerCondition::new(
            strategy_name,
            severity,
            format!(
                "{} shifted {:.1}% ({:.4} -> {:.4})",
                indicator, change, baseline_value, current_value
            ),
            TriggerPayload::MarketConditionChange {
                indicator: indicator.to_string(),
                baseline_value,
                current_value,
                change_pct: change,
            },
        );
        Ok(Some(self.raise(trigger).await))
    }

    /// Never-retrained strategies count from their registration time
    pub async fn check_calendar(&self, strategy_name: &str) -> Result<Option<TriggerCondition>> {
        let (last_retrained, registered) = {
            let state = self.inner.state.read().await;
            (
                state.last_retrained.get(strategy_name).copied(),
                state.strategies.get(strategy_name).copied(),
            )
        };
        let Some(reference) = last_retrained.or(registered) else {
            debug!(strategy = strategy_name, "Calendar check skipped for unregistered strategy");
            return Ok(None);
        };

        let days = (Utc::now() - reference).num_days();
        if days <= self.inner.config.max_days_between_retrains {
            return Ok(None);
        }
        let trigger = TriggerCondition::new(
            strategy_name,
            TriggerSeverity::Low,
            format!("{} days since last retrain", days),
            TriggerPayload::Scheduled {
                days_since_last_retrain: last_retrained.map(|_| days),
            },
        );
        Ok(Some(self.raise(trigger).await))
    }

    pub async fn create_manual_trigger(
        &self,
        strategy_name: &str,
        reason: &str,
        severity: TriggerSeverity,
    ) -> TriggerCondition {
        let trigger = TriggerCondition::new(
            strategy_name,
            severity,
            format!("Manual override: {}", reason),
            TriggerPayload::ManualOverride {
                reason: reason.to_string(),
                requested_by: "operator".to_string(),
            },
        );
        self.register_strategy(strategy_name).await;
        self.raise(trigger).await
    }

    /// Mark resolved and move to history. No effect on other triggers.
    pub async fn resolve_trigger(&self, trigger_id: Uuid) -> bool {
        let limit = self.inner.config.history_limit;
        let closed = self
            .inner
            .state
            .write()
            .await
            .close(trigger_id, TriggerOutcome::Resolved, limit);
        if let Some(trigger) = &closed {
            info!(trigger_id = %trigger_id, strategy = %trigger.strategy_name, kind = %trigger.kind(), "Trigger resolved");
        }
        closed.is_some()
    }

    /// Drop an active trigger without resolving it
    pub async fn clear_trigger(&self, trigger_id: Uuid) -> bool {
        let limit = self.inner.config.history_limit;
        self.inner
            .state
            .write()
            .await
            .close(trigger_id, TriggerOutcome::Cleared, limit)
            .is_some()
    }

    /// Record a successful retrain; baselines are recomputed on next use.
    ///
    /// Active triggers are left alone: the scheduler resolves the ones the job
    /// carried, the rest wait for supersession or an operator.
    pub async fn record_retraining(&self, strategy_name: &str, at: DateTime<Utc>) {
        let mut state = self.inner.state.write().await;
        state.last_retrained.insert(strategy_name.to_string(), at);
        state.baselines.remove(strategy_name);
        info!(strategy = strategy_name, "Recorded retraining");
    }

    pub async fn last_retrained(&self, strategy_name: &str) -> Option<DateTime<Utc>> {
        self.inner
            .state
            .read()
            .await
            .last_retrained
            .get(strategy_name)
            .copied()
    }

    /// Active triggers, oldest first
    pub async fn get_active_triggers(&self, strategy_name: Option<&str>) -> Vec<TriggerCondition> {
        let state = self.inner.state.read().await;
        let mut triggers: Vec<TriggerCondition> = state
            .active
            .values()
            .filter(|t| strategy_name.map_or(true, |s| t.strategy_name == s))
            .cloned()
            .collect();
        triggers.sort_by_key(|t| t.detected_at);
        triggers
    }

    /// Closed triggers, newest first
    pub async fn get_trigger_history(&self, limit: usize) -> Vec<TriggerRecord> {
        let state = self.inner.state.read().await;
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_trigger_statistics(&self) -> TriggerStatistics {
        let state = self.inner.state.read().await;
        let mut stats = state.stats.clone();
        stats.active = state.active.len();
        stats.avg_resolution_secs = (stats.resolved > 0)
            .then(|| state.resolution_secs_total / stats.resolved as f64);
        stats
    }

    /// Insert into the active set, superseding the previous trigger of the same (strategy, kind)
    async fn raise(&self, trigger: TriggerCondition) -> TriggerCondition {
        let limit = self.inner.config.history_limit;
        let kind = trigger.kind();
        {
            let mut state = self.inner.state.write().await;
            let superseded: Vec<Uuid> = state
                .active
                .values()
                .filter(|t| t.strategy_name == trigger.strategy_name && t.kind() == kind)
                .map(|t| t.id)
                .collect();
            for id in superseded {
                state.close(id, TriggerOutcome::Superseded, limit);
            }

            let stats = &mut state.stats;
            stats.total += 1;
            *stats.by_kind.entry(kind.to_string()).or_insert(0) += 1;
            *stats
                .by_severity
                .entry(trigger.severity.to_string())
                .or_insert(0) += 1;
            *stats
                .by_strategy
                .entry(trigger.strategy_name.clone())
                .or_insert(0) += 1;
            state.active.insert(trigger.id, trigger.clone());
        }

        match trigger.severity {
            TriggerSeverity::Critical | TriggerSeverity::High => warn!(
                trigger_id = %trigger.id,
                strategy = %trigger.strategy_name,
                kind = %kind,
                severity = %trigger.severity,
                "{}", trigger.description
            ),
            _ => info!(
                trigger_id = %trigger.id,
                strategy = %trigger.strategy_name,
                kind = %kind,
                severity = %trigger.severity,
                "{}", trigger.description
            ),
        }
        trigger
    }

    /// Stored baseline, recomputed when missing or older than `baseline_refresh_hours`
    async fn baseline(&self, strategy_name: &str) -> Result<Baseline> {
        let max_age = ChronoDuration::hours(self.inner.config.baseline_refresh_hours as i64);
        let cached = {
            let state = self.inner.state.read().await;
            state.baselines.get(strategy_name).copied()
        };
        match cached {
            Some(b) if Utc::now() - b.computed_at <= max_age => Ok(b),
            _ => self.refresh_baseline(strategy_name).await,
        }
    }

    async fn refresh_baseline(&self, strategy_name: &str) -> Result<Baseline> {
        let days = self.inner.config.long_window_days;
        let c = &self.inner.collaborators;
        let performance = c.performance.recent_performance(strategy_name, days).await?;
        let market = match c.market.market_snapshot(strategy_name, days).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(strategy = strategy_name, error = %e, "Market baseline unavailable");
                None
            }
        };
        let baseline = Baseline {
            performance,
            market,
            computed_at: Utc::now(),
        };
        self.inner
            .state
            .write()
            .await
            .baselines
            .insert(strategy_name.to_string(), baseline);
        debug!(strategy = strategy_name, roi = performance.roi, "Baseline refreshed");
        Ok(baseline)
    }
}

/// Absolute relative change (%); a zero baseline falls back to percentage points
fn change_pct(baseline: f64, current: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        (current - baseline).abs() * 100.0
    } else {
        (current - baseline).abs() / baseline.abs() * 100.0
    }
}

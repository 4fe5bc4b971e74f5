//! Audit trail of retraining job state changes
//!
//! Events are immutable records. They are not read back by the engine during
//! normal operation; `unfinished_jobs` exists only for restart recovery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::RetrainingState;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    StateTransition,
    TrafficChange,
    Promotion,
    Rollback,
}

impl AuditEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::StateTransition => "state_transition",
            AuditEventKind::TrafficChange => "traffic_change",
            AuditEventKind::Promotion => "promotion",
            AuditEventKind::Rollback => "rollback",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "state_transition" => Some(AuditEventKind::StateTransition),
            "traffic_change" => Some(AuditEventKind::TrafficChange),
            "promotion" => Some(AuditEventKind::Promotion),
            "rollback" => Some(AuditEventKind::Rollback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub job_id: Uuid,
    pub strategy_name: String,
    pub kind: AuditEventKind,
    /// Job state at the time of the event
    pub state: RetrainingState,
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        job_id: Uuid,
        strategy_name: &str,
        kind: AuditEventKind,
        state: RetrainingState,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            job_id,
            strategy_name: strategy_name.to_string(),
            kind,
            state,
            detail,
            recorded_at: Utc::now(),
        }
    }

    pub fn transition(job_id: Uuid, strategy_name: &str, state: RetrainingState) -> Self {
        Self::new(
            job_id,
            strategy_name,
            AuditEventKind::StateTransition,
            state,
            serde_json::Value::Null,
        )
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;

    /// Latest state-transition event of every job whose last recorded state is non-terminal
    async fn unfinished_jobs(&self) -> Result<Vec<AuditEvent>> {
        Ok(Vec::new())
    }
}

/// Reduce events to the jobs whose last state transition is non-terminal
pub fn unfinished_from_events<'a>(events: impl IntoIterator<Item = &'a AuditEvent>) -> Vec<AuditEvent> {
    let mut latest: HashMap<Uuid, &AuditEvent> = HashMap::new();
    for event in events {
        if event.kind != AuditEventKind::StateTransition {
            continue;
        }
        match latest.get(&event.job_id) {
            Some(seen) if seen.recorded_at > event.recorded_at => {}
            _ => {
                latest.insert(event.job_id, event);
            }
        }
    }
    let mut unfinished: Vec<AuditEvent> = latest
        .into_values()
        .filter(|e| !e.state.is_terminal())
        .cloned()
        .collect();
    unfinished.sort_by_key(|e| e.recorded_at);
    unfinished
}

/// Process-local audit log for dry runs and tests
#[derive(Default)]
pub struct InMemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.read().await.clone()
    }

    pub async fn events_for_job(&self, job_id: Uuid) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn unfinished_jobs(&self) -> Result<Vec<AuditEvent>> {
        Ok(unfinished_from_events(self.events.read().await.iter()))
    }
}

/// Sink that drops everything
pub struct NullAuditSink;

#[async_trait]
impl AuditSink for NullAuditSink {
    async fn record(&self, _event: AuditEvent) -> Result<()> {
        Ok(())
    }
}

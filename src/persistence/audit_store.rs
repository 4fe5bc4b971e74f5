//! PostgreSQL-backed audit store

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::domain::RetrainingState;
use crate::error::Result;

#[derive(Clone)]
pub struct PostgresAuditStore {
    pool: PgPool,
}

impl PostgresAuditStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL audit store");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the events table if missing
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS retraining_events (
                id BIGSERIAL PRIMARY KEY,
                job_id UUID NOT NULL,
                strategy_name TEXT NOT NULL,
                event_type TEXT NOT NULL,
                state TEXT NOT NULL,
                detail JSONB,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_retraining_events_job ON retraining_events(job_id, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_retraining_events_strategy_time ON retraining_events(strategy_name, recorded_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn events_for_job(&self, job_id: Uuid) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, strategy_name, event_type, state, detail, recorded_at
            FROM retraining_events
            WHERE job_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_event).collect())
    }
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Option<AuditEvent> {
    let event_type: String = row.get("event_type");
    let state: String = row.get("state");
    let (kind, state) = match (
        AuditEventKind::parse(&event_type),
        state.parse::<RetrainingState>(),
    ) {
        (Some(kind), Ok(state)) => (kind, state),
        _ => {
            warn!(event_type = %event_type, state = %state, "Skipping unreadable audit row");
            return None;
        }
    };
    let detail: Option<serde_json::Value> = row.get("detail");
    Some(AuditEvent {
        job_id: row.get("job_id"),
        strategy_name: row.get("strategy_name"),
        kind,
        state,
        detail: detail.unwrap_or(serde_json::Value::Null),
        recorded_at: row.get("recorded_at"),
    })
}

#[async_trait]
impl AuditSink for PostgresAuditStore {
    #[instrument(skip(self, event), fields(job_id = %event.job_id))]
    async fn record(&self, event: AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retraining_events (job_id, strategy_name, event_type, state, detail, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.job_id)
        .bind(&event.strategy_name)
        .bind(event.kind.as_str())
        .bind(event.state.as_str())
        .bind(&event.detail)
        .bind(event.recorded_at)
        .execute(&self.pool)
        .await?;

        debug!(kind = event.kind.as_str(), state = %event.state, "Recorded audit event");
        Ok(())
    }

    async fn unfinished_jobs(&self) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, strategy_name, event_type, state, detail, recorded_at
            FROM (
                SELECT DISTINCT ON (job_id)
                       job_id, strategy_name, event_type, state, detail, recorded_at
                FROM retraining_events
                WHERE event_type = 'state_transition'
                ORDER BY job_id, id DESC
            ) latest
            WHERE state NOT IN ('COMPLETED', 'FAILED', 'CANCELLED', 'ROLLED_BACK')
            ORDER BY recorded_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(row_to_event).collect())
    }
}

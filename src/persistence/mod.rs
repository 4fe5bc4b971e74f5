//! Persistence Layer for the audit trail and restart recovery
//!
//! - Audit sink trait and in-memory log
//! - PostgreSQL audit store

pub mod audit;
pub mod audit_store;

pub use audit::{
    unfinished_from_events, AuditEvent, AuditEventKind, AuditSink, InMemoryAuditLog,
    NullAuditSink,
};
pub use audit_store::PostgresAuditStore;

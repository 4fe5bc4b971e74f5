//! Job Scheduler
//!
//! - Priority queue keyed by (priority, scheduled time, sequence)
//! - Recurring cron / interval schedules
//! - Per-strategy exclusivity locks
//! - Dispatch and reconciliation against the retraining engine

pub mod locks;
pub mod queue;
pub mod schedule;
#[allow(clippy::module_inception)]
pub mod scheduler;

pub use locks::StrategyLocks;
pub use queue::{JobOrderKey, JobQueue, QueueStats};
pub use schedule::{Schedule, ScheduleSpec, ScheduleUpdate};
pub use scheduler::{JobScheduler, SchedulerStatus};

//! Retraining Engine
//!
//! - Job workflow and finalization (`engine`)
//! - Canary A/B analysis (`ab_test`)
//! - Production model registry and traffic split (`registry`)
//! - Cancellable waits (`cancel`)

pub mod ab_test;
pub mod cancel;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod registry;

pub use cancel::CancelToken;
pub use engine::{EngineStatus, RetrainingEngine};
pub use registry::ModelRegistry;

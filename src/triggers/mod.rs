pub mod detector;

pub use detector::{
    SweepKind, TriggerDetector, TriggerOutcome, TriggerRecord, TriggerStatistics,
};

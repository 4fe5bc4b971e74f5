use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Retraining job state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrainingState {
    /// Accepted by the engine, execution task not yet started
    Pending,
    /// Counting and quality-checking training samples
    PreparingData,
    /// Hyperparameter search running in the optimizer
    Optimizing,
    /// Candidate compared against baseline by the validator
    Validating,
    /// Candidate receiving a fixed traffic split against baseline
    ABTesting,
    /// Staged rollout of the candidate
    Deploying,
    /// Finished without error (promoted or "no change")
    Completed,
    /// Finished with an error or timeout
    Failed,
    /// Cancelled by an operator
    Cancelled,
    /// Rollout regression detected, baseline restored
    RolledBack,
}

impl RetrainingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrainingState::Pending => "PENDING",
            RetrainingState::PreparingData => "PREPARING_DATA",
            RetrainingState::Optimizing => "OPTIMIZING",
            RetrainingState::Validating => "VALIDATING",
            RetrainingState::ABTesting => "AB_TESTING",
            RetrainingState::Deploying => "DEPLOYING",
            RetrainingState::Completed => "COMPLETED",
            RetrainingState::Failed => "FAILED",
            RetrainingState::Cancelled => "CANCELLED",
            RetrainingState::RolledBack => "ROLLED_BACK",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: RetrainingState) -> bool {
        use RetrainingState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, target) {
            // Failure and cancellation are reachable from every live state
            (_, Failed) | (_, Cancelled) => true,

            (Pending, PreparingData) => true,
            (PreparingData, Optimizing) => true,
            (Optimizing, Validating) => true,

            // Validation rejection ends the job as "no change"
            (Validating, Completed) => true,
            (Validating, ABTesting) => true,
            // A/B disabled
            (Validating, Deploying) => true,

            // Not recommended by the A/B analysis
            (ABTesting, Completed) => true,
            (ABTesting, Deploying) => true,

            (Deploying, Completed) => true,
            (Deploying, RolledBack) => true,

            _ => false,
        }
    }

    /// Is this a terminal state?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetrainingState::Completed
                | RetrainingState::Failed
                | RetrainingState::Cancelled
                | RetrainingState::RolledBack
        )
    }

    /// Does the candidate currently receive live traffic in this state?
    pub fn has_live_traffic(&self) -> bool {
        matches!(self, RetrainingState::ABTesting | RetrainingState::Deploying)
    }
}

impl fmt::Display for RetrainingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RetrainingState {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        use RetrainingState::*;
        [
            Pending,
            PreparingData,
            Optimizing,
            Validating,
            ABTesting,
            Deploying,
            Completed,
            Failed,
            Cancelled,
            RolledBack,
        ]
        .into_iter()
        .find(|state| state.as_str().eq_ignore_ascii_case(raw.trim()))
        .ok_or_else(|| format!("unknown retraining state '{}'", raw))
    }
}

//! Strategy Locks - per-strategy mutual exclusion for dispatched jobs

use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Result, RetrainError};

/// Per-strategy exclusivity: at most one dispatched, non-terminal job per strategy
#[derive(Debug, Default)]
pub struct StrategyLocks {
    owners: HashMap<String, Uuid>,
}

impl StrategyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self, strategy_name: &str, job_id: Uuid) -> Result<()> {
        match self.owners.get(strategy_name) {
            Some(owner) if *owner != job_id => {
                Err(RetrainError::SchedulingConflict(strategy_name.to_string()))
            }
            _ => {
                self.owners.insert(strategy_name.to_string(), job_id);
                Ok(())
            }
        }
    }

    /// Release only if `job_id` still owns the lock
    pub fn release(&mut self, strategy_name: &str, job_id: Uuid) -> bool {
        if self.owners.get(strategy_name) == Some(&job_id) {
            self.owners.remove(strategy_name);
            true
        } else {
            false
        }
    }

    pub fn is_locked(&self, strategy_name: &str) -> bool {
        self.owners.contains_key(strategy_name)
    }

    pub fn locked_strategies(&self) -> Vec<String> {
        let mut names: Vec<String> = self.owners.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_job_conflicts() {
        let mut locks = StrategyLocks::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        locks.try_acquire("line_movement", first).unwrap();
        assert!(matches!(
            locks.try_acquire("line_movement", second),
            Err(RetrainError::SchedulingConflict(_))
        ));
        // Re-entrant for the owner
        locks.try_acquire("line_movement", first).unwrap();
        // Other strategies are independent
        locks.try_acquire("sharp_action", second).unwrap();
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_release_requires_owner() {
        let mut locks = StrategyLocks::new();
        let owner = Uuid::new_v4();
        locks.try_acquire("line_movement", owner).unwrap();

        assert!(!locks.release("line_movement", Uuid::new_v4()));
        assert!(locks.is_locked("line_movement"));
        assert!(locks.release("line_movement", owner));
        assert!(!locks.is_locked("line_movement"));
        assert!(locks.is_empty());
    }
}

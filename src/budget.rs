//! Cumulative inference spend against an optional ceiling.
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct BudgetState {
    total: f64,
    calls: u64,
}

/// Tracks spend across all workers of a run.
#[derive(Debug)]
pub struct BudgetManager {
    ceiling: Option<f64>,
    state: Mutex<BudgetState>,
}

impl BudgetManager {
    pub fn new(ceiling: Option<f64>) -> Self {
        Self {
            ceiling,
            state: Mutex::new(BudgetState::default()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ceiling(&self) -> Option<f64> {
        self.ceiling
    }

    /// Add the cost of one successful backend call.
    pub fn record_cost(&self, amount: f64) {
        let mut state = self.lock();
        state.total += amount.max(0.0);
        state.calls += 1;
    }

    pub fn total(&self) -> f64 {
        self.lock().total
    }

    pub fn calls(&self) -> u64 {
        self.lock().calls
    }

    /// `ceiling - total`, or infinity when no ceiling is set.
    pub fn remaining(&self) -> f64 {
        match self.ceiling {
            Some(ceiling) => ceiling - self.total(),
            None => f64::INFINITY,
        }
    }

    /// Pure check: would spending `amount` more cross the ceiling?
    pub fn would_exceed(&self, amount: f64) -> bool {
        match self.ceiling {
            Some(ceiling) => self.total() + amount > ceiling,
            None => false,
        }
    }

    /// True once the ceiling has been reached.
    pub fn is_exhausted(&self) -> bool {
        match self.ceiling {
            Some(ceiling) => self.total() >= ceiling,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_budget_never_exceeds() {
        let budget = BudgetManager::unlimited();
        budget.record_cost(1_000.0);
        assert!(budget.remaining().is_infinite());
        assert!(!budget.would_exceed(f64::MAX));
        assert!(!budget.is_exhausted());
        assert_eq!(budget.calls(), 1);
    }

    #[test]
    fn ceiling_tracks_remaining_and_exhaustion() {
        let budget = BudgetManager::new(Some(1.0));
        assert_eq!(budget.ceiling(), Some(1.0));
        budget.record_cost(0.4);
        budget.record_cost(0.4);
        assert!((budget.remaining() - 0.2).abs() < 1e-9);
        assert!(!budget.would_exceed(0.2));
        assert!(budget.would_exceed(0.3));
        assert!(!budget.is_exhausted());

        budget.record_cost(0.2);
        assert!(budget.is_exhausted());
        assert!((budget.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn negative_costs_are_ignored() {
        let budget = BudgetManager::new(Some(1.0));
        budget.record_cost(-5.0);
        assert_eq!(budget.total(), 0.0);
    }
}

//! Budget and convergence bookkeeping for one attack.

use graphfool_core::{AttackError, Result};

/// What the monitor says after observing an iteration's changed count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorVerdict {
    Continue,
    /// The changed count equals the previous iteration's count.
    Stalled,
}

/// Tracks `changed_attributes` across iterations.
///
/// Stall uses a one-step lookback: iteration `i` stalls when its count equals
/// the count at `i − 1`. The count before the first iteration is 0.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    prev_changed: usize,
    history: Vec<usize>,
    max_attributes: usize,
}

impl ConvergenceMonitor {
    pub fn new(max_attributes: usize) -> Self {
        Self {
            prev_changed: 0,
            history: Vec::new(),
            max_attributes,
        }
    }

    #[inline]
    pub fn max_attributes(&self) -> usize {
        self.max_attributes
    }

    /// Counts observed so far, one per iteration.
    pub fn history(&self) -> &[usize] {
        &self.history
    }

    /// A changed count above `max_attributes` means the unlocking mask leaked.
    pub fn check_budget(&self, changed: usize) -> Result<()> {
        if changed > self.max_attributes {
            return Err(AttackError::InvariantViolation(format!(
                "{changed} changed attributes exceed the budget of {}",
                self.max_attributes
            )));
        }
        Ok(())
    }

    /// Record the count for the current iteration.
    pub fn observe(&mut self, changed: usize) -> MonitorVerdict {
        self.history.push(changed);
        let stalled = changed == self.prev_changed;
        self.prev_changed = changed;
        if stalled {
            MonitorVerdict::Stalled
        } else {
            MonitorVerdict::Continue
        }
    }
}

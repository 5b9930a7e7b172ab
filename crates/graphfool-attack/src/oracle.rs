//! Stopping oracle: decides when an attack has succeeded.
//!
//! An attack only counts once it survives embedding. The oracle tracks this
//! with a three-state machine:
//!
//! ```text
//! Running --(continuous state flips)--> ConvergedContinuous
//! ConvergedContinuous --(embedded state flips)--> Success (terminal)
//! ConvergedContinuous --(embedded state does not flip)--> Running
//! ```

use crate::model::{predict, NodeClassifier};
use crate::step::victim_cross_entropy;
use crate::target::{label_flipped, AttackTarget};
use graphfool_core::{AttackError, Result};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleState {
    Running,
    ConvergedContinuous,
    Success,
}

/// Evaluation of the victims' predictions at one point in the search.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleReport {
    /// Mean victim cross-entropy against `y_targets`.
    pub loss: f32,
    /// Worst-victim margin; positive means that victim is flipped.
    pub margin: f32,
    pub success: bool,
    pub predictions: Vec<usize>,
}

impl OracleReport {
    pub fn is_finite(&self) -> bool {
        self.loss.is_finite() && !self.margin.is_nan()
    }
}

/// How far `row` is past the decision boundary in the attack's favour.
fn victim_margin(row: ArrayView1<'_, f32>, label: usize, targeted: bool) -> f32 {
    let best_other = row
        .iter()
        .enumerate()
        .filter(|&(c, _)| c != label)
        .map(|(_, &s)| s)
        .fold(f32::NEG_INFINITY, f32::max);
    if targeted {
        row[label] - best_other
    } else {
        best_other - row[label]
    }
}

#[derive(Debug, Clone)]
pub struct StoppingOracle {
    state: OracleState,
    evaluations: usize,
}

impl Default for StoppingOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl StoppingOracle {
    pub fn new() -> Self {
        Self {
            state: OracleState::Running,
            evaluations: 0,
        }
    }

    #[inline]
    pub fn state(&self) -> OracleState {
        self.state
    }

    /// Number of forward passes the oracle has run.
    #[inline]
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Evaluate the model on `features` without changing oracle state.
    pub fn evaluate<M: NodeClassifier + ?Sized>(
        &mut self,
        model: &M,
        features: &Array2<f32>,
        target: &AttackTarget,
    ) -> Result<OracleReport> {
        let scores = model.forward(features)?;
        self.evaluations += 1;

        let loss = victim_cross_entropy(&scores, target).loss;
        let all_predictions = predict(&scores);

        let mut margin = f32::INFINITY;
        let mut success = true;
        let mut predictions = Vec::with_capacity(target.attacked_nodes().len());
        for (node, label) in target.pairs() {
            let predicted = all_predictions[node];
            predictions.push(predicted);
            success &= label_flipped(predicted, label, target.is_targeted());
            margin = margin.min(victim_margin(scores.row(node), label, target.is_targeted()));
        }

        Ok(OracleReport {
            loss,
            margin,
            success,
            predictions,
        })
    }

    /// Feed the report for the unconstrained continuous state.
    pub fn observe_continuous(&mut self, report: &OracleReport) -> Result<OracleState> {
        if self.state != OracleState::Running {
            return Err(AttackError::InvariantViolation(format!(
                "continuous observation in state {:?}",
                self.state
            )));
        }
        if report.success {
            self.state = OracleState::ConvergedContinuous;
        }
        Ok(self.state)
    }

    /// Feed the report for the embedded state.
    pub fn observe_embedded(&mut self, report: &OracleReport) -> Result<OracleState> {
        if self.state != OracleState::ConvergedContinuous {
            return Err(AttackError::InvariantViolation(format!(
                "embedded observation in state {:?}",
                self.state
            )));
        }
        self.state = if report.success {
            OracleState::Success
        } else {
            OracleState::Running
        };
        Ok(self.state)
    }
}

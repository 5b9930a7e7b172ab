//! Perturbation state: the attacked attribute matrix and its clean snapshot.

use crate::optimizer::UnlockedRows;
use graphfool_core::{AttackError, Result};
use ndarray::{Array2, ArrayView1, ArrayViewMut1, Axis};
use std::sync::Arc;

/// Current attribute matrix plus the frozen pre-attack snapshot.
///
/// The reference is shared behind an `Arc` and never mutated, so cloning a
/// state (e.g. to try an embedding) copies only the current matrix. Mutation
/// is only possible through unlocked rows; every other row of `current`
/// stays equal to the reference.
#[derive(Debug, Clone)]
pub struct PerturbationState {
    reference: Arc<Array2<f32>>,
    current: Array2<f32>,
    unlocked: UnlockedRows,
}

impl PerturbationState {
    pub fn new(clean: &Array2<f32>, unlocked: UnlockedRows) -> Result<Self> {
        let num_nodes = clean.nrows();
        if let Some(&bad) = unlocked.rows().iter().find(|&&n| n >= num_nodes) {
            return Err(AttackError::invalid(format!(
                "unlocked row {bad} out of range for {num_nodes} nodes"
            )));
        }
        Ok(Self {
            reference: Arc::new(clean.clone()),
            current: clean.clone(),
            unlocked,
        })
    }

    #[inline]
    pub fn current(&self) -> &Array2<f32> {
        &self.current
    }

    #[inline]
    pub fn reference(&self) -> &Array2<f32> {
        &self.reference
    }

    #[inline]
    pub fn unlocked(&self) -> &UnlockedRows {
        &self.unlocked
    }

    #[inline]
    pub fn num_attributes(&self) -> usize {
        self.current.ncols()
    }

    /// Upper bound on `changed_attributes`: every entry of every unlocked row.
    #[inline]
    pub fn max_attributes(&self) -> usize {
        self.num_attributes() * self.unlocked.len()
    }

    /// Row `slot` of the unlocked set (slot is the position in the malicious
    /// node list, not the node index).
    pub fn unlocked_row(&self, slot: usize) -> ArrayView1<'_, f32> {
        self.current.row(self.unlocked.rows()[slot])
    }

    pub fn unlocked_row_mut(&mut self, slot: usize) -> ArrayViewMut1<'_, f32> {
        let node = self.unlocked.rows()[slot];
        self.current.row_mut(node)
    }

    pub fn reference_row(&self, slot: usize) -> ArrayView1<'_, f32> {
        self.reference.row(self.unlocked.rows()[slot])
    }

    /// Visit each unlocked row mutably alongside its reference row.
    pub fn for_each_unlocked_row<F>(&mut self, mut f: F)
    where
        F: FnMut(ArrayViewMut1<'_, f32>, ArrayView1<'_, f32>),
    {
        for &node in self.unlocked.rows() {
            f(self.current.row_mut(node), self.reference.row(node));
        }
    }

    /// Number of entries in unlocked rows that differ from the reference.
    ///
    /// Exact inequality, recomputed from scratch on every call.
    pub fn changed_attributes(&self) -> usize {
        self.unlocked
            .rows()
            .iter()
            .map(|&node| {
                self.current
                    .row(node)
                    .iter()
                    .zip(self.reference.row(node))
                    .filter(|(c, r)| c != r)
                    .count()
            })
            .sum()
    }

    /// `current − reference` restricted to unlocked rows, `[num_unlocked, num_attributes]`.
    pub fn delta(&self) -> Array2<f32> {
        let rows = self.unlocked.rows();
        &self.current.select(Axis(0), rows) - &self.reference.select(Axis(0), rows)
    }

    /// Largest `|current − reference|` over unlocked rows.
    pub fn max_abs_delta(&self) -> f32 {
        self.delta().iter().fold(0.0_f32, |acc, d| acc.max(d.abs()))
    }

    /// Copy of the current matrix.
    pub fn snapshot(&self) -> Array2<f32> {
        self.current.clone()
    }

    /// Replace the current matrix with a snapshot taken from this state.
    ///
    /// Rejects snapshots that disagree with the reference outside unlocked rows.
    pub fn restore(&mut self, snapshot: Array2<f32>) -> Result<()> {
        if snapshot.dim() != self.current.dim() {
            return Err(AttackError::ShapeMismatch {
                expected: self.current.shape().to_vec(),
                got: snapshot.shape().to_vec(),
            });
        }
        for (node, (row, reference)) in snapshot
            .axis_iter(Axis(0))
            .zip(self.reference.axis_iter(Axis(0)))
            .enumerate()
        {
            if !self.unlocked.contains(node) && row != reference {
                return Err(AttackError::InvariantViolation(format!(
                    "snapshot modifies locked row {node}"
                )));
            }
        }
        self.current = snapshot;
        Ok(())
    }

    /// Drop all perturbations.
    pub fn reset(&mut self) {
        self.current.assign(self.reference.as_ref());
    }
}

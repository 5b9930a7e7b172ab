//! Gradient unlocking and the Adam optimizer over attacker rows.
//!
//! Only the attribute rows of malicious nodes are trainable during an attack.
//! [`UnlockedRows`] is the validated set of those rows; [`AttackOptimizer`]
//! keeps Adam moment estimates for exactly those rows and nothing else, so no
//! model weight or other node's attributes can drift.

use crate::state::PerturbationState;
use graphfool_core::{AttackError, Result};
use ndarray::{Array2, Zip};
use tracing::trace;

/// Adam hyperparameters. Defaults follow PyTorch: β₁=0.9, β₂=0.999, ε=1e-8.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamParams {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl AdamParams {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
        }
    }
}

/// The attribute rows an attack may modify, in caller order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockedRows {
    rows: Vec<usize>,
}

impl UnlockedRows {
    /// Unlock the rows of `malicious_nodes`.
    ///
    /// Fails with `InvalidConfiguration` when the set is empty, has duplicates
    /// or points outside the graph.
    pub fn new(malicious_nodes: &[usize], num_nodes: usize) -> Result<Self> {
        if malicious_nodes.is_empty() {
            return Err(AttackError::invalid(
                "malicious node set is empty; nothing to unlock",
            ));
        }
        if let Some(&bad) = malicious_nodes.iter().find(|&&n| n >= num_nodes) {
            return Err(AttackError::invalid(format!(
                "malicious node {bad} out of range for {num_nodes} nodes"
            )));
        }
        let mut sorted = malicious_nodes.to_vec();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err(AttackError::invalid(format!(
                "malicious nodes contain duplicates: {malicious_nodes:?}"
            )));
        }
        Ok(Self {
            rows: malicious_nodes.to_vec(),
        })
    }

    #[inline]
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, node: usize) -> bool {
        self.rows.contains(&node)
    }
}

/// Adam over the unlocked rows of a [`PerturbationState`].
///
/// One instance per attack. Moment estimates are `[num_unlocked, num_attributes]`.
#[derive(Debug, Clone)]
pub struct AttackOptimizer {
    params: AdamParams,
    m: Array2<f32>,
    v: Array2<f32>,
    t: usize,
}

impl AttackOptimizer {
    pub fn new(params: AdamParams, num_unlocked: usize, num_attributes: usize) -> Self {
        Self {
            params,
            m: Array2::zeros((num_unlocked, num_attributes)),
            v: Array2::zeros((num_unlocked, num_attributes)),
            t: 0,
        }
    }

    /// Build the optimizer for the rows unlocked in `state`.
    pub fn for_state(params: AdamParams, state: &PerturbationState) -> Self {
        Self::new(params, state.unlocked().len(), state.num_attributes())
    }

    /// Number of updates applied so far.
    #[inline]
    pub fn steps(&self) -> usize {
        self.t
    }

    pub fn params(&self) -> &AdamParams {
        &self.params
    }

    /// Apply one Adam update. `grad` is the full `[num_nodes, num_attributes]`
    /// feature gradient; rows outside the unlocked set are ignored.
    ///
    /// - m = β₁ m + (1 − β₁) g
    /// - v = β₂ v + (1 − β₂) g²
    /// - x = x − lr · m̂ / (√v̂ + ε)
    pub fn step(&mut self, state: &mut PerturbationState, grad: &Array2<f32>) -> Result<()> {
        if grad.dim() != state.current().dim() {
            return Err(AttackError::ShapeMismatch {
                expected: state.current().shape().to_vec(),
                got: grad.shape().to_vec(),
            });
        }
        if self.m.dim() != (state.unlocked().len(), state.num_attributes()) {
            return Err(AttackError::ShapeMismatch {
                expected: vec![self.m.nrows(), self.m.ncols()],
                got: vec![state.unlocked().len(), state.num_attributes()],
            });
        }

        self.t += 1;
        let p = self.params;
        let t = self.t as i32;
        let bias_correction1 = 1.0 - p.beta1.powi(t);
        let bias_correction2 = 1.0 - p.beta2.powi(t);

        for slot in 0..state.unlocked().len() {
            let node = state.unlocked().rows()[slot];
            let g = grad.row(node);
            let mut m = self.m.row_mut(slot);
            let mut v = self.v.row_mut(slot);
            let mut x = state.unlocked_row_mut(slot);

            Zip::from(&mut x)
                .and(&mut m)
                .and(&mut v)
                .and(&g)
                .for_each(|x, m, v, &g| {
                    *m = p.beta1 * *m + (1.0 - p.beta1) * g;
                    *v = p.beta2 * *v + (1.0 - p.beta2) * g * g;
                    let m_hat = *m / bias_correction1;
                    let v_hat = *v / bias_correction2;
                    *x -= p.learning_rate * m_hat / (v_hat.sqrt() + p.epsilon);
                });
        }

        trace!("Adam step {} applied to {} rows", self.t, state.unlocked().len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_unlocked_rows_rejects_empty() {
        let err = UnlockedRows::new(&[], 4).unwrap_err();
        assert!(matches!(err, AttackError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_unlocked_rows_rejects_out_of_range_and_duplicates() {
        assert!(UnlockedRows::new(&[4], 4).is_err());
        assert!(UnlockedRows::new(&[1, 2, 1], 4).is_err());
        let rows = UnlockedRows::new(&[3, 0], 4).unwrap();
        assert_eq!(rows.rows(), &[3, 0]);
        assert!(rows.contains(0));
        assert!(!rows.contains(1));
    }

    #[test]
    fn test_adam_first_step_moves_by_lr() {
        let clean = arr2(&[[0.0, 0.0], [1.0, 1.0]]);
        let mut state =
            PerturbationState::new(&clean, UnlockedRows::new(&[1], 2).unwrap()).unwrap();
        let mut opt = AttackOptimizer::for_state(AdamParams::new(0.1), &state);

        let grad = arr2(&[[5.0, 5.0], [2.0, -0.5]]);
        opt.step(&mut state, &grad).unwrap();

        // Bias-corrected first step is lr · sign(g).
        assert!((state.current()[[1, 0]] - 0.9).abs() < 1e-5);
        assert!((state.current()[[1, 1]] - 1.1).abs() < 1e-5);
        assert_eq!(opt.steps(), 1);
    }

    #[test]
    fn test_adam_never_touches_locked_rows() {
        let clean = arr2(&[[0.5, 0.5], [0.5, 0.5], [0.5, 0.5]]);
        let mut state =
            PerturbationState::new(&clean, UnlockedRows::new(&[2], 3).unwrap()).unwrap();
        let mut opt = AttackOptimizer::for_state(AdamParams::new(0.05), &state);
        let grad = arr2(&[[1.0, 1.0], [-1.0, -1.0], [1.0, -1.0]]);
        for _ in 0..10 {
            opt.step(&mut state, &grad).unwrap();
        }
        assert_eq!(state.current().row(0), clean.row(0));
        assert_eq!(state.current().row(1), clean.row(1));
        assert_ne!(state.current().row(2), clean.row(2));
    }

    #[test]
    fn test_adam_rejects_gradient_shape() {
        let clean = arr2(&[[0.0, 0.0]]);
        let mut state =
            PerturbationState::new(&clean, UnlockedRows::new(&[0], 1).unwrap()).unwrap();
        let mut opt = AttackOptimizer::for_state(AdamParams::new(0.1), &state);
        let err = opt.step(&mut state, &arr2(&[[1.0]])).unwrap_err();
        assert!(matches!(err, AttackError::ShapeMismatch { .. }));
        assert_eq!(opt.steps(), 0);
    }
}

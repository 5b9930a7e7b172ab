//! One gradient step on the unlocked attribute rows.

use crate::model::NodeClassifier;
use crate::optimizer::AttackOptimizer;
use crate::state::PerturbationState;
use crate::target::AttackTarget;
use graphfool_core::Result;
use ndarray::{Array2, ArrayView1};
use tracing::trace;

/// Mean victim cross-entropy and its gradient with respect to the scores.
#[derive(Debug, Clone)]
pub struct VictimLoss {
    pub loss: f32,
    /// `d loss / d scores`, same shape as the scores. Zero outside victim rows.
    pub grad_scores: Array2<f32>,
}

/// Numerically stable `log(sum(exp(row)))`.
pub fn log_sum_exp(row: ArrayView1<'_, f32>) -> f32 {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return max;
    }
    max + row.iter().map(|&s| (s - max).exp()).sum::<f32>().ln()
}

/// Mean cross-entropy of `log_softmax(scores[node])` against each victim's label.
pub fn victim_cross_entropy(scores: &Array2<f32>, target: &AttackTarget) -> VictimLoss {
    let n = target.attacked_nodes().len() as f32;
    let mut grad_scores = Array2::<f32>::zeros(scores.raw_dim());
    let mut loss = 0.0_f32;

    for (node, label) in target.pairs() {
        let row = scores.row(node);
        let lse = log_sum_exp(row);
        loss += lse - row[label];

        let mut grad_row = grad_scores.row_mut(node);
        for (c, &s) in row.iter().enumerate() {
            let softmax = (s - lse).exp();
            let onehot = if c == label { 1.0 } else { 0.0 };
            grad_row[c] += (softmax - onehot) / n;
        }
    }

    VictimLoss {
        loss: loss / n,
        grad_scores,
    }
}

/// What a training step did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// One optimizer update was applied. `loss` is the pre-step victim cross-entropy.
    Applied { loss: f32 },
    /// Loss or gradient was NaN/Inf; the state was left untouched.
    NonFinite { loss: f32 },
}

/// Run one optimization step on the unlocked rows of `state`.
///
/// Targeted attacks minimize the cross-entropy to the target labels;
/// untargeted attacks maximize the cross-entropy to the true labels.
pub fn training_step<M: NodeClassifier + ?Sized>(
    model: &M,
    state: &mut PerturbationState,
    optimizer: &mut AttackOptimizer,
    target: &AttackTarget,
) -> Result<StepOutcome> {
    let scores = model.forward(state.current())?;
    let VictimLoss {
        loss,
        mut grad_scores,
    } = victim_cross_entropy(&scores, target);

    if !loss.is_finite() {
        return Ok(StepOutcome::NonFinite { loss });
    }
    if !target.is_targeted() {
        grad_scores.mapv_inplace(|g| -g);
    }

    let grad = model.backward(state.current(), &grad_scores)?;
    let finite = state
        .unlocked()
        .rows()
        .iter()
        .all(|&node| grad.row(node).iter().all(|g| g.is_finite()));
    if !finite {
        return Ok(StepOutcome::NonFinite { loss });
    }

    optimizer.step(state, &grad)?;
    trace!("step {}: victim loss {:.6}", optimizer.steps(), loss);
    Ok(StepOutcome::Applied { loss })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SgcModel;
    use crate::optimizer::{AdamParams, UnlockedRows};
    use graphfool_core::Graph;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_log_sum_exp_stable() {
        let row = arr1(&[1000.0_f32, 1000.0]);
        let lse = log_sum_exp(row.view());
        assert!((lse - (1000.0 + 2.0_f32.ln())).abs() < 1e-3);
    }

    #[test]
    fn test_cross_entropy_uniform_scores() {
        let scores = arr2(&[[0.0, 0.0], [5.0, -5.0]]);
        let target = AttackTarget::untargeted(0, 1);
        let VictimLoss { loss, grad_scores } = victim_cross_entropy(&scores, &target);
        assert!((loss - 2.0_f32.ln()).abs() < 1e-6);
        assert!((grad_scores[[0, 0]] - 0.5).abs() < 1e-6);
        assert!((grad_scores[[0, 1]] + 0.5).abs() < 1e-6);
        // Non-victim rows get no gradient.
        assert_eq!(grad_scores.row(1).sum(), 0.0);
    }

    #[test]
    fn test_cross_entropy_averages_over_victims() {
        let scores = arr2(&[[0.0, 0.0], [0.0, 0.0]]);
        let target = AttackTarget::new(vec![0, 1], vec![0, 1], true).unwrap();
        let VictimLoss { loss, grad_scores } = victim_cross_entropy(&scores, &target);
        assert!((loss - 2.0_f32.ln()).abs() < 1e-6);
        assert!((grad_scores[[0, 0]] + 0.25).abs() < 1e-6);
        assert!((grad_scores[[1, 1]] + 0.25).abs() < 1e-6);
    }

    fn single_node_setup() -> (SgcModel, PerturbationState) {
        // score0 = 0, score1 = x
        let model = SgcModel::new(&Graph::empty(1), 1, arr2(&[[0.0, 1.0]]), arr1(&[0.0, 0.0]))
            .unwrap();
        let clean = arr2(&[[0.0]]);
        let state = PerturbationState::new(&clean, UnlockedRows::new(&[0], 1).unwrap()).unwrap();
        (model, state)
    }

    #[test]
    fn test_targeted_step_moves_toward_target() {
        let (model, mut state) = single_node_setup();
        let mut opt = AttackOptimizer::for_state(AdamParams::new(0.1), &state);
        let outcome =
            training_step(&model, &mut state, &mut opt, &AttackTarget::targeted(0, 1)).unwrap();
        assert!(matches!(outcome, StepOutcome::Applied { .. }));
        assert!(state.current()[[0, 0]] > 0.0);
    }

    #[test]
    fn test_untargeted_step_moves_away_from_true_label() {
        let (model, mut state) = single_node_setup();
        let mut opt = AttackOptimizer::for_state(AdamParams::new(0.1), &state);
        // True label 1: pushing away from class 1 lowers x.
        training_step(&model, &mut state, &mut opt, &AttackTarget::untargeted(0, 1)).unwrap();
        assert!(state.current()[[0, 0]] < 0.0);
    }

    #[test]
    fn test_non_finite_loss_leaves_state_untouched() {
        let model =
            SgcModel::new(&Graph::empty(1), 1, arr2(&[[1.0, 1.0]]), arr1(&[0.0, 0.0])).unwrap();
        let clean = arr2(&[[f32::NAN]]);
        let mut state =
            PerturbationState::new(&clean, UnlockedRows::new(&[0], 1).unwrap()).unwrap();
        let mut opt = AttackOptimizer::for_state(AdamParams::new(0.1), &state);
        let outcome =
            training_step(&model, &mut state, &mut opt, &AttackTarget::untargeted(0, 0)).unwrap();
        assert!(matches!(outcome, StepOutcome::NonFinite { .. }));
        assert_eq!(opt.steps(), 0);
    }
}

//! The attack trainer: the per-victim optimization loop.
//!
//! ## Loop
//!
//! 1. **Setup**: validate the victims, unlock the attacker rows, build Adam
//! 2. **Pre-check**: a victim that already satisfies the goal costs nothing
//! 3. **Step**: one Adam update on the unlocked rows
//! 4. **Oracle**: evaluate the continuous state
//! 5. **Embed**: on a continuous flip, project a copy onto the budget and
//!    re-evaluate; only an embedded flip counts
//! 6. **Stall**: stop when the changed count repeats between iterations. The
//!    count is the embedded one whenever step 5 ran, the continuous one otherwise
//!
//! The loop is capped at `attack_epochs` iterations. Running out of epochs or
//! stalling yields [`AttackOutcome::failure`] with the full attribute budget.

use crate::embed::{AttackEmbedder, Embedder};
use crate::model::NodeClassifier;
use crate::monitor::{ConvergenceMonitor, MonitorVerdict};
use crate::optimizer::{AdamParams, AttackOptimizer, UnlockedRows};
use crate::oracle::{OracleReport, OracleState, StoppingOracle};
use crate::state::PerturbationState;
use crate::step::{training_step, StepOutcome};
use crate::target::AttackTarget;
use graphfool_core::{AttackConfig, AttackError, AttackOutcome, DatasetType, Result, Verbosity};
use ndarray::Array2;
use tracing::{debug, info, warn};

/// Loop parameters shared by every victim of an attack setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerSettings {
    pub attack_epochs: usize,
    pub lr: f32,
    pub verbosity: Verbosity,
}

impl TrainerSettings {
    pub fn from_config(config: &AttackConfig) -> Self {
        Self {
            attack_epochs: config.attack_epochs,
            lr: config.lr,
            verbosity: config.verbosity,
        }
    }
}

/// Why an attack stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The embedded perturbation flips every victim.
    Success,
    /// The victims were already flipped on clean features.
    AlreadySatisfied,
    /// The changed count repeated between two iterations.
    Stalled,
    /// `attack_epochs` iterations ran without an embedded flip.
    BudgetExhausted,
    /// Loss, margin or gradient went NaN/Inf.
    NonFinite,
}

/// Outcome of one attack together with how it ended.
#[derive(Debug, Clone)]
pub struct AttackReport {
    pub outcome: AttackOutcome,
    /// Optimization iterations run (0 when the pre-check succeeded).
    pub epochs_run: usize,
    pub termination: Termination,
    /// Embedded attribute matrix on success.
    pub perturbation: Option<Array2<f32>>,
}

impl AttackReport {
    fn failure(max_attributes: usize, epochs_run: usize, termination: Termination) -> Self {
        Self {
            outcome: AttackOutcome::failure(max_attributes),
            epochs_run,
            termination,
            perturbation: None,
        }
    }
}

/// Attacks victims of one model under one embedder.
///
/// The model is borrowed immutably; each call to [`attack`](Self::attack)
/// owns its own state, optimizer, oracle and monitor.
#[derive(Debug)]
pub struct AttackTrainer<'a, M: NodeClassifier + ?Sized> {
    model: &'a M,
    embedder: AttackEmbedder,
    settings: TrainerSettings,
}

impl<'a, M: NodeClassifier + ?Sized> AttackTrainer<'a, M> {
    pub fn new(model: &'a M, embedder: AttackEmbedder, settings: TrainerSettings) -> Result<Self> {
        if settings.attack_epochs == 0 {
            return Err(AttackError::invalid("attack_epochs must be at least 1"));
        }
        if !(settings.lr.is_finite() && settings.lr > 0.0) {
            return Err(AttackError::invalid(format!(
                "learning rate must be positive and finite, got {}",
                settings.lr
            )));
        }
        Ok(Self {
            model,
            embedder,
            settings,
        })
    }

    /// Trainer for `dataset_type`, with the embedder chosen by the config.
    pub fn from_config(model: &'a M, config: &AttackConfig, dataset_type: DatasetType) -> Result<Self> {
        let embedder = AttackEmbedder::for_config(config, dataset_type, model.num_attributes())?;
        Self::new(model, embedder, TrainerSettings::from_config(config))
    }

    #[inline]
    pub fn embedder(&self) -> &AttackEmbedder {
        &self.embedder
    }

    #[inline]
    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }

    /// Attack `target` by perturbing the rows of `malicious_nodes`.
    pub fn attack(
        &self,
        features: &Array2<f32>,
        malicious_nodes: &[usize],
        target: &AttackTarget,
    ) -> Result<AttackOutcome> {
        Ok(self.attack_detailed(features, malicious_nodes, target)?.outcome)
    }

    pub fn attack_detailed(
        &self,
        features: &Array2<f32>,
        malicious_nodes: &[usize],
        target: &AttackTarget,
    ) -> Result<AttackReport> {
        let model = self.model;
        let expected = [model.num_nodes(), model.num_attributes()];
        if features.shape() != expected {
            return Err(AttackError::ShapeMismatch {
                expected: expected.to_vec(),
                got: features.shape().to_vec(),
            });
        }
        target.validate_for(model.num_nodes(), model.num_classes())?;
        let unlocked = UnlockedRows::new(malicious_nodes, model.num_nodes())?;

        let mut state = PerturbationState::new(features, unlocked)?;
        let max_attributes = state.max_attributes();
        let mut optimizer =
            AttackOptimizer::for_state(AdamParams::new(self.settings.lr), &state);
        let mut oracle = StoppingOracle::new();
        let mut monitor = ConvergenceMonitor::new(max_attributes);
        let node = target.attacked_nodes()[0];

        debug!(
            "Attacking node {} with {} attacker(s), {} embedder, {} epochs",
            node,
            malicious_nodes.len(),
            self.embedder.describe(),
            self.settings.attack_epochs
        );

        let clean = oracle.evaluate(model, state.current(), target)?;
        if !clean.is_finite() {
            warn!("Node {}: non-finite loss on clean features", node);
            return Ok(self.finish(node, AttackReport::failure(max_attributes, 0, Termination::NonFinite)));
        }
        if clean.success {
            debug!("Node {} already satisfies the attack goal", node);
            return Ok(self.finish(
                node,
                AttackReport {
                    outcome: AttackOutcome::success(0),
                    epochs_run: 0,
                    termination: Termination::AlreadySatisfied,
                    perturbation: Some(state.snapshot()),
                },
            ));
        }

        let mut termination = Termination::BudgetExhausted;
        let mut epochs_run = 0;
        for epoch in 0..self.settings.attack_epochs {
            epochs_run = epoch + 1;

            if let StepOutcome::NonFinite { loss } =
                training_step(model, &mut state, &mut optimizer, target)?
            {
                warn!("Node {}, epoch {}: non-finite step (loss {})", node, epoch, loss);
                termination = Termination::NonFinite;
                break;
            }

            let changed = state.changed_attributes();
            monitor.check_budget(changed)?;

            let report = oracle.evaluate(model, state.current(), target)?;
            if !report.is_finite() {
                warn!("Node {}, epoch {}: non-finite loss after step", node, epoch);
                termination = Termination::NonFinite;
                break;
            }

            // After an embed the stall rule watches the embedded count.
            let mut progress = changed;
            if oracle.observe_continuous(&report)? == OracleState::ConvergedContinuous {
                let mut embedded = state.clone();
                self.embedder.embed(&mut embedded);
                self.embedder.check(&embedded)?;
                let embedded_changed = embedded.changed_attributes();
                monitor.check_budget(embedded_changed)?;
                progress = embedded_changed;

                let embedded_report = oracle.evaluate(model, embedded.current(), target)?;
                debug!(
                    "Node {}, epoch {}: continuous flip with {} changes, embedded margin {:.4} with {} changes",
                    node, epoch, changed, embedded_report.margin, embedded_changed
                );
                if oracle.observe_embedded(&embedded_report)? == OracleState::Success {
                    self.log_epoch(node, epoch, &report, true);
                    return Ok(self.finish(
                        node,
                        AttackReport {
                            outcome: AttackOutcome::success(embedded_changed),
                            epochs_run,
                            termination: Termination::Success,
                            perturbation: Some(embedded.snapshot()),
                        },
                    ));
                }
            }

            self.log_epoch(node, epoch, &report, false);

            if monitor.observe(progress) == MonitorVerdict::Stalled {
                debug!("Node {}: changed count stalled at {} after epoch {}", node, progress, epoch);
                termination = Termination::Stalled;
                break;
            }
        }

        Ok(self.finish(node, AttackReport::failure(max_attributes, epochs_run, termination)))
    }

    /// `report` is the continuous evaluation; `embedded` is whether the
    /// embedded copy flipped the victims.
    fn log_epoch(&self, node: usize, epoch: usize, report: &OracleReport, embedded: bool) {
        if self.settings.verbosity == Verbosity::Full {
            info!(
                "Node: {:03}, Epoch: {:02}, Loss: {:.4}, Margin: {:.4}, Continuous: {}, Embedded: {}",
                node, epoch, report.loss, report.margin, report.success, embedded
            );
        } else {
            debug!(
                "Node: {:03}, Epoch: {:02}, Loss: {:.4}, Margin: {:.4}, Continuous: {}, Embedded: {}",
                node, epoch, report.loss, report.margin, report.success, embedded
            );
        }
    }

    fn finish(&self, node: usize, report: AttackReport) -> AttackReport {
        if self.settings.verbosity != Verbosity::None {
            info!(
                "Node: {:03}, Success: {}, Attributes: {}, Epochs: {}, Termination: {:?}",
                node,
                report.outcome.success,
                report.outcome.attributes_used,
                report.epochs_run,
                report.termination
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::LinfEmbedder;
    use crate::model::SgcModel;
    use graphfool_core::Graph;
    use ndarray::{arr1, arr2};

    fn settings(epochs: usize, lr: f32) -> TrainerSettings {
        TrainerSettings {
            attack_epochs: epochs,
            lr,
            verbosity: Verbosity::None,
        }
    }

    fn model() -> SgcModel {
        let graph = Graph::from_edges(2, &[(0, 1)]).unwrap();
        SgcModel::new(&graph, 1, arr2(&[[0.0, 2.0]]), arr1(&[0.0, -0.15])).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_settings() {
        let model = model();
        let embedder = AttackEmbedder::Linf(LinfEmbedder { l_inf: 0.1 });
        assert!(AttackTrainer::new(&model, embedder, settings(0, 0.1)).is_err());
        assert!(AttackTrainer::new(&model, embedder, settings(5, 0.0)).is_err());
        assert!(AttackTrainer::new(&model, embedder, settings(5, f32::NAN)).is_err());
    }

    #[test]
    fn test_rejects_feature_shape_mismatch() {
        let model = model();
        let embedder = AttackEmbedder::Linf(LinfEmbedder { l_inf: 0.1 });
        let trainer = AttackTrainer::new(&model, embedder, settings(5, 0.1)).unwrap();
        let err = trainer
            .attack(&arr2(&[[0.0, 0.0], [0.0, 0.0]]), &[1], &AttackTarget::untargeted(0, 0))
            .unwrap_err();
        assert!(matches!(err, AttackError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rejects_out_of_range_victim() {
        let model = model();
        let embedder = AttackEmbedder::Linf(LinfEmbedder { l_inf: 0.1 });
        let trainer = AttackTrainer::new(&model, embedder, settings(5, 0.1)).unwrap();
        let err = trainer
            .attack(&arr2(&[[0.0], [0.0]]), &[1], &AttackTarget::untargeted(7, 0))
            .unwrap_err();
        assert!(err.is_configuration());
    }
}

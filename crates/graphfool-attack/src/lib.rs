//! Feature-perturbation attacks on GNN node classifiers.
//!
//! An attack perturbs the attribute rows of a few malicious nodes until a
//! victim node's prediction flips, under an L∞ budget for continuous
//! attributes or an L0 budget for binary ones. The search is gradient based:
//! Adam on the attacker rows, with each candidate flip projected back onto
//! the budget before it counts.
//!
//! # Example
//!
//! ```no_run
//! use graphfool_attack::{AttackTarget, AttackTrainer, SgcModel};
//! use graphfool_core::{AttackConfig, DatasetType, Graph};
//! use ndarray::{arr1, arr2};
//!
//! let graph = Graph::from_edges(2, &[(0, 1)])?;
//! let model = SgcModel::new(&graph, 1, arr2(&[[0.0, 2.0]]), arr1(&[0.0, -0.09]))?;
//! let config = AttackConfig::for_dataset(DatasetType::Continuous);
//! let trainer = AttackTrainer::from_config(&model, &config, DatasetType::Continuous)?;
//!
//! let outcome = trainer.attack(&arr2(&[[0.0], [0.0]]), &[1], &AttackTarget::untargeted(0, 0))?;
//! println!("success: {}, attributes: {}", outcome.success, outcome.attributes_used);
//! # Ok::<(), graphfool_core::AttackError>(())
//! ```

pub mod embed;
pub mod model;
pub mod monitor;
pub mod optimizer;
pub mod oracle;
pub mod selection;
pub mod state;
pub mod step;
pub mod sweep;
pub mod target;
pub mod trainer;

pub use embed::{budget_representable, clamp_to_budget, AttackEmbedder, Embedder, L0Embedder, LinfEmbedder};
pub use model::{predict, NodeClassifier, SgcModel};
pub use monitor::{ConvergenceMonitor, MonitorVerdict};
pub use optimizer::{AdamParams, AttackOptimizer, UnlockedRows};
pub use oracle::{OracleReport, OracleState, StoppingOracle};
pub use selection::{attackers_for, random_target_label, select_attackers};
pub use state::PerturbationState;
pub use step::{training_step, victim_cross_entropy, StepOutcome};
pub use sweep::{
    clean_accuracy, l0_sweep, run_attackers_sweep, run_attribute_ratio_sweep,
    run_distance_sweep, run_linf_sweep, AttackSweep, AttackerCountSweep, OutcomeTable,
    RatioPoint, SkippedVictim, SweepResult, VictimRecord, ATTACKER_COUNTS, LINF_SWEEP,
};
pub use target::{label_flipped, AttackTarget};
pub use trainer::{AttackReport, AttackTrainer, Termination, TrainerSettings};

pub use graphfool_core::{AttackError, AttackOutcome, Result};

#[cfg(test)]
mod tests;

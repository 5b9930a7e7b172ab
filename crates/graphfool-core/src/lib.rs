//! Core types and errors for graphfool adversarial attacks on GNN node classifiers.
//!
//! This crate provides the vocabulary shared by the attack trainers: the error
//! type, dataset and graph containers, attack configuration, and the per-node
//! outcome record that sweeps aggregate into defence tables.

pub mod config;
pub mod dataset;
pub mod graph;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{AttackConfig, AttackerMode};
pub use dataset::{GraphDataset, NodeSplit};
pub use graph::Graph;

/// Error types for graphfool operations.
#[derive(Error, Debug)]
pub enum AttackError {
    /// Setup-time misconfiguration. Fatal for the configuration, never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Failure reported by a model capability implementation.
    #[error("Model error: {0}")]
    Model(String),

    /// A budget or bookkeeping invariant was broken. Indicates a bug.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Failed to parse attack config: {0}")]
    Config(#[from] serde_json::Error),
}

impl AttackError {
    /// Shorthand for [`AttackError::InvalidConfiguration`].
    pub fn invalid(msg: impl Into<String>) -> Self {
        AttackError::InvalidConfiguration(msg.into())
    }

    /// Whether this error was raised while validating a configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AttackError::InvalidConfiguration(_) | AttackError::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AttackError>;

/// Attribute domain of a dataset. Selects which attack-trainer variant applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetType {
    /// Real-valued attributes, attacked under an L∞ budget.
    Continuous,
    /// Binary attributes, attacked under an L0 budget.
    Discrete,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Continuous => "continuous",
            DatasetType::Discrete => "discrete",
        }
    }
}

impl std::fmt::Display for DatasetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much per-iteration progress an attack reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// One info line per attack epoch plus the final summary.
    #[default]
    Full,
    /// Only the per-node summary line.
    Partial,
    /// Nothing above debug level.
    None,
}

/// Result of attacking one victim node.
///
/// `attributes_used` equals the attack's `max_attributes` when the attack
/// failed. A successful outcome with zero attributes means the victim already
/// satisfied the success condition before any perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackOutcome {
    pub success: bool,
    pub attributes_used: usize,
}

impl AttackOutcome {
    #[inline]
    pub fn success(attributes_used: usize) -> Self {
        Self {
            success: true,
            attributes_used,
        }
    }

    #[inline]
    pub fn failure(max_attributes: usize) -> Self {
        Self {
            success: false,
            attributes_used: max_attributes,
        }
    }

    /// Whether the victim was misclassified before the attack started.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.success && self.attributes_used == 0
    }
}

//! Attack configuration.
//!
//! An [`AttackConfig`] carries every knob of a single attack setting: the
//! optimization budget, the perturbation budget for the dataset's attribute
//! domain, attacker placement and reporting. Configurations are validated
//! against a [`DatasetType`] before any optimization step runs.

use crate::{AttackError, DatasetType, Result, Verbosity};
use serde::{Deserialize, Serialize};

/// Default epochs for continuous datasets.
pub const CONTINUOUS_ATTACK_EPOCHS: usize = 20;
/// Default epochs for discrete datasets.
pub const DISCRETE_ATTACK_EPOCHS: usize = 100;
/// Default L∞ budget for continuous datasets.
pub const DEFAULT_L_INF: f32 = 0.1;
/// Default Adam step size for continuous datasets.
pub const CONTINUOUS_LR: f32 = 0.01;
/// Default Adam step size for discrete datasets. The first step has to move
/// an attribute past 0.5 for the binary snap to keep it.
pub const DISCRETE_LR: f32 = 1.0;

/// Where the attacker rows come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AttackerMode {
    /// The victim perturbs its own attribute row.
    Victim,
    /// Attackers are sampled from the victim's neighbourhood.
    #[default]
    Neighbours,
}

/// Configuration for one attack setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Targeted attacks aim for a specific label, untargeted ones leave the true label.
    pub targeted: bool,
    /// Hard cap on optimization iterations per victim.
    pub attack_epochs: usize,
    /// Adam step size.
    pub lr: f32,
    /// Per-entry perturbation cap. Continuous datasets only.
    pub l_inf: Option<f32>,
    /// Ratio of attributes per attacker row that may flip. Discrete datasets only.
    pub l_0: Option<f32>,
    /// Seed for attacker sampling and target selection.
    pub seed: u64,
    pub verbosity: Verbosity,
    /// Number of attacker nodes per victim.
    pub num_attackers: usize,
    pub attacker_mode: AttackerMode,
    /// Maximum hop distance between victim and attackers. `None` uses the model depth.
    pub distance: Option<usize>,
    /// Attack victims in parallel with Rayon.
    pub parallel: bool,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            targeted: false,
            attack_epochs: CONTINUOUS_ATTACK_EPOCHS,
            lr: CONTINUOUS_LR,
            l_inf: Some(DEFAULT_L_INF),
            l_0: None,
            seed: 0,
            verbosity: Verbosity::Partial,
            num_attackers: 1,
            attacker_mode: AttackerMode::Neighbours,
            distance: None,
            parallel: false,
        }
    }
}

impl AttackConfig {
    /// Defaults for the given attribute domain.
    pub fn for_dataset(dataset_type: DatasetType) -> Self {
        match dataset_type {
            DatasetType::Continuous => Self::default(),
            DatasetType::Discrete => Self {
                attack_epochs: DISCRETE_ATTACK_EPOCHS,
                lr: DISCRETE_LR,
                l_inf: None,
                l_0: None,
                ..Self::default()
            },
        }
    }

    /// Short runs for smoke tests and interactive use.
    pub fn fast(dataset_type: DatasetType) -> Self {
        let base = Self::for_dataset(dataset_type);
        Self {
            attack_epochs: 5,
            lr: base.lr * 5.0,
            verbosity: Verbosity::None,
            ..base
        }
    }

    /// Many small steps; parallel across victims.
    pub fn thorough(dataset_type: DatasetType) -> Self {
        let base = Self::for_dataset(dataset_type);
        Self {
            attack_epochs: base.attack_epochs * 5,
            lr: base.lr * 0.5,
            parallel: true,
            ..base
        }
    }

    /// Parse a JSON config. Missing fields take their [`Default`] values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Effective L0 ratio. No ratio means every attribute may flip.
    pub fn l0_ratio(&self) -> f32 {
        self.l_0.unwrap_or(1.0)
    }

    /// Check that this configuration can run against a dataset of the given type.
    pub fn validate(&self, dataset_type: DatasetType) -> Result<()> {
        if self.attack_epochs == 0 {
            return Err(AttackError::invalid("attack_epochs must be at least 1"));
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(AttackError::invalid(format!(
                "learning rate must be positive and finite, got {}",
                self.lr
            )));
        }
        if self.num_attackers == 0 {
            return Err(AttackError::invalid("num_attackers must be at least 1"));
        }

        match dataset_type {
            DatasetType::Continuous => {
                if self.l_0.is_some() {
                    return Err(AttackError::invalid(
                        "L0 attack isn't suitable for continuous datasets",
                    ));
                }
                match self.l_inf {
                    Some(l_inf) if l_inf.is_finite() && l_inf > 0.0 => {}
                    Some(l_inf) => {
                        return Err(AttackError::invalid(format!(
                            "l_inf must be positive and finite, got {l_inf}"
                        )))
                    }
                    None => {
                        return Err(AttackError::invalid(
                            "continuous datasets require an l_inf budget",
                        ))
                    }
                }
            }
            DatasetType::Discrete => {
                if self.l_inf.is_some() {
                    return Err(AttackError::invalid(
                        "L_inf attack isn't suitable for discrete datasets",
                    ));
                }
                if let Some(l_0) = self.l_0 {
                    if !(l_0 > 0.0 && l_0 <= 1.0) {
                        return Err(AttackError::invalid(format!(
                            "l_0 must be in (0, 1], got {l_0}"
                        )));
                    }
                }
            }
        }

        match self.attacker_mode {
            AttackerMode::Victim => {
                if self.distance.is_some() {
                    return Err(AttackError::invalid(
                        "a direct attack doesn't take the distance flag",
                    ));
                }
                if self.num_attackers != 1 {
                    return Err(AttackError::invalid(format!(
                        "a direct attack has exactly one attacker, got {}",
                        self.num_attackers
                    )));
                }
            }
            AttackerMode::Neighbours => {
                if self.distance == Some(0) {
                    return Err(AttackError::invalid("distance must be at least 1"));
                }
            }
        }

        Ok(())
    }
}

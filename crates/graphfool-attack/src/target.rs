//! Victim nodes and the labels an attack steers them toward or away from.

use graphfool_core::{AttackError, Result};

/// Whether `predicted` counts as a successful attack against `label`.
///
/// Targeted: the prediction reached the target label. Untargeted: the
/// prediction left the true label.
#[inline]
pub fn label_flipped(predicted: usize, label: usize, targeted: bool) -> bool {
    if targeted {
        predicted == label
    } else {
        predicted != label
    }
}

/// Victim set of one attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttackTarget {
    attacked_nodes: Vec<usize>,
    /// Target labels when `targeted`, true labels otherwise.
    y_targets: Vec<usize>,
    targeted: bool,
}

impl AttackTarget {
    pub fn new(attacked_nodes: Vec<usize>, y_targets: Vec<usize>, targeted: bool) -> Result<Self> {
        if attacked_nodes.is_empty() {
            return Err(AttackError::invalid("attack has no victim nodes"));
        }
        if attacked_nodes.len() != y_targets.len() {
            return Err(AttackError::invalid(format!(
                "{} victim nodes but {} target labels",
                attacked_nodes.len(),
                y_targets.len()
            )));
        }
        Ok(Self {
            attacked_nodes,
            y_targets,
            targeted,
        })
    }

    /// Push `node` to `target_label`.
    pub fn targeted(node: usize, target_label: usize) -> Self {
        Self {
            attacked_nodes: vec![node],
            y_targets: vec![target_label],
            targeted: true,
        }
    }

    /// Push `node` away from `true_label`.
    pub fn untargeted(node: usize, true_label: usize) -> Self {
        Self {
            attacked_nodes: vec![node],
            y_targets: vec![true_label],
            targeted: false,
        }
    }

    #[inline]
    pub fn attacked_nodes(&self) -> &[usize] {
        &self.attacked_nodes
    }

    #[inline]
    pub fn y_targets(&self) -> &[usize] {
        &self.y_targets
    }

    #[inline]
    pub fn is_targeted(&self) -> bool {
        self.targeted
    }

    /// `(node, label)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.attacked_nodes
            .iter()
            .copied()
            .zip(self.y_targets.iter().copied())
    }

    /// Check node and label indices against a model's dimensions.
    pub fn validate_for(&self, num_nodes: usize, num_classes: usize) -> Result<()> {
        for (node, label) in self.pairs() {
            if node >= num_nodes {
                return Err(AttackError::invalid(format!(
                    "victim node {node} out of range for {num_nodes} nodes"
                )));
            }
            if label >= num_classes {
                return Err(AttackError::invalid(format!(
                    "label {label} out of range for {num_classes} classes"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targeted_success_definition() {
        // Model says A (0), target is B (1).
        assert!(!label_flipped(0, 1, true));
        assert!(label_flipped(1, 1, true));
        // Reaching some other label is not enough for a targeted attack.
        assert!(!label_flipped(2, 1, true));
    }

    #[test]
    fn test_untargeted_success_definition() {
        // True label A (0): anything else is a success.
        assert!(!label_flipped(0, 0, false));
        assert!(label_flipped(1, 0, false));
        assert!(label_flipped(2, 0, false));
    }

    #[test]
    fn test_new_rejects_mismatched_lengths() {
        assert!(AttackTarget::new(vec![0, 1], vec![1], true).is_err());
        assert!(AttackTarget::new(vec![], vec![], false).is_err());
        let target = AttackTarget::new(vec![3, 4], vec![0, 1], false).unwrap();
        assert_eq!(target.pairs().collect::<Vec<_>>(), vec![(3, 0), (4, 1)]);
    }

    #[test]
    fn test_validate_for_bounds() {
        let target = AttackTarget::targeted(5, 2);
        assert!(target.validate_for(6, 3).is_ok());
        assert!(target.validate_for(5, 3).is_err());
        assert!(target.validate_for(6, 2).is_err());
    }
}

//! Projection of a continuous perturbation onto a feasible one.
//!
//! The optimizer works in an unconstrained relaxation. Before a flip is
//! accepted, the perturbation is embedded back into the attack budget:
//!
//! - [`LinfEmbedder`] clamps every changed entry into `[r − l_inf, r + l_inf]`
//!   around its reference value `r` (continuous datasets).
//! - [`L0Embedder`] snaps attacker rows back to binary values, flipping at
//!   most a fixed number of attributes per row (discrete datasets).
//!
//! Embedding always happens on a copy; the search continues from the
//! unprojected state if the embedded one no longer flips the victim.

use crate::state::PerturbationState;
use graphfool_core::{AttackConfig, AttackError, DatasetType, Result};
use ndarray::{ArrayView1, ArrayViewMut1};
use tracing::debug;

/// A projection onto the attack budget, applied per attacker row.
pub trait Embedder {
    /// Project the unlocked rows of `state` in place.
    fn embed(&self, state: &mut PerturbationState);

    /// Verify that `state` satisfies the budget.
    fn check(&self, state: &PerturbationState) -> Result<()>;

    fn describe(&self) -> String;
}

/// Move `x` one ulp toward `target`.
fn ulp_toward(x: f32, target: f32) -> f32 {
    if x == target || x.is_nan() || target.is_nan() {
        return x;
    }
    if x == 0.0 {
        let tiny = f32::from_bits(1);
        return if target > 0.0 { tiny } else { -tiny };
    }
    let bits = x.to_bits();
    let away_from_zero = (target > x) == (x > 0.0);
    f32::from_bits(if away_from_zero { bits + 1 } else { bits - 1 })
}

/// Clamp `current` into the L∞ ball of radius `l_inf` around `reference`.
///
/// The result satisfies `|result − reference| ≤ l_inf` exactly as evaluated in
/// f32, and stays on the same side of `reference` as `current`.
///
/// When the spacing between `reference` and its nearest f32 neighbour exceeds
/// `l_inf` (e.g. `reference = 1e8`, `l_inf = 0.1`), the only value inside the
/// ball is `reference` itself, and an out-of-budget entry is reverted to it.
/// [`budget_representable`] reports whether that can happen.
pub fn clamp_to_budget(current: f32, reference: f32, l_inf: f32) -> f32 {
    let delta = current - reference;
    if delta.abs() <= l_inf {
        return current;
    }
    let mut bounded = reference + delta.clamp(-l_inf, l_inf);
    // reference ± l_inf may round outward.
    while (bounded - reference).abs() > l_inf {
        bounded = ulp_toward(bounded, reference);
    }
    bounded
}

/// Whether a nonzero change of at most `l_inf` is representable around `reference`.
pub fn budget_representable(reference: f32, l_inf: f32) -> bool {
    let up = ulp_toward(reference, f32::INFINITY);
    let down = ulp_toward(reference, f32::NEG_INFINITY);
    (up - reference).abs() <= l_inf || (reference - down).abs() <= l_inf
}

pub fn embed_row_continuous(mut row: ArrayViewMut1<'_, f32>, reference: ArrayView1<'_, f32>, l_inf: f32) {
    for (c, &r) in row.iter_mut().zip(reference) {
        if *c != r {
            *c = clamp_to_budget(*c, r, l_inf);
        }
    }
}

/// Snap `row` to binary values around a binary `reference`.
///
/// Entry `j` flips when its continuous value crossed 0.5 away from the
/// reference. At most `max_flips` entries flip, largest moves first; ties
/// go to the lower attribute index.
pub fn embed_row_discrete(mut row: ArrayViewMut1<'_, f32>, reference: ArrayView1<'_, f32>, max_flips: usize) {
    let mut candidates: Vec<(usize, f32)> = row
        .iter()
        .zip(reference)
        .enumerate()
        .filter_map(|(j, (&c, &r))| {
            if r == 0.0 && c > 0.5 {
                Some((j, c))
            } else if r == 1.0 && c < 0.5 {
                Some((j, 1.0 - c))
            } else {
                None
            }
        })
        .collect();
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    candidates.truncate(max_flips);

    row.assign(&reference);
    for (j, _) in candidates {
        row[j] = 1.0 - reference[j];
    }
}

/// L∞ embedder for continuous attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinfEmbedder {
    pub l_inf: f32,
}

impl LinfEmbedder {
    pub fn new(l_inf: f32) -> Result<Self> {
        if !(l_inf.is_finite() && l_inf > 0.0) {
            return Err(AttackError::invalid(format!(
                "l_inf must be positive and finite, got {l_inf}"
            )));
        }
        Ok(Self { l_inf })
    }
}

impl Embedder for LinfEmbedder {
    fn embed(&self, state: &mut PerturbationState) {
        let l_inf = self.l_inf;
        state.for_each_unlocked_row(|row, reference| embed_row_continuous(row, reference, l_inf));
    }

    fn check(&self, state: &PerturbationState) -> Result<()> {
        for (slot, &node) in state.unlocked().rows().iter().enumerate() {
            let row = state.unlocked_row(slot);
            let reference = state.reference_row(slot);
            for (j, (&c, &r)) in row.iter().zip(reference).enumerate() {
                if !((c - r).abs() <= self.l_inf) {
                    return Err(AttackError::InvariantViolation(format!(
                        "attribute ({node}, {j}) moved by {} > l_inf {}",
                        (c - r).abs(),
                        self.l_inf
                    )));
                }
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("L_inf({})", self.l_inf)
    }
}

/// Number of flips allowed per row for an L0 ratio.
pub fn flips_for_ratio(l_0: f32, num_attributes: usize) -> usize {
    let exact = l_0 * num_attributes as f32;
    let rounded = exact.round();
    let flips = if (exact - rounded).abs() < 1e-4 {
        rounded
    } else {
        exact.ceil()
    };
    (flips.max(0.0) as usize).min(num_attributes)
}

/// L0 embedder for binary attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct L0Embedder {
    pub max_flips_per_row: usize,
}

impl L0Embedder {
    pub fn new(max_flips_per_row: usize) -> Self {
        Self { max_flips_per_row }
    }

    pub fn from_ratio(l_0: f32, num_attributes: usize) -> Result<Self> {
        if !(l_0 > 0.0 && l_0 <= 1.0) {
            return Err(AttackError::invalid(format!(
                "l_0 must be in (0, 1], got {l_0}"
            )));
        }
        Ok(Self::new(flips_for_ratio(l_0, num_attributes)))
    }
}

impl Embedder for L0Embedder {
    fn embed(&self, state: &mut PerturbationState) {
        let max_flips = self.max_flips_per_row;
        state.for_each_unlocked_row(|row, reference| embed_row_discrete(row, reference, max_flips));
    }

    fn check(&self, state: &PerturbationState) -> Result<()> {
        for (slot, &node) in state.unlocked().rows().iter().enumerate() {
            let row = state.unlocked_row(slot);
            if let Some(bad) = row.iter().find(|&&x| x != 0.0 && x != 1.0) {
                return Err(AttackError::InvariantViolation(format!(
                    "row {node} is not binary after embedding (found {bad})"
                )));
            }
            let flips = row
                .iter()
                .zip(state.reference_row(slot))
                .filter(|(c, r)| c != r)
                .count();
            if flips > self.max_flips_per_row {
                return Err(AttackError::InvariantViolation(format!(
                    "row {node} flips {flips} attributes, budget is {}",
                    self.max_flips_per_row
                )));
            }
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("L0({} per row)", self.max_flips_per_row)
    }
}

/// The embedder matching a dataset's attribute domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttackEmbedder {
    Linf(LinfEmbedder),
    L0(L0Embedder),
}

impl AttackEmbedder {
    /// Pick the embedder for `dataset_type`, validating the config first.
    pub fn for_config(
        config: &AttackConfig,
        dataset_type: DatasetType,
        num_attributes: usize,
    ) -> Result<Self> {
        config.validate(dataset_type)?;
        let embedder = match dataset_type {
            DatasetType::Continuous => {
                let l_inf = config
                    .l_inf
                    .ok_or_else(|| AttackError::invalid("continuous attack without l_inf"))?;
                AttackEmbedder::Linf(LinfEmbedder::new(l_inf)?)
            }
            DatasetType::Discrete => {
                AttackEmbedder::L0(L0Embedder::from_ratio(config.l0_ratio(), num_attributes)?)
            }
        };
        debug!("Using {} embedder for {} dataset", embedder.describe(), dataset_type);
        Ok(embedder)
    }
}

impl Embedder for AttackEmbedder {
    fn embed(&self, state: &mut PerturbationState) {
        match self {
            AttackEmbedder::Linf(e) => e.embed(state),
            AttackEmbedder::L0(e) => e.embed(state),
        }
    }

    fn check(&self, state: &PerturbationState) -> Result<()> {
        match self {
            AttackEmbedder::Linf(e) => e.check(state),
            AttackEmbedder::L0(e) => e.check(state),
        }
    }

    fn describe(&self) -> String {
        match self {
            AttackEmbedder::Linf(e) => e.describe(),
            AttackEmbedder::L0(e) => e.describe(),
        }
    }
}

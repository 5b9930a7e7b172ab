//! Choosing attacker nodes and target labels for a victim.

use graphfool_core::{AttackError, AttackerMode, Graph, Result};
use rand::seq::index::sample;
use rand::Rng;

/// Sample `count` attackers within `max_distance` hops of `victim`.
///
/// The victim itself is never a candidate. Returned nodes are sorted.
pub fn select_attackers<R: Rng + ?Sized>(
    graph: &Graph,
    victim: usize,
    count: usize,
    max_distance: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if victim >= graph.num_nodes() {
        return Err(AttackError::invalid(format!(
            "victim {victim} out of range for {} nodes",
            graph.num_nodes()
        )));
    }
    if count == 0 {
        return Err(AttackError::invalid("num_attackers must be at least 1"));
    }

    let candidates: Vec<usize> = graph
        .nodes_within(victim, max_distance)
        .into_iter()
        .map(|(node, _)| node)
        .collect();
    if candidates.len() < count {
        return Err(AttackError::invalid(format!(
            "node {victim} has {} candidate attackers within {max_distance} hops, need {count}",
            candidates.len()
        )));
    }

    let mut attackers: Vec<usize> = sample(rng, candidates.len(), count)
        .into_iter()
        .map(|i| candidates[i])
        .collect();
    attackers.sort_unstable();
    Ok(attackers)
}

/// Attackers for `victim` under `mode`.
///
/// `distance` defaults to the model's receptive field.
pub fn attackers_for<R: Rng + ?Sized>(
    mode: AttackerMode,
    graph: &Graph,
    victim: usize,
    count: usize,
    distance: Option<usize>,
    receptive_field: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    match mode {
        AttackerMode::Victim => Ok(vec![victim]),
        AttackerMode::Neighbours => select_attackers(
            graph,
            victim,
            count,
            distance.unwrap_or(receptive_field),
            rng,
        ),
    }
}

/// A uniformly random class other than `true_label`.
pub fn random_target_label<R: Rng + ?Sized>(
    true_label: usize,
    num_classes: usize,
    rng: &mut R,
) -> Result<usize> {
    if num_classes < 2 {
        return Err(AttackError::invalid(format!(
            "targeted attack needs at least 2 classes, got {num_classes}"
        )));
    }
    let r = rng.random_range(0..num_classes - 1);
    Ok(if r >= true_label { r + 1 } else { r })
}

//! Attacking every victim of a node split and aggregating the outcomes.
//!
//! A sweep runs one attack per victim node, either sequentially or across
//! Rayon workers. Every victim derives its own `StdRng` from the config seed
//! and its node index, so both modes produce identical tables.

use crate::embed::Embedder;
use crate::model::{predict, NodeClassifier};
use crate::selection::{attackers_for, random_target_label};
use crate::target::AttackTarget;
use crate::trainer::{AttackTrainer, Termination};
use graphfool_core::{AttackConfig, AttackError, AttackOutcome, GraphDataset, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Standard L∞ budgets for continuous datasets.
pub const LINF_SWEEP: [f32; 13] = [
    0.02, 0.05, 0.07, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0,
];

/// Attacker counts of the multiple-attacker sweep.
pub const ATTACKER_COUNTS: [usize; 5] = [1, 2, 3, 4, 5];

/// L0 ratios `0.01, 0.02, …, 1.0`.
pub fn l0_sweep() -> Vec<f32> {
    (1..=100).map(|i| i as f32 / 100.0).collect()
}

/// Fraction of `nodes` the model classifies correctly on clean features.
pub fn clean_accuracy<M: NodeClassifier + ?Sized>(
    model: &M,
    dataset: &GraphDataset,
    nodes: &[usize],
) -> Result<f32> {
    if nodes.is_empty() {
        return Err(AttackError::invalid("no nodes to evaluate"));
    }
    let predictions = predict(&model.forward(&dataset.features)?);
    let mut correct = 0usize;
    for &node in nodes {
        let (Some(&predicted), Some(&label)) = (predictions.get(node), dataset.labels.get(node))
        else {
            return Err(AttackError::invalid(format!(
                "node {node} out of range for {} nodes",
                dataset.num_nodes()
            )));
        };
        if predicted == label {
            correct += 1;
        }
    }
    Ok(correct as f32 / nodes.len() as f32)
}

/// One attacked victim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VictimRecord {
    pub node: usize,
    /// Target label when targeted, true label otherwise.
    pub label: usize,
    pub attackers: Vec<usize>,
    pub outcome: AttackOutcome,
    pub max_attributes: usize,
    pub epochs_run: usize,
}

impl VictimRecord {
    /// `attributes_used / max_attributes`.
    pub fn attribute_ratio(&self) -> f32 {
        if self.max_attributes == 0 {
            return 0.0;
        }
        self.outcome.attributes_used as f32 / self.max_attributes as f32
    }
}

/// Defence and attribute usage at one L0 ratio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioPoint {
    pub l_0: f32,
    pub defence: f32,
    pub mean_attribute_ratio: f32,
}

/// Stacked per-victim outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeTable {
    rows: Vec<VictimRecord>,
}

impl OutcomeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: VictimRecord) {
        self.rows.push(record);
    }

    pub fn rows(&self) -> &[VictimRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn successes(&self) -> usize {
        self.rows.iter().filter(|r| r.outcome.success).count()
    }

    /// `1 − mean(success)`. An empty table defends everything.
    pub fn defence(&self) -> f32 {
        self.defence_where(|r| r.outcome.success)
    }

    /// Mean attribute ratio over successful rows, 0 when there are none.
    pub fn mean_attribute_ratio(&self) -> f32 {
        self.mean_ratio_where(|r| r.outcome.success)
    }

    /// Re-score the table at each L0 ratio: a row only counts as a success
    /// if it used at most `l_0 × max_attributes` attributes.
    pub fn attribute_ratio_curve(&self, ratios: &[f32]) -> Vec<RatioPoint> {
        ratios
            .iter()
            .map(|&l_0| {
                let within = |r: &VictimRecord| {
                    r.outcome.success
                        && r.outcome.attributes_used as f32 <= l_0 * r.max_attributes as f32
                };
                RatioPoint {
                    l_0,
                    defence: self.defence_where(within),
                    mean_attribute_ratio: self.mean_ratio_where(within),
                }
            })
            .collect()
    }

    fn defence_where(&self, attacked: impl Fn(&VictimRecord) -> bool) -> f32 {
        if self.rows.is_empty() {
            return 1.0;
        }
        let hits = self.rows.iter().filter(|r| attacked(r)).count();
        1.0 - hits as f32 / self.rows.len() as f32
    }

    fn mean_ratio_where(&self, attacked: impl Fn(&VictimRecord) -> bool) -> f32 {
        let (sum, count) = self
            .rows
            .iter()
            .filter(|r| attacked(r))
            .fold((0.0_f32, 0usize), |(s, c), r| (s + r.attribute_ratio(), c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f32
        }
    }
}

/// A victim that could not be attacked, e.g. too few neighbours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedVictim {
    pub node: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub table: OutcomeTable,
    pub skipped: Vec<SkippedVictim>,
    pub clean_accuracy: f32,
}

impl SweepResult {
    pub fn defence(&self) -> f32 {
        self.table.defence()
    }
}

enum VictimResult {
    Attacked(VictimRecord),
    Skipped(SkippedVictim),
}

/// Runs one attack setting over many victims.
#[derive(Debug, Clone)]
pub struct AttackSweep {
    pub config: AttackConfig,
}

impl AttackSweep {
    pub fn new(config: AttackConfig) -> Self {
        Self { config }
    }

    /// Attack every node of `victims` with the current config.
    pub fn run<M: NodeClassifier + Sync + ?Sized>(
        &self,
        model: &M,
        dataset: &GraphDataset,
        victims: &[usize],
    ) -> Result<SweepResult> {
        let trainer = AttackTrainer::from_config(model, &self.config, dataset.dataset_type)?;
        let clean_accuracy = clean_accuracy(model, dataset, victims)?;
        debug!(
            "Sweeping {} victims on {} (clean accuracy {:.3}, {})",
            victims.len(),
            dataset.name,
            clean_accuracy,
            trainer.embedder().describe()
        );

        let results: Vec<Result<VictimResult>> = if self.config.parallel {
            victims
                .par_iter()
                .map(|&victim| self.attack_victim(&trainer, model, dataset, victim))
                .collect()
        } else {
            victims
                .iter()
                .map(|&victim| self.attack_victim(&trainer, model, dataset, victim))
                .collect()
        };

        let mut table = OutcomeTable::new();
        let mut skipped = Vec::new();
        for result in results {
            match result? {
                VictimResult::Attacked(record) => table.push(record),
                VictimResult::Skipped(skip) => skipped.push(skip),
            }
        }

        info!(
            "Dataset: {}, Clean: {:.3}, Defence: {:.3}, Attacked: {}, Skipped: {}",
            dataset.name,
            clean_accuracy,
            table.defence(),
            table.len(),
            skipped.len()
        );

        Ok(SweepResult {
            table,
            skipped,
            clean_accuracy,
        })
    }

    fn attack_victim<M: NodeClassifier + ?Sized>(
        &self,
        trainer: &AttackTrainer<'_, M>,
        model: &M,
        dataset: &GraphDataset,
        victim: usize,
    ) -> Result<VictimResult> {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(victim as u64));
        let true_label = *dataset.labels.get(victim).ok_or_else(|| {
            AttackError::invalid(format!(
                "victim {victim} out of range for {} nodes",
                dataset.num_nodes()
            ))
        })?;

        let target = if self.config.targeted {
            AttackTarget::targeted(victim, random_target_label(true_label, dataset.num_classes, &mut rng)?)
        } else {
            AttackTarget::untargeted(victim, true_label)
        };

        let attackers = match attackers_for(
            self.config.attacker_mode,
            &dataset.graph,
            victim,
            self.config.num_attackers,
            self.config.distance,
            model.receptive_field(),
            &mut rng,
        ) {
            Ok(attackers) => attackers,
            Err(AttackError::InvalidConfiguration(reason)) => {
                debug!("Skipping node {}: {}", victim, reason);
                return Ok(VictimResult::Skipped(SkippedVictim { node: victim, reason }));
            }
            Err(e) => return Err(e),
        };

        let report = trainer.attack_detailed(&dataset.features, &attackers, &target)?;
        if report.termination == Termination::NonFinite {
            debug!("Node {} recorded as failure after non-finite values", victim);
        }

        Ok(VictimResult::Attacked(VictimRecord {
            node: victim,
            label: target.y_targets()[0],
            max_attributes: attackers.len() * dataset.num_attributes(),
            attackers,
            outcome: report.outcome,
            epochs_run: report.epochs_run,
        }))
    }
}

/// Defence of the L∞ attack at each budget in `l_infs`.
pub fn run_linf_sweep<M: NodeClassifier + Sync + ?Sized>(
    base: &AttackConfig,
    model: &M,
    dataset: &GraphDataset,
    victims: &[usize],
    l_infs: &[f32],
) -> Result<Vec<(f32, SweepResult)>> {
    l_infs
        .iter()
        .map(|&l_inf| {
            let config = AttackConfig {
                l_inf: Some(l_inf),
                ..base.clone()
            };
            let result = AttackSweep::new(config).run(model, dataset, victims)?;
            Ok((l_inf, result))
        })
        .collect()
}

/// One unbudgeted L0 sweep, re-scored at every ratio of `ratios`.
pub fn run_attribute_ratio_sweep<M: NodeClassifier + Sync + ?Sized>(
    base: &AttackConfig,
    model: &M,
    dataset: &GraphDataset,
    victims: &[usize],
    ratios: &[f32],
) -> Result<(SweepResult, Vec<RatioPoint>)> {
    let config = AttackConfig {
        l_0: None,
        ..base.clone()
    };
    let result = AttackSweep::new(config).run(model, dataset, victims)?;
    let curve = result.table.attribute_ratio_curve(ratios);
    Ok((result, curve))
}

/// Defence with attackers sampled within each hop distance `1..=max_distance`.
pub fn run_distance_sweep<M: NodeClassifier + Sync + ?Sized>(
    base: &AttackConfig,
    model: &M,
    dataset: &GraphDataset,
    victims: &[usize],
    max_distance: usize,
) -> Result<Vec<(usize, SweepResult)>> {
    if max_distance == 0 {
        return Err(AttackError::invalid("max_distance must be at least 1"));
    }
    (1..=max_distance)
        .map(|distance| {
            let config = AttackConfig {
                distance: Some(distance),
                ..base.clone()
            };
            let result = AttackSweep::new(config).run(model, dataset, victims)?;
            debug!("Distance {}: defence {:.3}", distance, result.defence());
            Ok((distance, result))
        })
        .collect()
}

/// Defence per attacker count, led by a clean column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackerCountSweep {
    /// Accuracy on the victims with no attacker at all.
    pub clean_accuracy: f32,
    pub points: Vec<(usize, SweepResult)>,
}

impl AttackerCountSweep {
    /// Clean accuracy, then the defence at each attacker count.
    pub fn defence_column(&self) -> Vec<f32> {
        std::iter::once(self.clean_accuracy)
            .chain(self.points.iter().map(|(_, result)| result.defence()))
            .collect()
    }

    /// Zero for the clean column, then the mean attribute ratio at each count.
    pub fn attribute_ratio_column(&self) -> Vec<f32> {
        std::iter::once(0.0)
            .chain(self.points.iter().map(|(_, result)| result.table.mean_attribute_ratio()))
            .collect()
    }
}

/// Defence with `counts` attackers per victim (see [`ATTACKER_COUNTS`]).
pub fn run_attackers_sweep<M: NodeClassifier + Sync + ?Sized>(
    base: &AttackConfig,
    model: &M,
    dataset: &GraphDataset,
    victims: &[usize],
    counts: &[usize],
) -> Result<AttackerCountSweep> {
    if counts.is_empty() {
        return Err(AttackError::invalid("no attacker counts to sweep"));
    }
    let clean_accuracy = clean_accuracy(model, dataset, victims)?;
    let points = counts
        .iter()
        .map(|&num_attackers| {
            let config = AttackConfig {
                num_attackers,
                ..base.clone()
            };
            let result = AttackSweep::new(config).run(model, dataset, victims)?;
            debug!("{} attacker(s): defence {:.3}", num_attackers, result.defence());
            Ok((num_attackers, result))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(AttackerCountSweep {
        clean_accuracy,
        points,
    })
}

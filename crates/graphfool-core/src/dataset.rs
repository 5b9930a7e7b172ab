//! In-memory graph datasets.
//!
//! Loading from disk is left to callers; this module only holds and validates
//! the tensors an attack needs.

use crate::{AttackError, DatasetType, Graph, Result};
use ndarray::Array2;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Train/validation/test node partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSplit {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl NodeSplit {
    /// Shuffle `0..num_nodes` and cut it by ratio. Whatever remains after the
    /// train and validation shares goes to test.
    pub fn random<R: Rng + ?Sized>(
        num_nodes: usize,
        train_ratio: f32,
        val_ratio: f32,
        rng: &mut R,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&train_ratio)
            || !(0.0..=1.0).contains(&val_ratio)
            || train_ratio + val_ratio > 1.0
        {
            return Err(AttackError::invalid(format!(
                "split ratios {train_ratio} + {val_ratio} must lie in [0, 1]"
            )));
        }
        let mut nodes: Vec<usize> = (0..num_nodes).collect();
        nodes.shuffle(rng);

        let n_train = (num_nodes as f32 * train_ratio).round() as usize;
        let n_val = ((num_nodes as f32 * val_ratio).round() as usize).min(num_nodes - n_train);

        let test = nodes.split_off(n_train + n_val);
        let val = nodes.split_off(n_train);
        let mut split = Self {
            train: nodes,
            val,
            test,
        };
        split.train.sort_unstable();
        split.val.sort_unstable();
        split.test.sort_unstable();
        Ok(split)
    }

    fn max_index(&self) -> Option<usize> {
        self.train
            .iter()
            .chain(&self.val)
            .chain(&self.test)
            .copied()
            .max()
    }
}

/// Node features, labels and connectivity of one graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDataset {
    pub name: String,
    pub dataset_type: DatasetType,
    /// `[num_nodes, num_attributes]` attribute matrix.
    pub features: Array2<f32>,
    pub labels: Vec<usize>,
    pub num_classes: usize,
    pub graph: Graph,
    pub split: NodeSplit,
}

impl GraphDataset {
    pub fn new(
        name: impl Into<String>,
        dataset_type: DatasetType,
        features: Array2<f32>,
        labels: Vec<usize>,
        num_classes: usize,
        graph: Graph,
        split: NodeSplit,
    ) -> Result<Self> {
        let name = name.into();
        let (num_nodes, num_attributes) = features.dim();

        if labels.len() != num_nodes {
            return Err(AttackError::ShapeMismatch {
                expected: vec![num_nodes],
                got: vec![labels.len()],
            });
        }
        if graph.num_nodes() != num_nodes {
            return Err(AttackError::ShapeMismatch {
                expected: vec![num_nodes, num_attributes],
                got: vec![graph.num_nodes(), num_attributes],
            });
        }
        if let Some(bad) = labels.iter().find(|&&y| y >= num_classes) {
            return Err(AttackError::invalid(format!(
                "label {bad} out of range for {num_classes} classes"
            )));
        }
        if let Some(max) = split.max_index() {
            if max >= num_nodes {
                return Err(AttackError::invalid(format!(
                    "split references node {max} but the graph has {num_nodes} nodes"
                )));
            }
        }
        if dataset_type == DatasetType::Discrete
            && features.iter().any(|&x| x != 0.0 && x != 1.0)
        {
            return Err(AttackError::invalid(format!(
                "dataset {name} is discrete but has non-binary attributes"
            )));
        }

        debug!(
            "Loaded {} dataset {}: {} nodes, {} attributes, {} classes, {} edges",
            dataset_type,
            name,
            num_nodes,
            num_attributes,
            num_classes,
            graph.num_edges()
        );

        Ok(Self {
            name,
            dataset_type,
            features,
            labels,
            num_classes,
            graph,
            split,
        })
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.features.nrows()
    }

    #[inline]
    pub fn num_attributes(&self) -> usize {
        self.features.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tiny_graph() -> Graph {
        Graph::from_edges(3, &[(0, 1), (1, 2)]).unwrap()
    }

    #[test]
    fn test_new_validates_labels() {
        let features = arr2(&[[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]]);
        let err = GraphDataset::new(
            "toy",
            DatasetType::Continuous,
            features,
            vec![0, 1, 2],
            2,
            tiny_graph(),
            NodeSplit::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AttackError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_new_validates_label_count() {
        let features = arr2(&[[0.1], [0.3], [0.5]]);
        let err = GraphDataset::new(
            "toy",
            DatasetType::Continuous,
            features,
            vec![0, 1],
            2,
            tiny_graph(),
            NodeSplit::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AttackError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_discrete_requires_binary() {
        let features = arr2(&[[0.0, 1.0], [1.0, 0.5], [0.0, 0.0]]);
        let result = GraphDataset::new(
            "toy",
            DatasetType::Discrete,
            features,
            vec![0, 1, 0],
            2,
            tiny_graph(),
            NodeSplit::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_split_out_of_range() {
        let features = arr2(&[[0.0], [1.0], [0.0]]);
        let split = NodeSplit {
            train: vec![0],
            val: vec![],
            test: vec![7],
        };
        let result = GraphDataset::new(
            "toy",
            DatasetType::Discrete,
            features,
            vec![0, 1, 0],
            2,
            tiny_graph(),
            split,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_random_split_partitions_all_nodes() {
        let mut rng = StdRng::seed_from_u64(7);
        let split = NodeSplit::random(20, 0.5, 0.25, &mut rng).unwrap();
        assert_eq!(split.train.len(), 10);
        assert_eq!(split.val.len(), 5);
        assert_eq!(split.test.len(), 5);

        let mut all: Vec<usize> = split
            .train
            .iter()
            .chain(&split.val)
            .chain(&split.test)
            .copied()
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_split_is_seeded() {
        let a = NodeSplit::random(30, 0.6, 0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = NodeSplit::random(30, 0.6, 0.2, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_random_split_bad_ratio() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(NodeSplit::random(10, 0.8, 0.5, &mut rng).is_err());
    }
}

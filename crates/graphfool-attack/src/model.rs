//! Differentiable node-classifier capability.
//!
//! The attack core only needs two things from a GNN: class scores for every
//! node given an attribute matrix, and the gradient of a loss with respect to
//! that attribute matrix. Architectures plug in by implementing
//! [`NodeClassifier`]; the trainers never branch on the concrete type.

use graphfool_core::{AttackError, Graph, Result};
use ndarray::{Array1, Array2, Axis};

/// A frozen, differentiable classifier over node attributes.
///
/// Implementations own their weights and graph structure and are borrowed
/// immutably by attacks, so concurrent attacks can share one model.
pub trait NodeClassifier {
    fn num_nodes(&self) -> usize;

    fn num_attributes(&self) -> usize;

    fn num_classes(&self) -> usize;

    /// Number of message-passing hops, i.e. how far an attacker can sit from
    /// its victim and still influence it.
    fn receptive_field(&self) -> usize {
        1
    }

    /// Class scores (logits), shape `[num_nodes, num_classes]`.
    fn forward(&self, features: &Array2<f32>) -> Result<Array2<f32>>;

    /// Gradient of a scalar loss with respect to `features`, given the loss
    /// gradient with respect to the scores returned by [`forward`](Self::forward).
    fn backward(&self, features: &Array2<f32>, grad_scores: &Array2<f32>) -> Result<Array2<f32>>;
}

/// Argmax label per node. Ties go to the lowest class index.
pub fn predict(scores: &Array2<f32>) -> Vec<usize> {
    scores
        .axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best_i, best), (i, &s)| {
                    if s > best {
                        (i, s)
                    } else {
                        (best_i, best)
                    }
                })
                .0
        })
        .collect()
}

/// Simplified graph convolution: `scores = Â^k X W + b`.
///
/// `Â` is the symmetric normalized adjacency with self-loops. The propagation
/// matrix is precomputed, so forward and backward are two dense matmuls each.
#[derive(Debug, Clone)]
pub struct SgcModel {
    propagation: Array2<f32>,
    weight: Array2<f32>,
    bias: Array1<f32>,
    hops: usize,
}

impl SgcModel {
    /// `weight` is `[num_attributes, num_classes]`, `bias` is `[num_classes]`.
    pub fn new(graph: &Graph, hops: usize, weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        if hops == 0 {
            return Err(AttackError::invalid("SGC needs at least one hop"));
        }
        if bias.len() != weight.ncols() {
            return Err(AttackError::ShapeMismatch {
                expected: vec![weight.ncols()],
                got: vec![bias.len()],
            });
        }

        let a_hat = graph.normalized_adjacency();
        let mut propagation = a_hat.clone();
        for _ in 1..hops {
            propagation = propagation.dot(&a_hat);
        }

        Ok(Self {
            propagation,
            weight,
            bias,
            hops,
        })
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    fn check_features(&self, features: &Array2<f32>) -> Result<()> {
        let expected = [self.num_nodes(), self.num_attributes()];
        if features.shape() != expected {
            return Err(AttackError::ShapeMismatch {
                expected: expected.to_vec(),
                got: features.shape().to_vec(),
            });
        }
        Ok(())
    }
}

impl NodeClassifier for SgcModel {
    fn num_nodes(&self) -> usize {
        self.propagation.nrows()
    }

    fn num_attributes(&self) -> usize {
        self.weight.nrows()
    }

    fn num_classes(&self) -> usize {
        self.weight.ncols()
    }

    fn receptive_field(&self) -> usize {
        self.hops
    }

    fn forward(&self, features: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_features(features)?;
        let hidden = self.propagation.dot(features);
        Ok(hidden.dot(&self.weight) + &self.bias)
    }

    fn backward(&self, features: &Array2<f32>, grad_scores: &Array2<f32>) -> Result<Array2<f32>> {
        self.check_features(features)?;
        let expected = [self.num_nodes(), self.num_classes()];
        if grad_scores.shape() != expected {
            return Err(AttackError::ShapeMismatch {
                expected: expected.to_vec(),
                got: grad_scores.shape().to_vec(),
            });
        }
        // d/dX of <G, P X W> = Pᵀ G Wᵀ
        Ok(self
            .propagation
            .t()
            .dot(grad_scores)
            .dot(&self.weight.t()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn two_node_model() -> SgcModel {
        let graph = Graph::from_edges(2, &[(0, 1)]).unwrap();
        SgcModel::new(&graph, 1, arr2(&[[1.0, -1.0], [0.0, 2.0]]), arr1(&[0.0, 0.5])).unwrap()
    }

    #[test]
    fn test_predict_argmax_and_ties() {
        let scores = arr2(&[[0.1, 0.9, 0.3], [2.0, 2.0, -1.0]]);
        assert_eq!(predict(&scores), vec![1, 0]);
    }

    #[test]
    fn test_sgc_forward_shape_and_values() {
        let model = two_node_model();
        let x = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let scores = model.forward(&x).unwrap();
        assert_eq!(scores.dim(), (2, 2));
        // Â = [[0.5, 0.5], [0.5, 0.5]] so both rows aggregate to [0.5, 0.5].
        // [0.5, 0.5] · W = [0.5, 0.5], plus bias [0, 0.5].
        assert!((scores[[0, 0]] - 0.5).abs() < 1e-5);
        assert!((scores[[0, 1]] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sgc_backward_matches_finite_difference() {
        let model = two_node_model();
        let x = arr2(&[[0.3, -0.2], [0.1, 0.4]]);
        // Loss = scores[0, 1]
        let mut grad_scores = Array2::<f32>::zeros((2, 2));
        grad_scores[[0, 1]] = 1.0;
        let grad = model.backward(&x, &grad_scores).unwrap();

        let h = 1e-3;
        for i in 0..2 {
            for j in 0..2 {
                let mut xp = x.clone();
                xp[[i, j]] += h;
                let mut xm = x.clone();
                xm[[i, j]] -= h;
                let fd = (model.forward(&xp).unwrap()[[0, 1]] - model.forward(&xm).unwrap()[[0, 1]])
                    / (2.0 * h);
                assert!(
                    (grad[[i, j]] - fd).abs() < 1e-3,
                    "grad[{i},{j}] = {} vs finite difference {fd}",
                    grad[[i, j]]
                );
            }
        }
    }

    #[test]
    fn test_sgc_rejects_bad_shapes() {
        let model = two_node_model();
        let bad = arr2(&[[1.0, 2.0, 3.0]]);
        assert!(matches!(
            model.forward(&bad),
            Err(AttackError::ShapeMismatch { .. })
        ));

        let graph = Graph::empty(2);
        let err = SgcModel::new(&graph, 1, arr2(&[[1.0, 0.0]]), arr1(&[0.0])).unwrap_err();
        assert!(matches!(err, AttackError::ShapeMismatch { .. }));
        assert!(SgcModel::new(&graph, 0, arr2(&[[1.0]]), arr1(&[0.0])).is_err());
    }

    #[test]
    fn test_sgc_hops_widen_receptive_field() {
        let graph = Graph::from_edges(3, &[(0, 1), (1, 2)]).unwrap();
        let w = arr2(&[[1.0]]);
        let one = SgcModel::new(&graph, 1, w.clone(), arr1(&[0.0])).unwrap();
        let two = SgcModel::new(&graph, 2, w, arr1(&[0.0])).unwrap();
        assert_eq!(two.receptive_field(), 2);

        // Node 2's attribute only reaches node 0 after two hops.
        let x = arr2(&[[0.0], [0.0], [1.0]]);
        assert_eq!(one.forward(&x).unwrap()[[0, 0]], 0.0);
        assert!(two.forward(&x).unwrap()[[0, 0]] > 0.0);
    }
}

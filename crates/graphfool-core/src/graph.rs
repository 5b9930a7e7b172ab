//! Undirected graph connectivity.

use crate::{AttackError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Undirected graph stored as sorted, deduplicated adjacency lists.
///
/// Self-loops in the input are dropped; normalization adds them back
/// uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    adjacency: Vec<Vec<usize>>,
    num_edges: usize,
}

impl Graph {
    /// Build a graph from an undirected edge list.
    pub fn from_edges(num_nodes: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let mut adjacency = vec![Vec::new(); num_nodes];
        for &(u, v) in edges {
            if u >= num_nodes || v >= num_nodes {
                return Err(AttackError::invalid(format!(
                    "edge ({u}, {v}) out of range for {num_nodes} nodes"
                )));
            }
            if u == v {
                continue;
            }
            adjacency[u].push(v);
            adjacency[v].push(u);
        }
        for list in &mut adjacency {
            list.sort_unstable();
            list.dedup();
        }
        let num_edges = adjacency.iter().map(Vec::len).sum::<usize>() / 2;
        Ok(Self {
            adjacency,
            num_edges,
        })
    }

    /// A graph with no edges.
    pub fn empty(num_nodes: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); num_nodes],
            num_edges: 0,
        }
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.num_edges
    }

    pub fn neighbours(&self, node: usize) -> &[usize] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn degree(&self, node: usize) -> usize {
        self.neighbours(node).len()
    }

    /// Nodes reachable from `source` in `1..=max_distance` hops, with their
    /// hop distance, in BFS order. The source itself is excluded.
    pub fn nodes_within(&self, source: usize, max_distance: usize) -> Vec<(usize, usize)> {
        if source >= self.num_nodes() {
            return Vec::new();
        }
        let mut dist = vec![usize::MAX; self.num_nodes()];
        let mut queue = VecDeque::new();
        let mut found = Vec::new();

        dist[source] = 0;
        queue.push_back(source);
        while let Some(node) = queue.pop_front() {
            let d = dist[node];
            if d == max_distance {
                continue;
            }
            for &next in &self.adjacency[node] {
                if dist[next] == usize::MAX {
                    dist[next] = d + 1;
                    found.push((next, d + 1));
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// Symmetric normalized adjacency with self-loops: D^-1/2 (A + I) D^-1/2.
    pub fn normalized_adjacency(&self) -> Array2<f32> {
        let n = self.num_nodes();
        let inv_sqrt_deg: Vec<f32> = (0..n)
            .map(|i| 1.0 / ((self.degree(i) + 1) as f32).sqrt())
            .collect();

        let mut a_hat = Array2::<f32>::zeros((n, n));
        for i in 0..n {
            a_hat[[i, i]] = inv_sqrt_deg[i] * inv_sqrt_deg[i];
            for &j in &self.adjacency[i] {
                a_hat[[i, j]] = inv_sqrt_deg[i] * inv_sqrt_deg[j];
            }
        }
        a_hat
    }
}

//! Scenario tests for the attack trainers and sweeps.
//!
//! Most scenarios use a two-class SGC on a single edge `0 - 1`, with
//! `W = [[0, 2]]` and `b = [0, −θ]`. With zero features the victim (node 0)
//! scores `s₁ = x₀ + x₁ − θ`, so an attacker on node 1 flips the victim once
//! its attribute exceeds `θ`.


use crate::model::{NodeClassifier, SgcModel};
use crate::trainer::TrainerSettings;
use graphfool_core::{Graph, Result, Verbosity};
use ndarray::{arr1, arr2, Array2};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Two-node SGC whose victim flips once the attacker attribute passes `theta`.
pub(crate) fn pair_model(theta: f32) -> SgcModel {
    let graph = Graph::from_edges(2, &[(0, 1)]).unwrap();
    SgcModel::new(&graph, 1, arr2(&[[0.0, 2.0]]), arr1(&[0.0, -theta])).unwrap()
}

pub(crate) fn pair_features() -> Array2<f32> {
    Array2::zeros((2, 1))
}

pub(crate) fn quiet(attack_epochs: usize, lr: f32) -> TrainerSettings {
    TrainerSettings {
        attack_epochs,
        lr,
        verbosity: Verbosity::None,
    }
}

/// Wraps a model and counts capability calls.
pub(crate) struct CountingModel {
    pub inner: SgcModel,
    pub forward_calls: AtomicUsize,
    pub backward_calls: AtomicUsize,
}

impl CountingModel {
    pub fn new(inner: SgcModel) -> Self {
        Self {
            inner,
            forward_calls: AtomicUsize::new(0),
            backward_calls: AtomicUsize::new(0),
        }
    }

    pub fn forwards(&self) -> usize {
        self.forward_calls.load(Ordering::SeqCst)
    }

    pub fn backwards(&self) -> usize {
        self.backward_calls.load(Ordering::SeqCst)
    }
}

impl NodeClassifier for CountingModel {
    fn num_nodes(&self) -> usize {
        self.inner.num_nodes()
    }

    fn num_attributes(&self) -> usize {
        self.inner.num_attributes()
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn forward(&self, features: &Array2<f32>) -> Result<Array2<f32>> {
        self.forward_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.forward(features)
    }

    fn backward(&self, features: &Array2<f32>, grad_scores: &Array2<f32>) -> Result<Array2<f32>> {
        self.backward_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.backward(features, grad_scores)
    }
}

/// Shared in-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub(crate) struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap();
        String::from_utf8_lossy(&bytes).lines().map(str::to_owned).collect()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Run `f` with `info` and above formatted into a fresh buffer.
pub(crate) fn capture_info<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, buffer.lines())
}

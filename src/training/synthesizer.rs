//! Scenario synthesizer collaborator
//!
//! The scenario-generating model is an opaque capability: this crate drives
//! training and sampling through the trait and never inspects the model's
//! internals beyond the opaque weight matrix it hands back.

use crate::error::Result;
use crate::training::job::Scenario;
use async_trait::async_trait;
use rand::Rng;
use tokio::sync::RwLock;

/// Opaque model weight snapshot
pub type ModelState = Vec<Vec<f64>>;

/// Scenario-generating model capability.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScenarioSynthesizer: Send + Sync {
    /// Run training over the dataset; returns the training loss.
    async fn train(&self, dataset: &[Scenario], epochs: u32, batch_size: usize) -> Result<f64>;

    /// Score a held-out dataset without updating weights; returns the loss.
    async fn evaluate(&self, dataset: &[Scenario]) -> Result<f64>;

    /// Sample new scenarios from the current model.
    async fn generate(&self, n: usize) -> Result<Vec<Scenario>>;

    /// Snapshot of the current model weights.
    async fn current_model_state(&self) -> Result<ModelState>;
}

/// In-process synthesizer used by the worker binary and tests. Holds a small
/// dense weight matrix and nudges it toward the dataset mean on every pass.
pub struct InProcessSynthesizer {
    weights: RwLock<ModelState>,
    learning_rate: f64,
}

impl InProcessSynthesizer {
    pub fn new(rows: usize, cols: usize) -> Self {
        let mut rng = rand::thread_rng();
        let weights = (0..rows)
            .map(|_| (0..cols).map(|_| rng.gen_range(-0.1..0.1)).collect())
            .collect();
        Self {
            weights: RwLock::new(weights),
            learning_rate: 0.05,
        }
    }

    fn dataset_mean(dataset: &[Scenario]) -> f64 {
        if dataset.is_empty() {
            return 0.0;
        }
        dataset.iter().map(|s| s.label).sum::<f64>() / dataset.len() as f64
    }
}

impl Default for InProcessSynthesizer {
    fn default() -> Self {
        Self::new(4, 8)
    }
}

#[async_trait]
impl ScenarioSynthesizer for InProcessSynthesizer {
    async fn train(&self, dataset: &[Scenario], epochs: u32, _batch_size: usize) -> Result<f64> {
        let target = Self::dataset_mean(dataset);
        let mut weights = self.weights.write().await;

        let mut loss = 0.0;
        for _ in 0..epochs.max(1) {
            loss = 0.0;
            for row in weights.iter_mut() {
                for w in row.iter_mut() {
                    let err = target - *w;
                    *w += self.learning_rate * err;
                    loss += err * err;
                }
            }
        }

        let count: usize = weights.iter().map(|r| r.len()).sum();
        Ok(loss / count.max(1) as f64)
    }

    async fn evaluate(&self, dataset: &[Scenario]) -> Result<f64> {
        let target = Self::dataset_mean(dataset);
        let weights = self.weights.read().await;

        let mut loss = 0.0;
        let mut count = 0usize;
        for row in weights.iter() {
            for w in row.iter() {
                let err = target - *w;
                loss += err * err;
                count += 1;
            }
        }
        Ok(loss / count.max(1) as f64)
    }

    async fn generate(&self, n: usize) -> Result<Vec<Scenario>> {
        let mut rng = rand::thread_rng();
        Ok((0..n)
            .map(|_| Scenario {
                features: (0..4).map(|_| rng.gen_range(-1.0..1.0)).collect(),
                label: rng.gen_range(0.0..1.0),
            })
            .collect())
    }

    async fn current_model_state(&self) -> Result<ModelState> {
        Ok(self.weights.read().await.clone())
    }
}

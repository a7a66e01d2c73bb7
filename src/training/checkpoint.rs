//! Training checkpoints with bounded retention

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-epoch training metrics, also carried on checkpoints and in worker
/// status reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epoch: u32,
    pub train_loss: f64,
    pub validation_loss: f64,
    pub safety_score: f64,
    pub gradient_norm: f64,
}

/// A persisted snapshot of training weights and metrics at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
    /// Reference to the stored weights, not the weights themselves
    pub weights_ref: String,
    pub metrics: TrainingMetrics,
    /// Countersignature from the safety validator
    pub safety_signature: String,
}

/// Keeps only the most recent `capacity` checkpoints (FIFO eviction).
#[derive(Debug)]
pub struct CheckpointRing {
    capacity: usize,
    entries: VecDeque<Checkpoint>,
}

impl CheckpointRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn push(&mut self, checkpoint: Checkpoint) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(checkpoint);
    }

    pub fn latest(&self) -> Option<&Checkpoint> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Checkpoint> {
        self.entries.iter()
    }
}

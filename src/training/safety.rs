//! Safety validator collaborator
//!
//! The validator is an opaque oracle from this crate's perspective: it scores
//! a model state, supplies the gradient-norm metric, and countersigns
//! checkpoint weights. A failing score or runaway gradient norm trips the
//! worker's circuit breakers; a scenario the validator rejects is dropped,
//! not retried.

use crate::error::Result;
use crate::training::synthesizer::ModelState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Verdict returned by the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub is_valid: bool,
    /// Composite safety score in [0, 1]
    pub score: f64,
    /// Gradient-norm metric for the breaker check
    pub gradient_norm: f64,
    pub recommendations: Vec<String>,
}

/// Safety oracle capability. Pure from the caller's perspective.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SafetyValidator: Send + Sync {
    async fn validate(&self, state: &ModelState) -> Result<SafetyReport>;

    /// Countersign checkpoint weights.
    async fn sign(&self, weights_ref: &str) -> Result<String>;
}

/// Built-in validator used by the worker binary and tests. Scores the model
/// by its weight magnitudes and signs with SHA-256 over the weights ref.
#[derive(Debug, Clone)]
pub struct DigestValidator {
    /// Gradient norms are mapped onto [0, 1] against this scale
    norm_scale: f64,
}

impl DigestValidator {
    pub fn new(norm_scale: f64) -> Self {
        Self { norm_scale }
    }

    fn l2_norm(state: &ModelState) -> f64 {
        state
            .iter()
            .flat_map(|row| row.iter())
            .map(|w| w * w)
            .sum::<f64>()
            .sqrt()
    }
}

impl Default for DigestValidator {
    fn default() -> Self {
        Self::new(10.0)
    }
}

#[async_trait]
impl SafetyValidator for DigestValidator {
    async fn validate(&self, state: &ModelState) -> Result<SafetyReport> {
        let gradient_norm = Self::l2_norm(state);
        let score = 1.0 / (1.0 + gradient_norm / self.norm_scale);
        let is_valid = score >= 0.5;

        let recommendations = if is_valid {
            Vec::new()
        } else {
            vec![format!(
                "weight norm {gradient_norm:.3} exceeds the stable range; reduce the learning rate"
            )]
        };

        Ok(SafetyReport {
            is_valid,
            score,
            gradient_norm,
            recommendations,
        })
    }

    async fn sign(&self, weights_ref: &str) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(weights_ref.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_small_weights_score_high() {
        let validator = DigestValidator::default();
        let report = validator.validate(&vec![vec![0.1, 0.1]]).await.unwrap();
        assert!(report.is_valid);
        assert!(report.score > 0.9);
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_large_weights_flagged() {
        let validator = DigestValidator::new(1.0);
        let report = validator
            .validate(&vec![vec![100.0, -100.0], vec![50.0, 75.0]])
            .await
            .unwrap();
        assert!(!report.is_valid);
        assert!(!report.recommendations.is_empty());
        assert!(report.gradient_norm > 100.0);
    }

    #[tokio::test]
    async fn test_signature_is_deterministic() {
        let validator = DigestValidator::default();
        let a = validator.sign("weights/job-1/5").await.unwrap();
        let b = validator.sign("weights/job-1/5").await.unwrap();
        let c = validator.sign("weights/job-1/10").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}

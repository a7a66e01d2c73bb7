//! Route admission gate
//!
//! Screens candidate two-network routes against the adaptive per-network
//! latency thresholds. Admission is two-phase: a route is evaluated once at
//! detection time and again immediately before commit, because thresholds
//! drift between the two as new samples arrive. Admitted routes are handed
//! to the execution collaborator; this crate never executes trades itself.

use crate::config::GateConfig;
use crate::error::Result;
use crate::latency::estimator::{LatencyRiskEstimator, MIN_THRESHOLD_MS};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A candidate two-network trade opportunity (read-only input)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub source_network: String,
    pub target_network: String,
    pub estimated_latency_ms: f64,
    pub profit_estimate: Decimal,
}

/// Outcome of one gate evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Admitted {
        combined_estimate_ms: f64,
        budget_ms: f64,
    },
    Rejected {
        combined_estimate_ms: f64,
        budget_ms: f64,
    },
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Admitted { .. })
    }
}

/// Execution collaborator receiving admitted routes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RouteExecutor: Send + Sync {
    async fn execute(&self, route: &Route) -> Result<()>;
}

pub struct OpportunityGate {
    config: GateConfig,
    estimator: Arc<LatencyRiskEstimator>,
    executor: Arc<dyn RouteExecutor>,
}

impl OpportunityGate {
    pub fn new(
        config: GateConfig,
        estimator: Arc<LatencyRiskEstimator>,
        executor: Arc<dyn RouteExecutor>,
    ) -> Self {
        Self {
            config,
            estimator,
            executor,
        }
    }

    /// Trend-aware latency prediction for one network, floored at the
    /// configured minimum.
    pub async fn predict_latency(&self, network_id: &str) -> f64 {
        let samples = self
            .estimator
            .recent_samples(network_id, self.config.long_window)
            .await;
        if samples.is_empty() {
            return self.config.min_latency_ms;
        }

        let short = tail_mean(&samples, self.config.short_window);
        let medium = tail_mean(&samples, self.config.medium_window);
        let long = tail_mean(&samples, self.config.long_window);

        // Agreement across the three averages scores the trend: both ratios
        // positive means latency is rising on every horizon.
        let trend_strength = if medium > f64::EPSILON && long > f64::EPSILON {
            ((short / medium - 1.0) + (medium / long - 1.0)).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let load = self.estimator.load_factor(network_id).await;
        let base = tail_mean(&samples, self.config.base_window);

        (base * (1.0 + load * trend_strength)).max(self.config.min_latency_ms)
    }

    /// Confidence-weighted combination of the two per-side predictions.
    ///
    /// A side with no threshold yet gets a neutral 0.5 confidence; a side
    /// far from its threshold contributes little.
    pub fn combine(
        source_pred: f64,
        target_pred: f64,
        source_threshold: Option<f64>,
        target_threshold: Option<f64>,
    ) -> f64 {
        let source_conf = confidence(source_pred, source_threshold);
        let target_conf = confidence(target_pred, target_threshold);

        let total = source_conf + target_conf;
        if total <= f64::EPSILON {
            return (source_pred + target_pred) / 2.0;
        }
        (source_pred * source_conf + target_pred * target_conf) / total
    }

    /// Detection-time screen. Does not touch the executor.
    pub async fn screen(&self, route: &Route) -> GateDecision {
        let decision = self.evaluate(route).await;
        debug!(
            "screen {} -> {}: {:?}",
            route.source_network, route.target_network, decision
        );
        decision
    }

    /// Pre-commit admission. Re-evaluates against the current thresholds and
    /// forwards the route to the executor when it still clears the budget.
    pub async fn admit(&self, route: &Route) -> Result<GateDecision> {
        let decision = self.evaluate(route).await;

        match &decision {
            GateDecision::Rejected {
                combined_estimate_ms,
                budget_ms,
            } => {
                info!(
                    "rejected route {} -> {}: estimate {:.1}ms over budget {:.1}ms",
                    route.source_network, route.target_network, combined_estimate_ms, budget_ms
                );
            }
            GateDecision::Admitted {
                combined_estimate_ms,
                budget_ms,
            } => {
                info!(
                    "admitted route {} -> {} (estimate {:.1}ms, budget {:.1}ms, profit {})",
                    route.source_network,
                    route.target_network,
                    combined_estimate_ms,
                    budget_ms,
                    route.profit_estimate
                );
                if self.config.dry_run {
                    warn!("dry run: route not forwarded to executor");
                } else {
                    self.executor.execute(route).await?;
                }
            }
        }

        Ok(decision)
    }

    async fn evaluate(&self, route: &Route) -> GateDecision {
        let source_pred = self.predict_latency(&route.source_network).await;
        let target_pred = self.predict_latency(&route.target_network).await;

        let source_threshold = self
            .estimator
            .threshold(&route.source_network)
            .await
            .map(|t| t.threshold_ms);
        let target_threshold = self
            .estimator
            .threshold(&route.target_network)
            .await
            .map(|t| t.threshold_ms);

        let combined = Self::combine(source_pred, target_pred, source_threshold, target_threshold);

        // An untracked side contributes the minimum threshold to the budget.
        let budget = source_threshold.unwrap_or(MIN_THRESHOLD_MS)
            + target_threshold.unwrap_or(MIN_THRESHOLD_MS);

        if combined > budget {
            GateDecision::Rejected {
                combined_estimate_ms: combined,
                budget_ms: budget,
            }
        } else {
            GateDecision::Admitted {
                combined_estimate_ms: combined,
                budget_ms: budget,
            }
        }
    }
}

fn confidence(prediction: f64, threshold: Option<f64>) -> f64 {
    match threshold {
        Some(t) if t > f64::EPSILON => (1.0 - ((prediction - t).abs() / t)).max(0.0),
        _ => 0.5,
    }
}

fn tail_mean(samples: &[f64], n: usize) -> f64 {
    if samples.is_empty() || n == 0 {
        return 0.0;
    }
    let skip = samples.len().saturating_sub(n);
    let tail = &samples[skip..];
    tail.iter().sum::<f64>() / tail.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LatencyConfig;
    use rust_decimal_macros::dec;

    fn estimator() -> Arc<LatencyRiskEstimator> {
        Arc::new(LatencyRiskEstimator::new(
            LatencyConfig::default(),
            Arc::new(ManualClock::epoch()),
        ))
    }

    fn route() -> Route {
        Route {
            source_network: "base".to_string(),
            target_network: "arbitrum".to_string(),
            estimated_latency_ms: 120.0,
            profit_estimate: dec!(14.25),
        }
    }

    #[test]
    fn test_combine_weights_by_confidence() {
        // Source sits on its threshold (confidence 1), target is far off
        // (confidence 0): the combination follows the source.
        let combined = OpportunityGate::combine(100.0, 400.0, Some(100.0), Some(100.0));
        assert!((combined - 100.0).abs() < f64::EPSILON);

        // Equal confidence averages evenly.
        let combined = OpportunityGate::combine(90.0, 110.0, Some(100.0), Some(100.0));
        assert!((combined - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_combine_neutral_without_thresholds() {
        // No thresholds: both sides get 0.5 and the result is the mean.
        let combined = OpportunityGate::combine(80.0, 120.0, None, None);
        assert!((combined - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_combine_falls_back_when_confidence_vanishes() {
        // Both sides more than 100% away from their thresholds.
        let combined = OpportunityGate::combine(300.0, 500.0, Some(50.0), Some(50.0));
        assert!((combined - 400.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_prediction_floor_without_samples() {
        let gate = OpportunityGate::new(
            GateConfig::default(),
            estimator(),
            Arc::new(MockRouteExecutor::new()),
        );
        assert_eq!(gate.predict_latency("cold").await, 50.0);
    }

    #[tokio::test]
    async fn test_admit_forwards_to_executor() {
        let est = estimator();
        // Warm both networks around 60ms; thresholds settle near the level.
        for _ in 0..30 {
            est.record_sample("base", 60.0).await;
            est.record_sample("arbitrum", 60.0).await;
        }

        let mut executor = MockRouteExecutor::new();
        executor.expect_execute().times(1).returning(|_| Ok(()));

        let gate = OpportunityGate::new(GateConfig::default(), est, Arc::new(executor));
        let decision = gate.admit(&route()).await.unwrap();
        assert!(decision.is_admitted());
    }

    #[tokio::test]
    async fn test_rejected_route_never_reaches_executor() {
        let est = estimator();
        // A long calm history anchors the thresholds low; a burst of hot
        // samples drives the prediction far past the combined budget.
        for _ in 0..100 {
            est.record_sample("base", 60.0).await;
            est.record_sample("arbitrum", 60.0).await;
        }
        for _ in 0..10 {
            est.record_sample("base", 700.0).await;
            est.record_sample("arbitrum", 700.0).await;
        }

        let mut executor = MockRouteExecutor::new();
        executor.expect_execute().times(0);

        let gate = OpportunityGate::new(GateConfig::default(), est, Arc::new(executor));
        let decision = gate.admit(&route()).await.unwrap();
        assert!(!decision.is_admitted());
    }

    #[tokio::test]
    async fn test_threshold_drift_flips_decision_before_commit() {
        let est = estimator();
        for _ in 0..30 {
            est.record_sample("base", 60.0).await;
            est.record_sample("arbitrum", 60.0).await;
        }

        let mut executor = MockRouteExecutor::new();
        executor.expect_execute().times(0);
        let gate = OpportunityGate::new(GateConfig::default(), est.clone(), Arc::new(executor));

        // Phase one admits against the calm thresholds.
        assert!(gate.screen(&route()).await.is_admitted());

        // Conditions degrade between detection and commit.
        for _ in 0..10 {
            est.record_sample("base", 500.0).await;
            est.record_sample("arbitrum", 500.0).await;
        }

        // Phase two re-checks and rejects; the executor is never called.
        let decision = gate.admit(&route()).await.unwrap();
        assert!(!decision.is_admitted());
    }

    #[tokio::test]
    async fn test_dry_run_skips_executor() {
        let est = estimator();
        for _ in 0..30 {
            est.record_sample("base", 60.0).await;
            est.record_sample("arbitrum", 60.0).await;
        }

        let mut executor = MockRouteExecutor::new();
        executor.expect_execute().times(0);

        let config = GateConfig {
            dry_run: true,
            ..GateConfig::default()
        };
        let gate = OpportunityGate::new(config, est, Arc::new(executor));
        let decision = gate.admit(&route()).await.unwrap();
        assert!(decision.is_admitted());
    }
}

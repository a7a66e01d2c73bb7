//! Per-network adaptive latency threshold estimation
//!
//! Each tracked network keeps a bounded ring of round-trip samples. Every new
//! sample re-derives median/p95/deviation over the recent statistics window,
//! folds them into an exponential moving average threshold, and resizes the
//! retained window. The threshold is hard-clamped to [50, 1000] milliseconds
//! after every update.

use crate::clock::Clock;
use crate::config::LatencyConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Hard floor on the adaptive threshold (milliseconds)
pub const MIN_THRESHOLD_MS: f64 = 50.0;
/// Hard ceiling on the adaptive threshold (milliseconds)
pub const MAX_THRESHOLD_MS: f64 = 1000.0;

/// Current latency statistics and admission threshold for one network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainThreshold {
    pub network_id: String,
    pub median: f64,
    pub std_dev: f64,
    pub p95: f64,
    pub threshold_ms: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
struct NetworkWindow {
    samples: VecDeque<f64>,
    /// Adaptive retention cap, within [100, max_samples]
    window_cap: usize,
    threshold: Option<ChainThreshold>,
}

impl NetworkWindow {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window_cap: max_samples,
            threshold: None,
        }
    }

    fn evict(&mut self) {
        while self.samples.len() > self.window_cap {
            self.samples.pop_front();
        }
    }
}

/// Online latency-risk statistics engine.
pub struct LatencyRiskEstimator {
    config: LatencyConfig,
    clock: Arc<dyn Clock>,
    networks: RwLock<HashMap<String, NetworkWindow>>,
}

impl LatencyRiskEstimator {
    pub fn new(config: LatencyConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            networks: RwLock::new(HashMap::new()),
        }
    }

    /// Record a round-trip sample and re-derive the network's threshold.
    pub async fn record_sample(&self, network_id: &str, latency_ms: f64) -> ChainThreshold {
        let mut networks = self.networks.write().await;
        let window = networks
            .entry(network_id.to_string())
            .or_insert_with(|| NetworkWindow::new(self.config.max_samples));

        window.samples.push_back(latency_ms);
        window.evict();

        let now = self.clock.now();

        // With fewer than 2 samples variance is undefined; short-circuit to
        // the raw median.
        if window.samples.len() < 2 {
            let threshold = ChainThreshold {
                network_id: network_id.to_string(),
                median: latency_ms,
                std_dev: 0.0,
                p95: latency_ms,
                threshold_ms: latency_ms.clamp(MIN_THRESHOLD_MS, MAX_THRESHOLD_MS),
                last_updated: now,
            };
            window.threshold = Some(threshold.clone());
            return threshold;
        }

        let recent = recent_window(&window.samples, self.config.stats_window);

        let mut sorted = recent.clone();
        sorted.sort_by(f64::total_cmp);
        let median = median_of(&sorted);
        let p95 = percentile_95(&sorted);
        let std_dev = std_dev_of(&recent);

        let load = load_factor(&recent);
        let noise_margin = std_dev * self.config.security_factor * (1.0 + load);

        // Higher load yields lower alpha: slower trust in new evidence on
        // volatile networks.
        let alpha = (1.0 / (1.0 + load)).clamp(0.1, 0.3);
        let previous = window
            .threshold
            .as_ref()
            .map(|t| t.threshold_ms)
            .unwrap_or(median);
        let candidate = alpha * (median + noise_margin) + (1.0 - alpha) * previous;
        let threshold_ms = candidate.min(p95).clamp(MIN_THRESHOLD_MS, MAX_THRESHOLD_MS);

        // Resize the retained window from the observed load.
        let denom = load * (2.0 - self.config.safety_factor);
        window.window_cap = if denom <= f64::EPSILON {
            self.config.max_samples
        } else {
            (200.0 / denom).clamp(100.0, self.config.max_samples as f64) as usize
        };
        window.evict();

        debug!(
            "network {}: median={:.1} p95={:.1} std={:.1} load={:.2} threshold={:.1}",
            network_id, median, p95, std_dev, load, threshold_ms
        );

        let threshold = ChainThreshold {
            network_id: network_id.to_string(),
            median,
            std_dev,
            p95,
            threshold_ms,
            last_updated: now,
        };
        window.threshold = Some(threshold.clone());
        threshold
    }

    /// Latest threshold for a network, if any samples have arrived.
    pub async fn threshold(&self, network_id: &str) -> Option<ChainThreshold> {
        self.networks
            .read()
            .await
            .get(network_id)
            .and_then(|w| w.threshold.clone())
    }

    /// Up to `n` most recent samples, oldest first.
    pub async fn recent_samples(&self, network_id: &str, n: usize) -> Vec<f64> {
        self.networks
            .read()
            .await
            .get(network_id)
            .map(|w| {
                let skip = w.samples.len().saturating_sub(n);
                w.samples.iter().skip(skip).copied().collect()
            })
            .unwrap_or_default()
    }

    /// Current volatility-derived load factor for a network, in [0, 1].
    pub async fn load_factor(&self, network_id: &str) -> f64 {
        self.networks
            .read()
            .await
            .get(network_id)
            .map(|w| load_factor(&recent_window(&w.samples, self.config.stats_window)))
            .unwrap_or(0.0)
    }

    /// Networks with at least one recorded sample.
    pub async fn tracked_networks(&self) -> Vec<String> {
        self.networks.read().await.keys().cloned().collect()
    }
}

fn recent_window(samples: &VecDeque<f64>, n: usize) -> Vec<f64> {
    let skip = samples.len().saturating_sub(n);
    samples.iter().skip(skip).copied().collect()
}

fn median_of(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn percentile_95(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let idx = ((n as f64) * 0.95).floor() as usize;
    sorted[idx.min(n - 1)]
}

fn std_dev_of(window: &[f64]) -> f64 {
    let n = window.len();
    if n < 2 {
        return 0.0;
    }
    let mean = window.iter().sum::<f64>() / n as f64;
    let variance = window.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
    variance.sqrt()
}

/// Volatility, not absolute level: a logistic function of the average
/// relative change between consecutive samples.
fn load_factor(window: &[f64]) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for pair in window.windows(2) {
        if pair[0].abs() > f64::EPSILON {
            sum += ((pair[1] - pair[0]) / pair[0]).abs();
            count += 1;
        }
    }
    if count == 0 {
        return 0.0;
    }
    let avg_rel_change = sum / count as f64;
    sigmoid(10.0 * (avg_rel_change - 0.5))
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn estimator() -> LatencyRiskEstimator {
        LatencyRiskEstimator::new(LatencyConfig::default(), Arc::new(ManualClock::epoch()))
    }

    #[tokio::test]
    async fn test_single_sample_short_circuits_to_median() {
        let est = estimator();
        let t = est.record_sample("base", 40.0).await;
        assert_eq!(t.median, 40.0);
        assert_eq!(t.p95, 40.0);
        // Raw median still honors the floor.
        assert_eq!(t.threshold_ms, MIN_THRESHOLD_MS);
    }

    #[tokio::test]
    async fn test_threshold_bounded_for_extreme_inputs() {
        let est = estimator();
        for _ in 0..50 {
            let t = est.record_sample("slow", 1_000_000.0).await;
            assert!(t.threshold_ms <= MAX_THRESHOLD_MS);
            assert!(t.threshold_ms >= MIN_THRESHOLD_MS);
        }
        for _ in 0..50 {
            let t = est.record_sample("fast", 1.0).await;
            assert!(t.threshold_ms >= MIN_THRESHOLD_MS);
            assert!(t.threshold_ms <= MAX_THRESHOLD_MS);
        }
    }

    #[tokio::test]
    async fn test_threshold_bounded_across_random_walk() {
        let est = estimator();
        // Deterministic pseudo-random walk over a wide range.
        let mut x: u64 = 0x2545F4914F6CDD1D;
        for _ in 0..500 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let sample = (x % 5000) as f64 + 1.0;
            let t = est.record_sample("walk", sample).await;
            assert!(
                (MIN_THRESHOLD_MS..=MAX_THRESHOLD_MS).contains(&t.threshold_ms),
                "threshold {} out of bounds",
                t.threshold_ms
            );
        }
    }

    #[tokio::test]
    async fn test_single_spike_does_not_dominate_ema() {
        let est = estimator();
        let samples = [50.0, 52.0, 49.0, 300.0, 51.0, 53.0, 48.0, 50.0, 52.0, 55.0];

        let mut last = None;
        for s in samples {
            let t = est.record_sample("spiky", s).await;
            assert!(
                t.threshold_ms < 150.0,
                "threshold {} crossed 150 after sample {}",
                t.threshold_ms,
                s
            );
            last = Some(t);
        }

        // The p95 does reflect the spike even though the threshold held.
        let last = last.unwrap();
        assert_eq!(last.p95, 300.0);
        assert!(last.std_dev > 50.0);
    }

    #[tokio::test]
    async fn test_window_cap_stays_in_bounds() {
        let est = estimator();
        // Alternate wildly to drive load toward 1.
        for i in 0..400 {
            let s = if i % 2 == 0 { 50.0 } else { 500.0 };
            est.record_sample("volatile", s).await;
        }
        let retained = est.recent_samples("volatile", 2000).await;
        assert!(retained.len() >= 100);
        assert!(retained.len() <= 1000);
        // Full volatility shrinks retention well below the hard cap.
        assert!(retained.len() < 400);
    }

    #[tokio::test]
    async fn test_steady_network_tracks_its_level() {
        let est = estimator();
        let mut t = est.record_sample("steady", 80.0).await;
        for _ in 0..200 {
            t = est.record_sample("steady", 80.0).await;
        }
        // Zero variance, zero load: threshold converges onto the median.
        assert!((t.median - 80.0).abs() < f64::EPSILON);
        assert!((t.threshold_ms - 80.0).abs() < 1.0);
    }

    #[tokio::test]
    async fn test_recent_samples_are_chronological() {
        let est = estimator();
        for s in [1.0, 2.0, 3.0, 4.0] {
            est.record_sample("net", s).await;
        }
        assert_eq!(est.recent_samples("net", 3).await, vec![2.0, 3.0, 4.0]);
        assert!(est.recent_samples("unknown", 3).await.is_empty());
    }
}

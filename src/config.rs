use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Static per-region node entry, loaded at cluster init. Registered nodes are
/// never deleted; they start offline and flip active on a successful probe.
#[derive(Debug, Clone, Deserialize)]
pub struct RegionNodeConfig {
    pub id: String,
    /// Base URL of the node's HTTP surface (health, dispatch, sync)
    pub endpoint: String,
    /// Election priority; lowest wins
    pub priority: u32,
    /// Largest training batch the node advertises
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_max_batch_size() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Static region configuration seeding the node registry
    pub nodes: Vec<RegionNodeConfig>,
    /// Identity of the node this process runs on; model sync only runs when
    /// this node holds the primary role
    pub local_node_id: String,
    /// Nodes at or above this load are ineligible for assignment
    #[serde(default = "default_load_ceiling")]
    pub load_ceiling: f64,
    /// Interval between health probe sweeps (seconds)
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
    /// Interval between model sync sweeps (seconds)
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,
    /// Interval between pending-job assignment retries (seconds)
    #[serde(default = "default_pending_interval")]
    pub pending_sweep_interval_secs: u64,
    /// Timeout for every outbound node call (milliseconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_load_ceiling() -> f64 {
    0.8
}

fn default_health_interval() -> u64 {
    30
}

fn default_sync_interval() -> u64 {
    300
}

fn default_pending_interval() -> u64 {
    15
}

fn default_probe_timeout() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingConfig {
    /// Maximum epochs per job
    pub max_epochs: u32,
    /// Scenarios per training batch
    pub batch_size: usize,
    /// Fraction of scenarios held out for validation
    pub validation_fraction: f64,
    /// Circuit breaker: halt when the safety score falls below this
    pub min_safety_score: f64,
    /// Circuit breaker: halt when the gradient norm rises above this
    pub max_gradient_norm: f64,
    /// Write a checkpoint every Kth epoch
    pub checkpoint_every_epochs: u32,
    /// Retain only the most recent M checkpoints
    pub max_checkpoints: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_epochs: 50,
            batch_size: 32,
            validation_fraction: 0.2,
            min_safety_score: 0.6,
            max_gradient_norm: 10.0,
            checkpoint_every_epochs: 5,
            max_checkpoints: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    /// Multiplier on the standard deviation inside the noise margin
    pub security_factor: f64,
    /// Shapes the adaptive retention window, in [0, 1]
    pub safety_factor: f64,
    /// Samples entering each statistics pass (median, p95, variance)
    pub stats_window: usize,
    /// Hard cap on retained samples per network
    pub max_samples: usize,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            security_factor: 0.5,
            safety_factor: 0.9,
            stats_window: 100,
            max_samples: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// Short moving-average window (samples)
    pub short_window: usize,
    /// Medium moving-average window (samples)
    pub medium_window: usize,
    /// Long moving-average window (samples)
    pub long_window: usize,
    /// Recent-window base average for the prediction
    pub base_window: usize,
    /// Floor on every latency prediction (milliseconds)
    pub min_latency_ms: f64,
    /// Evaluate routes but never forward them to the executor
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            short_window: 5,
            medium_window: 20,
            long_window: 60,
            base_window: 10,
            min_latency_ms: 50.0,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MESHGATE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (MESHGATE_CLUSTER__LOAD_CEILING, etc.)
            .add_source(
                Environment::with_prefix("MESHGATE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.cluster.nodes.is_empty() {
            errors.push("cluster.nodes must list at least one node".to_string());
        }

        if !(0.0..=1.0).contains(&self.cluster.load_ceiling) {
            errors.push("load_ceiling must be between 0 and 1".to_string());
        }

        if !self
            .cluster
            .nodes
            .iter()
            .any(|n| n.id == self.cluster.local_node_id)
        {
            errors.push(format!(
                "local_node_id {} is not in cluster.nodes",
                self.cluster.local_node_id
            ));
        }

        if !(0.0..1.0).contains(&self.training.validation_fraction) {
            errors.push("validation_fraction must be in [0, 1)".to_string());
        }

        if self.training.max_epochs == 0 {
            errors.push("max_epochs must be positive".to_string());
        }

        if self.training.checkpoint_every_epochs == 0 {
            errors.push("checkpoint_every_epochs must be positive".to_string());
        }

        if !(0.0..=1.0).contains(&self.latency.safety_factor) {
            errors.push("safety_factor must be between 0 and 1".to_string());
        }

        if self.latency.security_factor < 0.0 {
            errors.push("security_factor must be non-negative".to_string());
        }

        if self.gate.short_window == 0
            || self.gate.short_window > self.gate.medium_window
            || self.gate.medium_window > self.gate.long_window
        {
            errors.push("gate windows must satisfy 0 < short <= medium <= long".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AppConfig {
        AppConfig {
            cluster: ClusterConfig {
                nodes: vec![RegionNodeConfig {
                    id: "node-a".to_string(),
                    endpoint: "http://127.0.0.1:7070".to_string(),
                    priority: 1,
                    max_batch_size: 64,
                }],
                local_node_id: "node-a".to_string(),
                load_ceiling: 0.8,
                health_interval_secs: 30,
                sync_interval_secs: 300,
                pending_sweep_interval_secs: 15,
                probe_timeout_ms: 2000,
            },
            training: TrainingConfig::default(),
            latency: LatencyConfig::default(),
            gate: GateConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_unknown_local_node_rejected() {
        let mut config = sample_config();
        config.cluster.local_node_id = "node-z".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("local_node_id")));
    }

    #[test]
    fn test_load_ceiling_bounds() {
        let mut config = sample_config();
        config.cluster.load_ceiling = 1.5;
        assert!(config.validate().is_err());
    }
}

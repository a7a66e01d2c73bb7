//! Node registry records and wire types

use crate::config::RegionNodeConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not reachable; ineligible for assignment and election
    Offline,
    /// Last probe succeeded
    Active,
}

impl NodeStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, NodeStatus::Active)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Offline => write!(f, "offline"),
            NodeStatus::Active => write!(f, "active"),
        }
    }
}

/// Capacity advertised by a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeCapacity {
    /// Largest training batch the node accepts
    pub max_batch_size: usize,
    /// Fraction of capacity currently in use, in [0, 1]
    pub current_load: f64,
}

/// A worker node tracked by the orchestrator. Created from static region
/// configuration at cluster init and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    /// Base URL of the node's HTTP surface
    pub endpoint: String,
    pub status: NodeStatus,
    /// Election priority; lowest wins
    pub priority: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub capacity: NodeCapacity,
}

impl Node {
    /// Build the initial (offline) registry record for a configured node.
    pub fn from_region(config: &RegionNodeConfig) -> Self {
        Self {
            id: config.id.clone(),
            endpoint: config.endpoint.clone(),
            status: NodeStatus::Offline,
            priority: config.priority,
            last_heartbeat: None,
            capacity: NodeCapacity {
                max_batch_size: config.max_batch_size,
                current_load: 0.0,
            },
        }
    }
}

/// Payload returned by a node's health endpoint.
///
/// Both fields are required: a missing field fails deserialization and the
/// probe is treated as failed (fail-closed, not defaulted).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeHealthReport {
    /// Current load fraction, in [0, 1]
    pub load: f64,
    /// Resident memory estimate in bytes
    pub memory: f64,
}

/// Model sync payload pushed by the primary to every active node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSync {
    pub version: u64,
    pub timestamp: DateTime<Utc>,
}

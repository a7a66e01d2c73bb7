//! Training job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single training scenario, produced by the synthesizer or harvested from
/// executed route outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub features: Vec<f64>,
    pub label: f64,
}

/// Lifecycle status of a training job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for an eligible node
    Pending,
    /// Assigned and dispatched
    Running,
    /// Finished, possibly with a partial epoch count after a breaker halt
    Completed,
    /// An unrecoverable error occurred during training
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Caller-supplied context carried on a job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A scenario-model training job tracked in the orchestrator's job table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: String,
    pub scenarios: Vec<Scenario>,
    pub model_version: u64,
    pub status: JobStatus,
    pub assigned_node: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub metadata: JobMetadata,
}

impl TrainingJob {
    pub fn new(scenarios: Vec<Scenario>, model_version: u64, metadata: JobMetadata) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scenarios,
            model_version,
            status: JobStatus::Pending,
            assigned_node: None,
            started_at: None,
            metadata,
        }
    }

    /// Reset for reassignment after a node failure. Training restarts from
    /// epoch zero on the next node; partial progress is discarded.
    pub fn reset_assignment(&mut self) {
        self.status = JobStatus::Pending;
        self.assigned_node = None;
        self.started_at = None;
    }
}

/// Wire descriptor POSTed to a node's dispatch endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub scenarios: Vec<Scenario>,
    pub model_version: u64,
    pub status: JobStatus,
}

impl From<&TrainingJob> for JobDescriptor {
    fn from(job: &TrainingJob) -> Self {
        Self {
            id: job.id.clone(),
            scenarios: job.scenarios.clone(),
            model_version: job.model_version,
            status: job.status,
        }
    }
}

/// Completion report a worker writes back through the coordination store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: String,
    pub node_id: String,
    pub status: JobStatus,
    pub epochs_run: u32,
    /// Human-readable breaker description when training halted early
    pub halted: Option<String>,
    pub finished_at: DateTime<Utc>,
}

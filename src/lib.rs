pub mod clock;
pub mod cluster;
pub mod config;
pub mod error;
pub mod latency;
pub mod training;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cluster::{
    CoordinationStore, HttpNodeClient, MemoryStore, ModelSync, Node, NodeClient, NodeHealthReport,
    NodeStatus, Orchestrator,
};
pub use config::AppConfig;
pub use error::{MeshgateError, Result};
pub use latency::{ChainThreshold, GateDecision, LatencyRiskEstimator, OpportunityGate, Route, RouteExecutor};
pub use training::{
    Checkpoint, DigestValidator, InProcessSynthesizer, JobStatus, SafetyValidator, Scenario,
    ScenarioSynthesizer, TrainingJob, TrainingWorker,
};

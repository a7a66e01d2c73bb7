//! Training layer
//!
//! Job records, the per-node training worker with its safety circuit
//! breakers, bounded checkpoint retention, the node HTTP surface, and the
//! opaque model/validator collaborator traits.

pub mod checkpoint;
pub mod job;
pub mod safety;
pub mod server;
pub mod synthesizer;
pub mod worker;

pub use checkpoint::{Checkpoint, CheckpointRing, TrainingMetrics};
pub use job::{JobDescriptor, JobMetadata, JobReport, JobStatus, Scenario, TrainingJob};
pub use safety::{DigestValidator, SafetyReport, SafetyValidator};
pub use server::{serve, NodeServerState};
pub use synthesizer::{InProcessSynthesizer, ModelState, ScenarioSynthesizer};
pub use worker::{HaltReason, JobOutcome, TrainingWorker, WorkerStatus};

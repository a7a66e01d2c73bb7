//! Cluster coordination layer
//!
//! Node registry, outbound node transport, the shared coordination store,
//! and the orchestrator that ties them together:
//! - Priority-ordered primary election (leader-by-priority, not consensus)
//! - Job assignment with failure recovery by reassignment
//! - Periodic health, model-sync, and pending-job loops

pub mod client;
pub mod node;
pub mod orchestrator;
pub mod store;

pub use client::{HttpNodeClient, NodeClient};
pub use node::{ModelSync, Node, NodeCapacity, NodeHealthReport, NodeStatus};
pub use orchestrator::Orchestrator;
pub use store::{CoordinationStore, MemoryStore};

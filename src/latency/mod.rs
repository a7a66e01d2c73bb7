//! Latency-risk layer
//!
//! Per-network adaptive threshold estimation and the opportunity gate that
//! admits or rejects candidate two-network routes against it.

pub mod estimator;
pub mod gate;

pub use estimator::{ChainThreshold, LatencyRiskEstimator, MAX_THRESHOLD_MS, MIN_THRESHOLD_MS};
pub use gate::{GateDecision, OpportunityGate, Route, RouteExecutor};

//! Worker node HTTP surface
//!
//! Thin shim over [`TrainingWorker`] exposing the three endpoints the
//! orchestrator calls: health probe, job dispatch, and model sync. All
//! behavior contracts live in the worker itself.

use crate::cluster::node::{ModelSync, NodeHealthReport};
use crate::error::Result;
use crate::training::job::JobDescriptor;
use crate::training::worker::TrainingWorker;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Clone)]
pub struct NodeServerState {
    worker: Arc<TrainingWorker>,
    /// Last model sync received from the primary
    model: Arc<RwLock<Option<ModelSync>>>,
}

impl NodeServerState {
    pub fn new(worker: Arc<TrainingWorker>) -> Self {
        Self {
            worker,
            model: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn last_sync(&self) -> Option<ModelSync> {
        self.model.read().await.clone()
    }
}

pub fn router(state: NodeServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(dispatch))
        .route("/model/sync", post(model_sync))
        .with_state(state)
}

/// Bind and serve the node surface until the process exits.
pub async fn serve(addr: SocketAddr, state: NodeServerState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("node {} listening on {}", state.worker.node_id(), addr);
    axum::serve(listener, router(state))
        .await
        .map_err(crate::error::MeshgateError::Io)?;
    Ok(())
}

async fn health(State(state): State<NodeServerState>) -> Json<NodeHealthReport> {
    Json(NodeHealthReport {
        load: state.worker.current_load(),
        memory: memory_estimate(),
    })
}

async fn dispatch(
    State(state): State<NodeServerState>,
    Json(job): Json<JobDescriptor>,
) -> (StatusCode, Json<Value>) {
    if state.worker.is_busy() {
        let status = state.worker.status().await;
        let running = status
            .current_job
            .map(|j| j.id)
            .unwrap_or_else(|| "unknown".to_string());
        return (
            StatusCode::CONFLICT,
            Json(json!({ "accepted": false, "running": running })),
        );
    }

    let job_id = job.id.clone();
    let worker = state.worker.clone();
    tokio::spawn(async move {
        // Outcome flows back to the orchestrator through the store.
        if let Err(e) = worker.handle_training_job(job).await {
            warn!("dispatched job failed: {}", e);
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "job_id": job_id })),
    )
}

async fn model_sync(
    State(state): State<NodeServerState>,
    Json(sync): Json<ModelSync>,
) -> StatusCode {
    info!(
        "node {} received model v{} from primary",
        state.worker.node_id(),
        sync.version
    );
    *state.model.write().await = Some(sync);
    StatusCode::OK
}

fn memory_estimate() -> f64 {
    // Coarse RSS gauge; good enough for the orchestrator's load view.
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<f64>().ok())
            {
                return pages * 4096.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TrainingConfig;
    use crate::training::safety::DigestValidator;
    use crate::training::synthesizer::InProcessSynthesizer;

    fn state() -> NodeServerState {
        let worker = Arc::new(TrainingWorker::new(
            "node-a",
            TrainingConfig::default(),
            Arc::new(InProcessSynthesizer::default()),
            Arc::new(DigestValidator::default()),
            Arc::new(ManualClock::epoch()),
            None,
        ));
        NodeServerState::new(worker)
    }

    #[tokio::test]
    async fn test_health_reports_both_fields() {
        let state = state();
        let Json(report) = health(State(state)).await;
        assert_eq!(report.load, 0.0);
        assert!(report.memory >= 0.0);
    }

    #[tokio::test]
    async fn test_model_sync_is_recorded() {
        let state = state();
        let sync = ModelSync {
            version: 9,
            timestamp: chrono::Utc::now(),
        };
        let code = model_sync(State(state.clone()), Json(sync.clone())).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(state.last_sync().await, Some(sync));
    }
}

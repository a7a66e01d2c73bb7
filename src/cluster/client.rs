//! Outbound transport to worker node endpoints
//!
//! All calls carry a bounded timeout; a timeout is treated identically to a
//! non-success response. Health-check and dispatch logic depend only on the
//! `NodeClient` trait so they can be tested without real transport.

use crate::cluster::node::{ModelSync, Node, NodeHealthReport};
use crate::error::{MeshgateError, Result};
use crate::training::job::JobDescriptor;
use async_trait::async_trait;
use std::time::Duration;

/// Transport capability against a node's HTTP surface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Probe the node's health endpoint. Any transport failure, timeout, or
    /// malformed payload is an error (fail-closed).
    async fn probe_health(&self, node: &Node) -> Result<NodeHealthReport>;

    /// POST the job descriptor to the node's dispatch endpoint.
    async fn dispatch_job(&self, node: &Node, job: &JobDescriptor) -> Result<()>;

    /// Push the current model version to the node.
    async fn push_model(&self, node: &Node, sync: &ModelSync) -> Result<()>;
}

/// HTTP client for node endpoints.
pub struct HttpNodeClient {
    http: reqwest::Client,
}

impl HttpNodeClient {
    pub fn new(timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self { http })
    }

    fn url(node: &Node, path: &str) -> String {
        format!("{}/{}", node.endpoint.trim_end_matches('/'), path)
    }

    fn transport_err(node: &Node, reason: impl std::fmt::Display) -> MeshgateError {
        MeshgateError::NodeTransport {
            node_id: node.id.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn probe_health(&self, node: &Node) -> Result<NodeHealthReport> {
        let response = self
            .http
            .get(Self::url(node, "health"))
            .send()
            .await
            .map_err(|e| Self::transport_err(node, e))?
            .error_for_status()
            .map_err(|e| Self::transport_err(node, e))?;

        // Missing fields fail deserialization here - fail-closed, not defaulted.
        let report: NodeHealthReport = response
            .json()
            .await
            .map_err(|e| Self::transport_err(node, format!("malformed health payload: {e}")))?;

        if !(0.0..=1.0).contains(&report.load) {
            return Err(Self::transport_err(
                node,
                format!("health load {} outside [0, 1]", report.load),
            ));
        }

        Ok(report)
    }

    async fn dispatch_job(&self, node: &Node, job: &JobDescriptor) -> Result<()> {
        self.http
            .post(Self::url(node, "jobs"))
            .json(job)
            .send()
            .await
            .map_err(|e| Self::transport_err(node, e))?
            .error_for_status()
            .map_err(|e| Self::transport_err(node, e))?;
        Ok(())
    }

    async fn push_model(&self, node: &Node, sync: &ModelSync) -> Result<()> {
        self.http
            .post(Self::url(node, "model/sync"))
            .json(sync)
            .send()
            .await
            .map_err(|e| Self::transport_err(node, e))?
            .error_for_status()
            .map_err(|e| Self::transport_err(node, e))?;
        Ok(())
    }
}

use thiserror::Error;

/// Main error type for the coordinator
#[derive(Error, Debug)]
pub enum MeshgateError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Failed probe, dispatch, or sync against a node endpoint. Self-healed
    /// through reassignment; never surfaced to job submitters.
    #[error("Node transport error ({node_id}): {reason}")]
    NodeTransport { node_id: String, reason: String },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Coordination errors
    #[error("No eligible node for job {0}")]
    CapacityExhausted(String),

    #[error("Primary election failed: no active nodes")]
    ElectionFailed,

    #[error("Node {node_id} is already running job {running}")]
    JobConflict { node_id: String, running: String },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown job: {0}")]
    UnknownJob(String),

    // Validation errors
    #[error("Validation rejected: {0}")]
    ValidationRejected(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl MeshgateError {
    /// Transport errors are recoverable through node reassignment; everything
    /// else propagates to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MeshgateError::NodeTransport { .. } | MeshgateError::Http(_)
        )
    }
}

/// Result type alias for MeshgateError
pub type Result<T> = std::result::Result<T, MeshgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        let e = MeshgateError::NodeTransport {
            node_id: "node-a".to_string(),
            reason: "timeout".to_string(),
        };
        assert!(e.is_transient());
        assert!(!MeshgateError::ElectionFailed.is_transient());
        assert!(!MeshgateError::CapacityExhausted("job-1".to_string()).is_transient());
    }
}

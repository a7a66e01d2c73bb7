//! Shared coordination store
//!
//! Last-writer-wins key-value/hash semantics with per-key atomicity only. No
//! multi-key transactions are assumed; readers tolerate up to one scheduling
//! tick of staleness. Nodes never talk to each other directly - job status
//! and checkpoints flow between workers and the orchestrator through here.

use crate::error::{MeshgateError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Well-known store keys
pub mod keys {
    pub const NODES: &str = "cluster/nodes";
    pub const JOBS: &str = "cluster/jobs";
    pub const JOBS_ARCHIVED: &str = "cluster/jobs_archived";
    pub const JOB_REPORTS: &str = "cluster/job_reports";
    pub const PRIMARY: &str = "cluster/primary";
    pub const MODEL_VERSION: &str = "cluster/model_version";
    pub const CHECKPOINTS: &str = "cluster/checkpoints";
}

/// Coordination store capability.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn hash_set(&self, key: &str, field: &str, value: Value) -> Result<()>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Value>>;
    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Value)>>;
    async fn hash_delete(&self, key: &str, field: &str) -> Result<()>;
}

/// Serialize a record into a hash field.
pub async fn put_record<T: Serialize>(
    store: &dyn CoordinationStore,
    key: &str,
    field: &str,
    record: &T,
) -> Result<()> {
    let value = serde_json::to_value(record)?;
    store.hash_set(key, field, value).await
}

/// Read a record back out of a hash field.
pub async fn get_record<T: DeserializeOwned>(
    store: &dyn CoordinationStore,
    key: &str,
    field: &str,
) -> Result<Option<T>> {
    match store.hash_get(key, field).await? {
        Some(value) => {
            let record = serde_json::from_value(value)
                .map_err(|e| MeshgateError::Store(format!("corrupt record {key}/{field}: {e}")))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

/// In-memory store backed by sharded concurrent maps.
///
/// Per-entry operations are atomic; cross-key consistency is explicitly not
/// provided, matching the contract above.
#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
    hashes: DashMap<String, DashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn hash_set(&self, key: &str, field: &str, value: Value) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Value>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).map(|v| v.clone())))
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, Value)>> {
        Ok(self
            .hashes
            .get(key)
            .map(|h| {
                h.iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<()> {
        if let Some(hash) = self.hashes.get(key) {
            hash.remove(field);
        }
        Ok(())
    }
}

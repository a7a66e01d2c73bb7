//! Cluster orchestrator
//!
//! Owns the node registry and the job table, elects the primary, assigns
//! jobs to workers, and runs the periodic health, model-sync, and pending-job
//! loops. Leader election is priority-ordered, not consensus: the lowest
//! configured priority among active nodes wins, and behavior under network
//! partition is explicitly out of contract.
//!
//! Every loop follows the same shape: `start()` spawns a non-reentrant
//! interval task guarded by a running flag, and the tick body is a public
//! `run_*_cycle` method so tests can drive cycles without wall-clock waits.

use crate::clock::Clock;
use crate::cluster::client::NodeClient;
use crate::cluster::node::{ModelSync, Node, NodeStatus};
use crate::cluster::store::{self, keys, CoordinationStore};
use crate::config::ClusterConfig;
use crate::error::{MeshgateError, Result};
use crate::training::job::{JobDescriptor, JobMetadata, JobReport, JobStatus, Scenario, TrainingJob};
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct Orchestrator {
    config: ClusterConfig,
    client: Arc<dyn NodeClient>,
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    /// Registry iteration order is node id, which makes tie-breaks and
    /// election deterministic.
    nodes: RwLock<BTreeMap<String, Node>>,
    jobs: RwLock<BTreeMap<String, TrainingJob>>,
    primary: RwLock<Option<String>>,
    model_version: AtomicU64,
    running: Arc<AtomicBool>,
    /// Serializes job assignment so a job is never placed on two nodes.
    assign_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        config: ClusterConfig,
        client: Arc<dyn NodeClient>,
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            client,
            store,
            clock,
            nodes: RwLock::new(BTreeMap::new()),
            jobs: RwLock::new(BTreeMap::new()),
            primary: RwLock::new(None),
            model_version: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(false)),
            assign_lock: Mutex::new(()),
        }
    }

    /// Seed the registry from the static region configuration. Every node
    /// starts offline until its first successful probe.
    pub async fn bootstrap(&self) -> Result<()> {
        let regions = self.config.nodes.clone();
        for region in &regions {
            self.register_node(Node::from_region(region)).await?;
        }
        info!("registered {} nodes from region config", regions.len());
        Ok(())
    }

    pub async fn register_node(&self, node: Node) -> Result<()> {
        store::put_record(self.store.as_ref(), keys::NODES, &node.id, &node).await?;
        debug!("registered node {} ({})", node.id, node.endpoint);
        self.nodes.write().await.insert(node.id.clone(), node);
        Ok(())
    }

    /// Create a training job and attempt immediate assignment. An empty
    /// scenario set is rejected outright; a capacity-starved job stays
    /// pending and is retried by the pending sweep.
    pub async fn submit_training_job(
        &self,
        scenarios: Vec<Scenario>,
        metadata: JobMetadata,
    ) -> Result<String> {
        if scenarios.is_empty() {
            warn!("rejected training job submission with no scenarios");
            return Err(MeshgateError::ValidationRejected(
                "empty scenario set".to_string(),
            ));
        }

        let job = TrainingJob::new(scenarios, self.model_version.load(Ordering::SeqCst), metadata);
        let job_id = job.id.clone();
        store::put_record(self.store.as_ref(), keys::JOBS, &job_id, &job).await?;
        self.jobs.write().await.insert(job_id.clone(), job);
        info!("submitted training job {}", job_id);

        match self.assign_job(&job_id).await {
            Ok(()) => {}
            Err(MeshgateError::CapacityExhausted(_)) => {
                info!("job {} pending: no eligible node", job_id);
            }
            Err(e) => return Err(e),
        }
        Ok(job_id)
    }

    /// Place a pending job on the least-loaded eligible node and dispatch it.
    /// A dispatch failure is transient: the node is failed over and the job
    /// re-enters assignment.
    pub(crate) async fn assign_job(&self, job_id: &str) -> Result<()> {
        let dispatched = {
            let _guard = self.assign_lock.lock().await;

            let job = {
                let jobs = self.jobs.read().await;
                jobs.get(job_id)
                    .cloned()
                    .ok_or_else(|| MeshgateError::UnknownJob(job_id.to_string()))?
            };

            // Only pending, unassigned jobs are placeable; a concurrent
            // attempt that lost the race sees the job already claimed.
            if job.status != JobStatus::Pending || job.assigned_node.is_some() {
                return Ok(());
            }

            let candidate = {
                let nodes = self.nodes.read().await;
                let mut best: Option<Node> = None;
                for node in nodes.values() {
                    if !node.status.is_active()
                        || node.capacity.current_load >= self.config.load_ceiling
                    {
                        continue;
                    }
                    // Strict less keeps the first of any tie.
                    match &best {
                        Some(b) if node.capacity.current_load >= b.capacity.current_load => {}
                        _ => best = Some(node.clone()),
                    }
                }
                best
            };

            let Some(node) = candidate else {
                return Err(MeshgateError::CapacityExhausted(job_id.to_string()));
            };

            let descriptor = {
                let mut jobs = self.jobs.write().await;
                let job = jobs
                    .get_mut(job_id)
                    .ok_or_else(|| MeshgateError::UnknownJob(job_id.to_string()))?;
                job.status = JobStatus::Running;
                job.assigned_node = Some(node.id.clone());
                job.started_at = Some(self.clock.now());
                store::put_record(self.store.as_ref(), keys::JOBS, job_id, job).await?;
                JobDescriptor::from(&*job)
            };

            info!(
                "assigned job {} to node {} (load {:.2})",
                job_id, node.id, node.capacity.current_load
            );
            (node, descriptor)
        };

        let (node, descriptor) = dispatched;
        if let Err(e) = self.client.dispatch_job(&node, &descriptor).await {
            warn!("dispatch of job {} to node {} failed: {}", job_id, node.id, e);
            self.handle_node_failure(&node.id).await?;
        }
        Ok(())
    }

    /// Fail a node over: mark it offline, return its in-flight jobs to the
    /// pending state, retry their assignment, and re-elect if the node held
    /// the primary role.
    pub async fn handle_node_failure(&self, node_id: &str) -> Result<()> {
        {
            let mut nodes = self.nodes.write().await;
            let Some(node) = nodes.get_mut(node_id) else {
                return Err(MeshgateError::UnknownNode(node_id.to_string()));
            };
            if node.status != NodeStatus::Offline {
                warn!("node {} marked offline", node_id);
            }
            node.status = NodeStatus::Offline;
            store::put_record(self.store.as_ref(), keys::NODES, node_id, node).await?;
        }

        let in_flight: Vec<String> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|j| j.status == JobStatus::Running && j.assigned_node.as_deref() == Some(node_id))
                .map(|j| j.id.clone())
                .collect()
        };

        for job_id in in_flight {
            {
                let mut jobs = self.jobs.write().await;
                if let Some(job) = jobs.get_mut(&job_id) {
                    job.reset_assignment();
                    store::put_record(self.store.as_ref(), keys::JOBS, &job_id, job).await?;
                }
            }
            info!("job {} reset to pending after node {} failure", job_id, node_id);

            match Box::pin(self.assign_job(&job_id)).await {
                Ok(()) => {}
                Err(MeshgateError::CapacityExhausted(_)) => {
                    info!("job {} stays pending: no eligible node", job_id);
                }
                Err(e) => warn!("reassignment of job {} failed: {}", job_id, e),
            }
        }

        let was_primary = self.primary.read().await.as_deref() == Some(node_id);
        if was_primary {
            *self.primary.write().await = None;
            match self.elect_primary().await {
                Ok(primary) => info!("primary failed over to {}", primary),
                Err(e) => warn!("{e}; sync loop idle until a node activates"),
            }
        }
        Ok(())
    }

    /// Priority-ordered election among active nodes. Re-running on an
    /// unchanged active set returns the same node.
    pub async fn elect_primary(&self) -> Result<String> {
        let elected = {
            let nodes = self.nodes.read().await;
            let mut active: Vec<&Node> = nodes.values().filter(|n| n.status.is_active()).collect();
            active.sort_by_key(|n| n.priority);
            active.first().map(|n| n.id.clone())
        };

        let Some(primary) = elected else {
            *self.primary.write().await = None;
            return Err(MeshgateError::ElectionFailed);
        };

        let changed = {
            let mut current = self.primary.write().await;
            let changed = current.as_deref() != Some(primary.as_str());
            *current = Some(primary.clone());
            changed
        };
        self.store.set(keys::PRIMARY, json!(primary)).await?;
        if changed {
            info!("elected primary {}", primary);
        }
        Ok(primary)
    }

    /// One health sweep: probe every known node, refresh the registry from
    /// well-formed responses, and fail everything else over. Also reconciles
    /// worker job reports from the store.
    pub async fn run_health_cycle(&self) {
        let targets: Vec<Node> = self.nodes.read().await.values().cloned().collect();

        for node in targets {
            match self.client.probe_health(&node).await {
                Ok(report) => {
                    let mut nodes = self.nodes.write().await;
                    if let Some(entry) = nodes.get_mut(&node.id) {
                        if entry.status == NodeStatus::Offline {
                            info!("node {} came online (load {:.2})", entry.id, report.load);
                        }
                        entry.status = NodeStatus::Active;
                        entry.last_heartbeat = Some(self.clock.now());
                        entry.capacity.current_load = report.load;
                        if let Err(e) =
                            store::put_record(self.store.as_ref(), keys::NODES, &entry.id, entry)
                                .await
                        {
                            warn!("failed to persist node {}: {}", entry.id, e);
                        }
                    }
                }
                Err(e) => {
                    // Fail-closed: a timeout or malformed payload is the same
                    // as a refusal.
                    debug!("probe of node {} failed: {}", node.id, e);
                    if let Err(e) = self.handle_node_failure(&node.id).await {
                        warn!("failure handling for node {} errored: {}", node.id, e);
                    }
                }
            }
        }

        if let Err(e) = self.reconcile_job_reports().await {
            warn!("job report reconciliation failed: {}", e);
        }
    }

    /// Apply worker completion reports from the store: terminal jobs are
    /// archived out of the active table.
    async fn reconcile_job_reports(&self) -> Result<()> {
        let reports = self.store.hash_get_all(keys::JOB_REPORTS).await?;
        for (job_id, value) in reports {
            let report: JobReport = match serde_json::from_value(value) {
                Ok(r) => r,
                Err(e) => {
                    warn!("dropping corrupt job report {}: {}", job_id, e);
                    self.store.hash_delete(keys::JOB_REPORTS, &job_id).await?;
                    continue;
                }
            };

            if !report.status.is_terminal() {
                continue;
            }

            let archived = {
                let mut jobs = self.jobs.write().await;
                jobs.remove(&job_id).map(|mut job| {
                    job.status = report.status;
                    job
                })
            };

            if let Some(job) = archived {
                info!(
                    "job {} finished on node {} as {} ({} epochs)",
                    job_id, report.node_id, report.status, report.epochs_run
                );
                store::put_record(self.store.as_ref(), keys::JOBS_ARCHIVED, &job_id, &job).await?;
                self.store.hash_delete(keys::JOBS, &job_id).await?;
            }
            self.store.hash_delete(keys::JOB_REPORTS, &job_id).await?;
        }
        Ok(())
    }

    /// One model-sync sweep. Runs only when the local node holds the primary
    /// role; per-node failures are logged and never abort the sweep.
    pub async fn run_sync_cycle(&self) {
        let primary = self.primary.read().await.clone();
        match primary {
            None => {
                debug!("no primary elected; skipping model sync");
                return;
            }
            Some(p) if p != self.config.local_node_id => {
                debug!("node {} is not primary; skipping model sync", self.config.local_node_id);
                return;
            }
            Some(_) => {}
        }

        let sync = ModelSync {
            version: self.model_version.load(Ordering::SeqCst),
            timestamp: self.clock.now(),
        };
        let active: Vec<Node> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|n| n.status.is_active())
            .cloned()
            .collect();

        debug!("pushing model v{} to {} active nodes", sync.version, active.len());
        let results = join_all(active.iter().map(|n| self.client.push_model(n, &sync))).await;
        for (node, result) in active.iter().zip(results) {
            if let Err(e) = result {
                warn!("model sync to node {} failed: {}", node.id, e);
            }
        }

        if let Err(e) = self.store.set(keys::MODEL_VERSION, json!(sync.version)).await {
            warn!("failed to persist model version: {}", e);
        }
    }

    /// One pending-job sweep: retry assignment for capacity-starved jobs.
    pub async fn run_pending_cycle(&self) {
        let pending: Vec<String> = {
            let jobs = self.jobs.read().await;
            jobs.values()
                .filter(|j| j.status == JobStatus::Pending && j.assigned_node.is_none())
                .map(|j| j.id.clone())
                .collect()
        };

        for job_id in pending {
            match self.assign_job(&job_id).await {
                Ok(()) => {}
                Err(MeshgateError::CapacityExhausted(_)) => {
                    debug!("job {} still pending", job_id)
                }
                Err(e) => warn!("pending sweep failed to assign job {}: {}", job_id, e),
            }
        }
    }

    /// Spawn the three periodic loops. Each tick completes before the next
    /// fires; `stop()` ends all of them.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("orchestrator loops already running");
            return;
        }
        info!(
            "starting orchestrator loops (health {}s, sync {}s, pending {}s)",
            self.config.health_interval_secs,
            self.config.sync_interval_secs,
            self.config.pending_sweep_interval_secs
        );

        self.spawn_loop(self.config.health_interval_secs, |this| async move {
            this.run_health_cycle().await;
        });
        self.spawn_loop(self.config.sync_interval_secs, |this| async move {
            this.run_sync_cycle().await;
        });
        self.spawn_loop(self.config.pending_sweep_interval_secs, |this| async move {
            this.run_pending_cycle().await;
        });
    }

    fn spawn_loop<F, Fut>(self: &Arc<Self>, interval_secs: u64, tick: F)
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let this = Arc::clone(self);
        let running = this.running.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                tick(Arc::clone(&this)).await;
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("orchestrator loops stopping");
    }

    pub async fn job(&self, job_id: &str) -> Option<TrainingJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    pub async fn node(&self, node_id: &str) -> Option<Node> {
        self.nodes.read().await.get(node_id).cloned()
    }

    pub async fn primary(&self) -> Option<String> {
        self.primary.read().await.clone()
    }

    pub fn model_version(&self) -> u64 {
        self.model_version.load(Ordering::SeqCst)
    }

    /// Record a newly published model version for the next sync sweep.
    pub fn set_model_version(&self, version: u64) {
        self.model_version.store(version, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cluster::client::MockNodeClient;
    use crate::cluster::node::NodeHealthReport;
    use crate::cluster::store::MemoryStore;
    use crate::config::RegionNodeConfig;

    fn cluster_config(priorities: &[(&str, u32)]) -> ClusterConfig {
        ClusterConfig {
            nodes: priorities
                .iter()
                .map(|(id, priority)| RegionNodeConfig {
                    id: id.to_string(),
                    endpoint: format!("http://{id}.cluster:7070"),
                    priority: *priority,
                    max_batch_size: 64,
                })
                .collect(),
            local_node_id: priorities[0].0.to_string(),
            load_ceiling: 0.8,
            health_interval_secs: 30,
            sync_interval_secs: 300,
            pending_sweep_interval_secs: 15,
            probe_timeout_ms: 2000,
        }
    }

    async fn orchestrator_with(
        config: ClusterConfig,
        client: MockNodeClient,
    ) -> Arc<Orchestrator> {
        let orchestrator = Arc::new(Orchestrator::new(
            config,
            Arc::new(client),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::epoch()),
        ));
        orchestrator.bootstrap().await.unwrap();
        orchestrator
    }

    async fn activate(orchestrator: &Orchestrator, node_id: &str, load: f64) {
        let mut nodes = orchestrator.nodes.write().await;
        let node = nodes.get_mut(node_id).unwrap();
        node.status = NodeStatus::Active;
        node.capacity.current_load = load;
    }

    fn scenarios(n: usize) -> Vec<Scenario> {
        (0..n)
            .map(|i| Scenario {
                features: vec![i as f64],
                label: 0.0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_elect_primary_picks_lowest_priority() {
        let config = cluster_config(&[("node-a", 2), ("node-b", 1), ("node-c", 3)]);
        let orchestrator = orchestrator_with(config, MockNodeClient::new()).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.1).await;
        activate(&orchestrator, "node-c", 0.1).await;

        let primary = orchestrator.elect_primary().await.unwrap();
        assert_eq!(primary, "node-b");
    }

    #[tokio::test]
    async fn test_elect_primary_is_idempotent() {
        let config = cluster_config(&[("node-a", 2), ("node-b", 1)]);
        let orchestrator = orchestrator_with(config, MockNodeClient::new()).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.1).await;

        let first = orchestrator.elect_primary().await.unwrap();
        let second = orchestrator.elect_primary().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(orchestrator.primary().await, Some(first));
    }

    #[tokio::test]
    async fn test_elect_primary_fails_with_no_active_nodes() {
        let config = cluster_config(&[("node-a", 1)]);
        let orchestrator = orchestrator_with(config, MockNodeClient::new()).await;

        let err = orchestrator.elect_primary().await.unwrap_err();
        assert!(matches!(err, MeshgateError::ElectionFailed));
        assert_eq!(orchestrator.primary().await, None);
    }

    #[tokio::test]
    async fn test_empty_scenarios_rejected() {
        let config = cluster_config(&[("node-a", 1)]);
        let orchestrator = orchestrator_with(config, MockNodeClient::new()).await;

        let err = orchestrator
            .submit_training_job(vec![], JobMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshgateError::ValidationRejected(_)));
    }

    #[tokio::test]
    async fn test_submit_with_all_nodes_over_ceiling_stays_pending() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2), ("node-c", 3)]);
        let mut client = MockNodeClient::new();
        // The whole point: no dispatch call may happen.
        client.expect_dispatch_job().times(0);

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.9).await;
        activate(&orchestrator, "node-b", 0.9).await;
        activate(&orchestrator, "node-c", 0.9).await;

        let job_id = orchestrator
            .submit_training_job(scenarios(3), JobMetadata::default())
            .await
            .unwrap();

        let job = orchestrator.job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.assigned_node.is_none());
    }

    #[tokio::test]
    async fn test_submit_assigns_least_loaded_node() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2), ("node-c", 3)]);
        let mut client = MockNodeClient::new();
        client
            .expect_dispatch_job()
            .times(1)
            .withf(|node, _| node.id == "node-b")
            .returning(|_, _| Ok(()));

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.5).await;
        activate(&orchestrator, "node-b", 0.2).await;
        activate(&orchestrator, "node-c", 0.7).await;

        let job_id = orchestrator
            .submit_training_job(scenarios(3), JobMetadata::default())
            .await
            .unwrap();

        let job = orchestrator.job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_node.as_deref(), Some("node-b"));
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_assignment_places_job_once() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2)]);
        let mut client = MockNodeClient::new();
        // Mutual exclusion: exactly one dispatch across all attempts.
        client.expect_dispatch_job().times(1).returning(|_, _| Ok(()));

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.1).await;

        let job = TrainingJob::new(scenarios(2), 1, JobMetadata::default());
        let job_id = job.id.clone();
        orchestrator.jobs.write().await.insert(job_id.clone(), job);

        let attempts = (0..8).map(|_| orchestrator.assign_job(&job_id));
        for result in join_all(attempts).await {
            result.unwrap();
        }

        let job = orchestrator.job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.assigned_node.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_failure_fails_node_over_and_reassigns() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2)]);
        let mut client = MockNodeClient::new();
        client
            .expect_dispatch_job()
            .withf(|node, _| node.id == "node-a")
            .returning(|node, _| {
                Err(MeshgateError::NodeTransport {
                    node_id: node.id.clone(),
                    reason: "connection refused".to_string(),
                })
            });
        client
            .expect_dispatch_job()
            .withf(|node, _| node.id == "node-b")
            .times(1)
            .returning(|_, _| Ok(()));

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.5).await;

        let job_id = orchestrator
            .submit_training_job(scenarios(2), JobMetadata::default())
            .await
            .unwrap();

        let job = orchestrator.job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_node.as_deref(), Some("node-b"));
        assert_eq!(
            orchestrator.node("node-a").await.unwrap().status,
            NodeStatus::Offline
        );
    }

    #[tokio::test]
    async fn test_health_cycle_activates_and_fails_nodes() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2)]);
        let mut client = MockNodeClient::new();
        client
            .expect_probe_health()
            .withf(|node| node.id == "node-a")
            .returning(|_| {
                Ok(NodeHealthReport {
                    load: 0.35,
                    memory: 1024.0,
                })
            });
        client
            .expect_probe_health()
            .withf(|node| node.id == "node-b")
            .returning(|node| {
                Err(MeshgateError::NodeTransport {
                    node_id: node.id.clone(),
                    reason: "timeout".to_string(),
                })
            });

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-b", 0.1).await;

        orchestrator.run_health_cycle().await;

        let a = orchestrator.node("node-a").await.unwrap();
        assert_eq!(a.status, NodeStatus::Active);
        assert!(a.last_heartbeat.is_some());
        assert_eq!(a.capacity.current_load, 0.35);

        // Liveness: one failed probe is enough to drop the node.
        let b = orchestrator.node("node-b").await.unwrap();
        assert_eq!(b.status, NodeStatus::Offline);
    }

    #[tokio::test]
    async fn test_node_failure_mid_job_reassigns_to_other_node() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2)]);
        let mut client = MockNodeClient::new();
        client.expect_dispatch_job().returning(|_, _| Ok(()));
        client
            .expect_probe_health()
            .withf(|node| node.id == "node-a")
            .returning(|node| {
                Err(MeshgateError::NodeTransport {
                    node_id: node.id.clone(),
                    reason: "timeout".to_string(),
                })
            });
        client
            .expect_probe_health()
            .withf(|node| node.id == "node-b")
            .returning(|_| {
                Ok(NodeHealthReport {
                    load: 0.2,
                    memory: 2048.0,
                })
            });

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.5).await;

        let job_id = orchestrator
            .submit_training_job(scenarios(2), JobMetadata::default())
            .await
            .unwrap();
        assert_eq!(
            orchestrator.job(&job_id).await.unwrap().assigned_node.as_deref(),
            Some("node-a")
        );

        // node-a dies; the next health cycle reassigns its job.
        orchestrator.run_health_cycle().await;

        let job = orchestrator.job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_node.as_deref(), Some("node-b"));
    }

    #[tokio::test]
    async fn test_failure_for_unknown_node_is_an_error() {
        let config = cluster_config(&[("node-a", 1)]);
        let orchestrator = orchestrator_with(config, MockNodeClient::new()).await;

        let err = orchestrator.handle_node_failure("ghost").await.unwrap_err();
        assert!(matches!(err, MeshgateError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_primary_failure_triggers_reelection() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2)]);
        let orchestrator = orchestrator_with(config, MockNodeClient::new()).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.1).await;

        assert_eq!(orchestrator.elect_primary().await.unwrap(), "node-a");

        orchestrator.handle_node_failure("node-a").await.unwrap();
        assert_eq!(orchestrator.primary().await, Some("node-b".to_string()));
    }

    #[tokio::test]
    async fn test_sync_cycle_only_runs_on_primary() {
        // local_node_id is node-a; make node-b primary.
        let config = cluster_config(&[("node-a", 2), ("node-b", 1)]);
        let mut client = MockNodeClient::new();
        client.expect_push_model().times(0);

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.1).await;
        orchestrator.elect_primary().await.unwrap();

        orchestrator.run_sync_cycle().await;
    }

    #[tokio::test]
    async fn test_sync_cycle_pushes_to_all_active_nodes() {
        let config = cluster_config(&[("node-a", 1), ("node-b", 2), ("node-c", 3)]);
        let mut client = MockNodeClient::new();
        client
            .expect_push_model()
            .withf(|node, sync| node.id == "node-b" && sync.version == 7)
            .times(1)
            .returning(|_, _| Ok(()));
        // A per-node failure is logged, not fatal to the sweep.
        client
            .expect_push_model()
            .withf(|node, _| node.id == "node-a")
            .times(1)
            .returning(|node, _| {
                Err(MeshgateError::NodeTransport {
                    node_id: node.id.clone(),
                    reason: "timeout".to_string(),
                })
            });
        client
            .expect_push_model()
            .withf(|node, _| node.id == "node-c")
            .times(1)
            .returning(|_, _| Ok(()));

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.1).await;
        activate(&orchestrator, "node-b", 0.1).await;
        activate(&orchestrator, "node-c", 0.1).await;
        orchestrator.elect_primary().await.unwrap();
        orchestrator.set_model_version(7);

        orchestrator.run_sync_cycle().await;
    }

    #[tokio::test]
    async fn test_pending_sweep_places_job_when_capacity_frees() {
        let config = cluster_config(&[("node-a", 1)]);
        let mut client = MockNodeClient::new();
        client.expect_dispatch_job().times(1).returning(|_, _| Ok(()));

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.95).await;

        let job_id = orchestrator
            .submit_training_job(scenarios(2), JobMetadata::default())
            .await
            .unwrap();
        assert_eq!(
            orchestrator.job(&job_id).await.unwrap().status,
            JobStatus::Pending
        );

        // Load drops below the ceiling; the sweep picks the job up.
        activate(&orchestrator, "node-a", 0.3).await;
        orchestrator.run_pending_cycle().await;

        let job = orchestrator.job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_node.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_terminal_job_reports_are_archived() {
        let config = cluster_config(&[("node-a", 1)]);
        let mut client = MockNodeClient::new();
        client.expect_dispatch_job().returning(|_, _| Ok(()));
        client.expect_probe_health().returning(|_| {
            Ok(NodeHealthReport {
                load: 0.1,
                memory: 512.0,
            })
        });

        let orchestrator = orchestrator_with(config, client).await;
        activate(&orchestrator, "node-a", 0.1).await;

        let job_id = orchestrator
            .submit_training_job(scenarios(2), JobMetadata::default())
            .await
            .unwrap();

        // Worker reports completion through the store.
        let report = JobReport {
            job_id: job_id.clone(),
            node_id: "node-a".to_string(),
            status: JobStatus::Completed,
            epochs_run: 5,
            halted: None,
            finished_at: chrono::Utc::now(),
        };
        store::put_record(orchestrator.store.as_ref(), keys::JOB_REPORTS, &job_id, &report)
            .await
            .unwrap();

        orchestrator.run_health_cycle().await;

        assert!(orchestrator.job(&job_id).await.is_none());
        let archived: TrainingJob =
            store::get_record(orchestrator.store.as_ref(), keys::JOBS_ARCHIVED, &job_id)
                .await
                .unwrap()
                .unwrap();
        assert_eq!(archived.status, JobStatus::Completed);
    }
}

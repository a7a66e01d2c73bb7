//! Training worker
//!
//! Executes at most one training job at a time per node. Each epoch runs one
//! training pass, one validation pass, and a safety check; two circuit
//! breakers (safety score, gradient norm) can halt the job early without
//! failing it. Checkpoints are written every Kth epoch with bounded
//! retention. Completion reports flow back to the orchestrator through the
//! coordination store.

use crate::clock::Clock;
use crate::cluster::store::{self, keys, CoordinationStore};
use crate::config::TrainingConfig;
use crate::error::{MeshgateError, Result};
use crate::training::checkpoint::{Checkpoint, CheckpointRing, TrainingMetrics};
use crate::training::job::{JobDescriptor, JobReport, JobStatus, Scenario};
use crate::training::safety::SafetyValidator;
use crate::training::synthesizer::ScenarioSynthesizer;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Why an epoch loop stopped before the configured maximum
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    SafetyScore { score: f64, min: f64 },
    GradientNorm { norm: f64, max: f64 },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::SafetyScore { score, min } => {
                write!(f, "safety score {score:.3} below minimum {min:.3}")
            }
            HaltReason::GradientNorm { norm, max } => {
                write!(f, "gradient norm {norm:.3} above maximum {max:.3}")
            }
        }
    }
}

/// Result of a completed (or halted) job
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub status: JobStatus,
    pub epochs_run: u32,
    /// Set when a circuit breaker ended the job early
    pub halted: Option<HaltReason>,
    pub final_metrics: Option<TrainingMetrics>,
}

/// Side-effect-free worker snapshot
#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub training: bool,
    pub current_job: Option<JobDescriptor>,
    pub latest_metrics: Option<TrainingMetrics>,
}

pub struct TrainingWorker {
    node_id: String,
    config: TrainingConfig,
    synthesizer: Arc<dyn ScenarioSynthesizer>,
    validator: Arc<dyn SafetyValidator>,
    clock: Arc<dyn Clock>,
    /// Completion reports and checkpoints are mirrored here when present
    store: Option<Arc<dyn CoordinationStore>>,
    busy: AtomicBool,
    current_job: RwLock<Option<JobDescriptor>>,
    latest_metrics: RwLock<Option<TrainingMetrics>>,
    checkpoints: RwLock<CheckpointRing>,
    checkpoint_version: AtomicU64,
}

impl TrainingWorker {
    pub fn new(
        node_id: impl Into<String>,
        config: TrainingConfig,
        synthesizer: Arc<dyn ScenarioSynthesizer>,
        validator: Arc<dyn SafetyValidator>,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn CoordinationStore>>,
    ) -> Self {
        let max_checkpoints = config.max_checkpoints;
        Self {
            node_id: node_id.into(),
            config,
            synthesizer,
            validator,
            clock,
            store,
            busy: AtomicBool::new(false),
            current_job: RwLock::new(None),
            latest_metrics: RwLock::new(None),
            checkpoints: RwLock::new(CheckpointRing::new(max_checkpoints)),
            checkpoint_version: AtomicU64::new(0),
        }
    }

    /// Execute a training job. Rejects immediately when a job is already in
    /// progress; the busy flag is always cleared on the way out so the node
    /// can accept new work after any outcome.
    pub async fn handle_training_job(&self, job: JobDescriptor) -> Result<JobOutcome> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let running = self
                .current_job
                .read()
                .await
                .as_ref()
                .map(|j| j.id.clone())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(
                "node {} rejected job {}: already running {}",
                self.node_id, job.id, running
            );
            return Err(MeshgateError::JobConflict {
                node_id: self.node_id.clone(),
                running,
            });
        }

        info!(
            "node {} starting job {} ({} scenarios, model v{})",
            self.node_id,
            job.id,
            job.scenarios.len(),
            job.model_version
        );
        *self.current_job.write().await = Some(job.clone());

        let result = self.run_epochs(&job).await;

        *self.current_job.write().await = None;
        self.busy.store(false, Ordering::SeqCst);

        match result {
            Ok(outcome) => {
                if let Some(reason) = &outcome.halted {
                    warn!(
                        "job {} halted after {} epochs: {}",
                        job.id, outcome.epochs_run, reason
                    );
                } else {
                    info!("job {} completed after {} epochs", job.id, outcome.epochs_run);
                }
                self.report(&outcome).await;
                Ok(outcome)
            }
            Err(e) => {
                error!("job {} failed: {}", job.id, e);
                let outcome = JobOutcome {
                    job_id: job.id.clone(),
                    status: JobStatus::Failed,
                    epochs_run: 0,
                    halted: None,
                    final_metrics: None,
                };
                self.report(&outcome).await;
                Err(e)
            }
        }
    }

    async fn run_epochs(&self, job: &JobDescriptor) -> Result<JobOutcome> {
        let screened = self.screen_scenarios(job).await?;
        let (train_set, validation_set) = split_scenarios(&screened, self.config.validation_fraction);
        debug!(
            "job {}: {} train / {} validation scenarios",
            job.id,
            train_set.len(),
            validation_set.len()
        );

        let mut epochs_run = 0u32;
        let mut halted = None;
        let mut final_metrics = None;

        for epoch in 1..=self.config.max_epochs {
            let train_loss = self
                .synthesizer
                .train(&train_set, 1, self.config.batch_size)
                .await?;
            let validation_loss = self.synthesizer.evaluate(&validation_set).await?;

            let state = self.synthesizer.current_model_state().await?;
            let report = self.validator.validate(&state).await?;

            epochs_run = epoch;
            let metrics = TrainingMetrics {
                epoch,
                train_loss,
                validation_loss,
                safety_score: report.score,
                gradient_norm: report.gradient_norm,
            };
            *self.latest_metrics.write().await = Some(metrics.clone());
            final_metrics = Some(metrics.clone());

            // Circuit breakers, checked after every epoch. A trip ends the
            // job as completed with a partial epoch count.
            if report.score < self.config.min_safety_score {
                halted = Some(HaltReason::SafetyScore {
                    score: report.score,
                    min: self.config.min_safety_score,
                });
                break;
            }
            if report.gradient_norm > self.config.max_gradient_norm {
                halted = Some(HaltReason::GradientNorm {
                    norm: report.gradient_norm,
                    max: self.config.max_gradient_norm,
                });
                break;
            }

            if epoch % self.config.checkpoint_every_epochs == 0 {
                self.write_checkpoint(job, &metrics).await?;
            }
        }

        Ok(JobOutcome {
            job_id: job.id.clone(),
            status: JobStatus::Completed,
            epochs_run,
            halted,
            final_metrics,
        })
    }

    /// Drop scenarios the safety validator rejects. Dropped scenarios are
    /// never retried.
    async fn screen_scenarios(&self, job: &JobDescriptor) -> Result<Vec<Scenario>> {
        let mut screened = Vec::with_capacity(job.scenarios.len());
        let mut dropped = 0usize;
        for scenario in &job.scenarios {
            let report = self.validator.validate(&vec![scenario.features.clone()]).await?;
            if report.is_valid {
                screened.push(scenario.clone());
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            warn!(
                "job {}: dropped {} of {} scenarios rejected by the safety validator",
                job.id,
                dropped,
                job.scenarios.len()
            );
        }
        if screened.is_empty() {
            return Err(MeshgateError::ValidationRejected(
                "all scenarios rejected by the safety validator".to_string(),
            ));
        }
        Ok(screened)
    }

    async fn write_checkpoint(&self, job: &JobDescriptor, metrics: &TrainingMetrics) -> Result<()> {
        let version = self.checkpoint_version.fetch_add(1, Ordering::SeqCst) + 1;
        let weights_ref = format!("weights/{}/{}", job.id, metrics.epoch);
        let safety_signature = self.validator.sign(&weights_ref).await?;

        let checkpoint = Checkpoint {
            version,
            timestamp: self.clock.now(),
            weights_ref,
            metrics: metrics.clone(),
            safety_signature,
        };

        debug!(
            "job {}: checkpoint v{} at epoch {}",
            job.id, version, metrics.epoch
        );

        if let Some(store) = &self.store {
            if let Err(e) =
                store::put_record(store.as_ref(), keys::CHECKPOINTS, &self.node_id, &checkpoint)
                    .await
            {
                warn!("failed to mirror checkpoint to store: {}", e);
            }
        }

        self.checkpoints.write().await.push(checkpoint);
        Ok(())
    }

    async fn report(&self, outcome: &JobOutcome) {
        let Some(store) = &self.store else {
            return;
        };
        let report = JobReport {
            job_id: outcome.job_id.clone(),
            node_id: self.node_id.clone(),
            status: outcome.status,
            epochs_run: outcome.epochs_run,
            halted: outcome.halted.as_ref().map(|h| h.to_string()),
            finished_at: self.clock.now(),
        };
        if let Err(e) =
            store::put_record(store.as_ref(), keys::JOB_REPORTS, &report.job_id, &report).await
        {
            warn!("failed to write job report for {}: {}", report.job_id, e);
        }
    }

    /// Side-effect-free status snapshot.
    pub async fn status(&self) -> WorkerStatus {
        WorkerStatus {
            training: self.busy.load(Ordering::SeqCst),
            current_job: self.current_job.read().await.clone(),
            latest_metrics: self.latest_metrics.read().await.clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Retained checkpoints, oldest first.
    pub async fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.read().await.iter().cloned().collect()
    }

    /// Coarse load gauge for the node's health endpoint.
    pub fn current_load(&self) -> f64 {
        if self.is_busy() {
            1.0
        } else {
            0.0
        }
    }
}

/// Shuffle, then hold out a fixed fraction for validation.
fn split_scenarios(scenarios: &[Scenario], validation_fraction: f64) -> (Vec<Scenario>, Vec<Scenario>) {
    let mut shuffled: Vec<Scenario> = scenarios.to_vec();
    shuffled.shuffle(&mut rand::thread_rng());

    let validation_len = ((shuffled.len() as f64) * validation_fraction).floor() as usize;
    let train_len = shuffled.len() - validation_len;
    let validation = shuffled.split_off(train_len);
    (shuffled, validation)
}

//! In-process job queue backing the async parse API.
//!
//! A bounded submission channel feeds a fixed pool of workers; the job table
//! is one mutex-guarded map with O(1) operations and no I/O under the lock.
//! Completed records are swept after a TTL by a reaper task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::exam::{ParsedExam, ValidationResult};
use crate::services::orchestrator::{
    ModelSpec, Orchestrator, ParseError, ParseOptions, ParseOutcome,
};
use crate::services::usage::CostReport;

pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

/// Result payload stored on a completed job.
#[derive(Debug, Clone, Serialize)]
pub struct JobPayload {
    pub parsed_exam: ParsedExam,
    pub validation: ValidationResult,
    pub cost: CostReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseJob {
    pub id: String,
    pub state: JobState,
    pub model_spec: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<JobPayload>,
    pub error: Option<String>,
    #[serde(skip)]
    completed_mono: Option<Instant>,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("job queue is full")]
    QueueFull,
    #[error("failed to stage upload: {0}")]
    Staging(#[source] std::io::Error),
}

/// The work a job executes; the orchestrator is the production runner, tests
/// inject their own.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(
        &self,
        pdf_path: &Path,
        model_spec: &ModelSpec,
        options: &ParseOptions,
    ) -> Result<JobPayload, String>;
}

#[async_trait]
impl JobRunner for Orchestrator {
    async fn run(
        &self,
        pdf_path: &Path,
        model_spec: &ModelSpec,
        options: &ParseOptions,
    ) -> Result<JobPayload, String> {
        self.parse(pdf_path, model_spec, options)
            .await
            .map(
                |ParseOutcome {
                     parsed_exam,
                     validation,
                     cost,
                     ..
                 }| JobPayload {
                    parsed_exam,
                    validation,
                    cost,
                },
            )
            .map_err(|error: ParseError| error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub workers: usize,
    pub queue_depth: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub upload_dir: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_depth: 32,
            ttl: DEFAULT_JOB_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            upload_dir: std::env::temp_dir().join("gichul-uploads"),
        }
    }
}

struct QueuedJob {
    id: String,
    pdf_path: PathBuf,
    model_spec: ModelSpec,
    options: ParseOptions,
}

struct JobInner {
    table: Mutex<HashMap<String, ParseJob>>,
    sender: mpsc::Sender<QueuedJob>,
    upload_dir: PathBuf,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<JobInner>,
}

impl JobManager {
    /// Spawn the worker pool and the TTL reaper.
    pub fn start(runner: Arc<dyn JobRunner>, config: JobConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedJob>(config.queue_depth.max(1));
        let inner = Arc::new(JobInner {
            table: Mutex::new(HashMap::new()),
            sender,
            upload_dir: config.upload_dir.clone(),
        });

        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        for worker in 0..config.workers.max(1) {
            let inner = inner.clone();
            let runner = runner.clone();
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else {
                        break;
                    };
                    tracing::debug!(worker, job_id = %job.id, "worker picked up job");
                    process_job(&inner, runner.as_ref(), job).await;
                }
            });
        }

        {
            let inner = inner.clone();
            let ttl = config.ttl;
            let sweep_interval = config.sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let removed = sweep_expired(&inner, ttl);
                    if removed > 0 {
                        tracing::info!(removed, "cleaned up expired jobs");
                    }
                }
            });
        }

        Self { inner }
    }

    /// Stage the upload and enqueue a parse job.
    pub fn submit(
        &self,
        pdf_bytes: &[u8],
        model_spec: &ModelSpec,
        options: ParseOptions,
    ) -> Result<String, JobError> {
        let id = Uuid::new_v4().to_string();

        std::fs::create_dir_all(&self.inner.upload_dir).map_err(JobError::Staging)?;
        let pdf_path = self.inner.upload_dir.join(format!("{id}.pdf"));
        std::fs::write(&pdf_path, pdf_bytes).map_err(JobError::Staging)?;

        let record = ParseJob {
            id: id.clone(),
            state: JobState::Pending,
            model_spec: model_spec.to_string(),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
            completed_mono: None,
        };

        {
            let mut table = self.inner.table.lock().expect("job table mutex poisoned");
            table.insert(id.clone(), record);
        }

        let queued = QueuedJob {
            id: id.clone(),
            pdf_path: pdf_path.clone(),
            model_spec: model_spec.clone(),
            options,
        };

        if let Err(send_error) = self.inner.sender.try_send(queued) {
            let mut table = self.inner.table.lock().expect("job table mutex poisoned");
            table.remove(&id);
            drop(table);
            let _ = std::fs::remove_file(&pdf_path);
            return match send_error {
                mpsc::error::TrySendError::Full(_) => Err(JobError::QueueFull),
                mpsc::error::TrySendError::Closed(_) => Err(JobError::Staging(
                    std::io::Error::other("worker pool is shut down"),
                )),
            };
        }

        Ok(id)
    }

    pub fn get(&self, job_id: &str) -> Option<ParseJob> {
        let table = self.inner.table.lock().expect("job table mutex poisoned");
        table.get(job_id).cloned()
    }

    pub fn job_count(&self) -> usize {
        let table = self.inner.table.lock().expect("job table mutex poisoned");
        table.len()
    }
}

async fn process_job(inner: &JobInner, runner: &dyn JobRunner, job: QueuedJob) {
    update(inner, &job.id, |record| {
        record.state = JobState::Running;
    });

    let outcome = runner.run(&job.pdf_path, &job.model_spec, &job.options).await;

    update(inner, &job.id, |record| {
        match outcome {
            Ok(payload) => {
                record.state = JobState::Done;
                record.result = Some(payload);
            }
            Err(error) => {
                record.state = JobState::Failed;
                record.error = Some(error);
            }
        }
        record.completed_at = Some(Utc::now());
        record.completed_mono = Some(Instant::now());
    });

    if let Err(error) = std::fs::remove_file(&job.pdf_path) {
        if error.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id = %job.id, %error, "failed to remove staged upload");
        }
    }
}

fn update(inner: &JobInner, job_id: &str, apply: impl FnOnce(&mut ParseJob)) {
    let mut table = inner.table.lock().expect("job table mutex poisoned");
    if let Some(record) = table.get_mut(job_id) {
        apply(record);
    }
}

fn sweep_expired(inner: &JobInner, ttl: Duration) -> usize {
    let now = Instant::now();
    let mut table = inner.table.lock().expect("job table mutex poisoned");
    let before = table.len();
    table.retain(|_, job| {
        if !job.state.is_terminal() {
            return true;
        }
        match job.completed_mono {
            Some(completed) => now.duration_since(completed) < ttl,
            None => true,
        }
    });
    before - table.len()
}

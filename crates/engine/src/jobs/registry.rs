//! Job registry: records the job behind each operation execution attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// Job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Finished,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Finished => write!(f, "finished"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request for a new job.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    /// Job type, the operation template for operation jobs.
    pub job_type: String,
    pub operation: String,
    pub arguments: Vec<String>,
    pub parent_id: Option<i64>,
    pub load: f32,
    pub status: JobStatus,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            operation: operation.into(),
            arguments: Vec::new(),
            parent_id: None,
            load: 1.0,
            status: JobStatus::Running,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_load(mut self, load: f32) -> Self {
        self.load = load;
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }
}

/// A tracked job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    pub operation: String,
    pub arguments: Vec<String>,
    pub parent_id: Option<i64>,
    pub load: f32,
    pub status: JobStatus,
    /// Output recorded when the job finishes.
    pub payload: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_completed: Option<DateTime<Utc>>,
}

/// Collaborator that owns job records.
#[async_trait]
pub trait JobRegistry: Send + Sync {
    async fn create_job(&self, job: NewJob) -> EngineResult<Job>;

    async fn get_job(&self, id: i64) -> EngineResult<Job>;

    async fn update_status(&self, id: i64, status: JobStatus) -> EngineResult<Job>;

    /// Finish a job with its final status and optional output.
    async fn complete(
        &self,
        id: i64,
        status: JobStatus,
        payload: Option<String>,
    ) -> EngineResult<Job>;
}

/// Job registry kept in process memory.
#[derive(Debug)]
pub struct InMemoryJobRegistry {
    jobs: RwLock<HashMap<i64, Job>>,
    next_id: AtomicI64,
}

impl InMemoryJobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

impl Default for InMemoryJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRegistry for InMemoryJobRegistry {
    async fn create_job(&self, job: NewJob) -> EngineResult<Job> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let job = Job {
            id,
            job_type: job.job_type,
            operation: job.operation,
            arguments: job.arguments,
            parent_id: job.parent_id,
            load: job.load,
            status: job.status,
            payload: None,
            date_created: Utc::now(),
            date_completed: None,
        };
        debug!(job_id = id, job_type = %job.job_type, status = %job.status, "Created job");
        self.jobs.write().await.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: i64) -> EngineResult<Job> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("job {}", id)))
    }

    async fn update_status(&self, id: i64, status: JobStatus) -> EngineResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {}", id)))?;
        job.status = status;
        if status.is_terminal() {
            job.date_completed = Some(Utc::now());
        }
        Ok(job.clone())
    }

    async fn complete(
        &self,
        id: i64,
        status: JobStatus,
        payload: Option<String>,
    ) -> EngineResult<Job> {
        if !status.is_terminal() {
            return Err(EngineError::Job(format!(
                "job {} cannot complete with non-terminal status {}",
                id, status
            )));
        }
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("job {}", id)))?;
        job.status = status;
        job.payload = payload;
        job.date_completed = Some(Utc::now());
        Ok(job.clone())
    }
}

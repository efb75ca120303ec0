//! Worker lifecycle management.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use mediaflow_engine::config::EngineConfig;
use mediaflow_engine::db::InMemoryRepository;
use mediaflow_engine::definition::DefinitionRegistry;
use mediaflow_engine::engine::{ExecutionDriver, HandlerRegistry};
use mediaflow_engine::jobs::{InMemoryJobRegistry, JobRegistry};
use mediaflow_engine::model::WorkflowInstance;
use mediaflow_engine::services::WorkflowService;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::handlers::register_builtin;
use crate::request::WorkflowRequest;

/// Runs workflows with the built-in handlers.
///
/// Every started workflow gets its own driver task inside the service; the
/// semaphore caps how many of them are in flight at once.
pub struct Worker {
    /// Worker configuration.
    config: WorkerConfig,

    service: WorkflowService,

    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,

    /// Workflows started by this worker and not yet settled.
    active: Mutex<HashSet<i64>>,

    shutting_down: AtomicBool,
}

impl Worker {
    /// Create a worker using engine settings from the environment.
    ///
    /// The local host name is stamped on every operation this worker runs.
    pub fn new(config: WorkerConfig) -> anyhow::Result<Self> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let engine_config = EngineConfig::from_env()?.with_execution_host(hostname);
        Ok(Self::with_engine_config(config, engine_config)?)
    }

    pub fn with_engine_config(
        config: WorkerConfig,
        engine_config: EngineConfig,
    ) -> WorkerResult<Self> {
        let definitions = Arc::new(DefinitionRegistry::new());
        if config.definitions_dir.is_dir() {
            definitions.load_dir(&config.definitions_dir)?;
        } else {
            warn!(
                dir = %config.definitions_dir.display(),
                "Definitions directory not found, starting without definitions"
            );
        }

        let handlers = Arc::new(HandlerRegistry::new());
        let jobs: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
        register_builtin(
            &handlers,
            definitions.clone(),
            jobs.clone(),
            engine_config.job_poll_interval(),
        )?;

        let driver = ExecutionDriver::new(handlers, definitions, jobs, engine_config);
        let service = WorkflowService::new(driver, Arc::new(InMemoryRepository::new()));
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_workflows.max(1)));

        Ok(Self {
            config,
            service,
            semaphore,
            active: Mutex::new(HashSet::new()),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn service(&self) -> &WorkflowService {
        &self.service
    }

    pub fn definitions(&self) -> &Arc<DefinitionRegistry> {
        self.service.definitions()
    }

    /// Start a workflow and wait until it pauses or finishes.
    pub async fn run_workflow(&self, request: WorkflowRequest) -> WorkerResult<WorkflowInstance> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| WorkerError::ShuttingDown)?;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(WorkerError::ShuttingDown);
        }

        let definition = self.definitions().get(&request.definition_id)?;
        let started = self
            .service
            .start(
                &definition,
                request.artifact,
                None,
                self.config.identity(),
                request.configuration,
            )
            .await?;
        self.track(started.id, true);

        let settled = self.service.wait(started.id).await;
        self.track(started.id, false);
        let settled = settled?;

        info!(
            worker_id = %self.config.worker_id,
            workflow_id = settled.id,
            state = %settled.state(),
            "Workflow settled"
        );
        Ok(settled)
    }

    /// Run several workflows concurrently, bounded by the worker's limit.
    ///
    /// Results come back in request order.
    pub async fn run_all(
        &self,
        requests: Vec<WorkflowRequest>,
    ) -> Vec<WorkerResult<WorkflowInstance>> {
        join_all(requests.into_iter().map(|r| self.run_workflow(r))).await
    }

    /// Refuse new workflows and stop the ones still running.
    ///
    /// Workflows held in a non-abortable operation are left paused.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.semaphore.close();

        let active: Vec<i64> = self
            .active
            .lock()
            .map(|a| a.iter().copied().collect())
            .unwrap_or_default();
        for id in active {
            match self.service.stop(id).await {
                Ok(instance) => info!(workflow_id = id, state = %instance.state(), "Workflow stopped"),
                Err(e) => warn!(workflow_id = id, error = %e, "Workflow not stopped on shutdown"),
            }
        }
    }

    fn track(&self, id: i64, active: bool) {
        if let Ok(mut set) = self.active.lock() {
            if active {
                set.insert(id);
            } else {
                set.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_engine::model::{Artifact, OperationState, WorkflowState};
    use std::collections::BTreeMap;
    use std::time::Duration;

    const PUBLISH: &str = r#"
id: publish
operations:
  - id: defaults
    configuration:
      profile: mp4-hd
      publish: "false"
  - id: shell
    configuration:
      command: "echo encoded-hd"
      output-key: encoded
  - id: include
    configuration:
      workflow-id: archive
"#;

    const ARCHIVE: &str = r#"
id: archive
operations:
  - id: shell
    configuration:
      command: "true"
"#;

    const REVIEW: &str = r#"
id: review
operations:
  - id: hold
    configuration:
      action-title: Approve
"#;

    fn worker(max_concurrent: usize) -> (tempfile::TempDir, Worker) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("publish.yaml"), PUBLISH).unwrap();
        std::fs::write(dir.path().join("archive.yaml"), ARCHIVE).unwrap();
        std::fs::write(dir.path().join("review.yml"), REVIEW).unwrap();

        let config = WorkerConfig {
            definitions_dir: dir.path().to_path_buf(),
            max_concurrent_workflows: max_concurrent,
            ..WorkerConfig::default()
        };
        let engine_config = EngineConfig {
            job_poll_interval_ms: 5,
            ..EngineConfig::default()
        };
        let worker = Worker::with_engine_config(config, engine_config).unwrap();
        (dir, worker)
    }

    #[test]
    fn test_worker_config() {
        let (_dir, worker) = worker(2);
        assert!(!worker.config().worker_id.is_empty());
        assert_eq!(worker.definitions().list().len(), 3);
        assert_eq!(
            worker.service().handlers().list(),
            vec!["defaults", "hold", "include", "shell"]
        );
    }

    #[tokio::test]
    async fn test_run_workflow_with_builtin_handlers() {
        let (_dir, worker) = worker(2);
        let request = WorkflowRequest::new("publish", Artifact::new("mp-1")).with_configuration(
            BTreeMap::from([("publish".to_string(), "true".to_string())]),
        );

        let finished = worker.run_workflow(request).await.unwrap();

        assert_eq!(finished.state(), WorkflowState::Succeeded);
        assert_eq!(finished.config("profile"), Some("mp4-hd"));
        assert_eq!(finished.config("publish"), Some("true"));
        assert_eq!(finished.config("encoded"), Some("encoded-hd"));
        assert_eq!(finished.operation_count(), 4);
        assert!(finished
            .operations()
            .iter()
            .all(|op| op.state() == OperationState::Succeeded));
    }

    #[tokio::test]
    async fn test_hold_leaves_workflow_paused() {
        let (_dir, worker) = worker(1);
        let paused = worker
            .run_workflow(WorkflowRequest::new("review", Artifact::new("mp-2")))
            .await
            .unwrap();

        assert_eq!(paused.state(), WorkflowState::Paused);
        let hold = paused.operation(0).unwrap();
        assert_eq!(hold.hold_action_title.as_deref(), Some("Approve"));

        worker.shutdown().await;
        assert_eq!(
            worker.service().get(paused.id).await.unwrap().state(),
            WorkflowState::Paused
        );
        assert!(matches!(
            worker
                .run_workflow(WorkflowRequest::new("review", Artifact::new("mp-3")))
                .await,
            Err(WorkerError::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_run_all_bounded() {
        let (_dir, worker) = worker(2);
        let requests = (0..5)
            .map(|i| WorkflowRequest::new("archive", Artifact::new(format!("mp-{i}"))))
            .collect();

        let results = tokio::time::timeout(Duration::from_secs(10), worker.run_all(requests))
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        for result in results {
            assert_eq!(result.unwrap().state(), WorkflowState::Succeeded);
        }
        assert_eq!(worker.semaphore.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_unknown_definition() {
        let (_dir, worker) = worker(1);
        let err = worker
            .run_workflow(WorkflowRequest::new("missing", Artifact::new("mp-1")))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Engine(_)));
    }
}

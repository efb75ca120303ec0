//! Workflow service: the lifecycle facade over driver, repository and listeners.
//!
//! Each instance gets a control channel and an async run lock. A driver
//! task holds the run lock for as long as it advances the instance, so
//! external requests (`stop`, `suspend`, `resume`, `update`) either signal
//! the running driver and wait for it to settle, or act on the stored
//! instance directly when nothing is running.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::{InMemoryRepository, WorkflowQuery, WorkflowRepository, WorkflowSet};
use crate::definition::{validate_definition, DefinitionRegistry, WorkflowDefinition};
use crate::engine::control::{ControlSender, ControlSignal};
use crate::engine::driver::{ExecutionDriver, StepOutcome};
use crate::engine::handler::HandlerRegistry;
use crate::error::{EngineError, EngineResult};
use crate::jobs::{InMemoryJobRegistry, JobStatus};
use crate::model::{Artifact, Identity, OperationState, WorkflowInstance, WorkflowState};
use crate::result_ext::ResultExt;
use crate::services::listener::{ListenerSet, WorkflowListener};

/// Per-instance coordination state.
#[derive(Clone)]
struct InstanceHandle {
    control: Arc<ControlSender>,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

impl InstanceHandle {
    fn new() -> Self {
        let (tx, _rx) = tokio::sync::watch::channel(ControlSignal::Run);
        Self {
            control: Arc::new(tx),
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

/// Workflow lifecycle service.
#[derive(Clone)]
pub struct WorkflowService {
    driver: Arc<ExecutionDriver>,
    repository: Arc<dyn WorkflowRepository>,
    listeners: Arc<ListenerSet>,
    handles: Arc<Mutex<HashMap<i64, InstanceHandle>>>,
    start_lock: Arc<tokio::sync::Mutex<()>>,
}

impl WorkflowService {
    pub fn new(driver: ExecutionDriver, repository: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            driver: Arc::new(driver),
            repository,
            listeners: Arc::new(ListenerSet::new()),
            handles: Arc::new(Mutex::new(HashMap::new())),
            start_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Service backed by in-memory repository and job registry.
    pub fn in_memory(
        handlers: Arc<HandlerRegistry>,
        definitions: Arc<DefinitionRegistry>,
        config: EngineConfig,
    ) -> Self {
        let driver = ExecutionDriver::new(
            handlers,
            definitions,
            Arc::new(InMemoryJobRegistry::new()),
            config,
        );
        Self::new(driver, Arc::new(InMemoryRepository::new()))
    }

    pub fn driver(&self) -> &Arc<ExecutionDriver> {
        &self.driver
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        self.driver.handlers()
    }

    pub fn definitions(&self) -> &Arc<DefinitionRegistry> {
        self.driver.definitions()
    }

    pub fn add_listener(&self, listener: Arc<dyn WorkflowListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn WorkflowListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Create an instance and hand it to a driver task.
    ///
    /// Without a parent, no other active workflow may exist for the same
    /// artifact. With a parent, the parent must exist.
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        artifact: Artifact,
        parent_id: Option<i64>,
        identity: Identity,
        configuration: BTreeMap<String, String>,
    ) -> EngineResult<WorkflowInstance> {
        validate_definition(definition)?;

        let mut instance = {
            let _start = self.start_lock.lock().await;

            match parent_id {
                Some(parent) => {
                    self.repository.load(parent).await?;
                }
                None => {
                    let existing = self
                        .find_all(&WorkflowQuery::new().with_artifact(artifact.id.clone()))
                        .await?;
                    if let Some(active) = existing.iter().find(|wf| wf.state().is_active()) {
                        return Err(EngineError::InvalidTransition(format!(
                            "artifact '{}' is already being processed by workflow {}",
                            artifact.id, active.id
                        )));
                    }
                }
            }

            let mut instance =
                WorkflowInstance::new(definition, artifact, parent_id, identity, configuration);
            instance.id = self.repository.next_id().await?;
            self.repository
                .save(&instance)
                .await
                .log("saving new workflow")?;
            instance
        };

        info!(
            workflow_id = instance.id,
            template = %instance.template,
            artifact = %instance.artifact.id,
            "Workflow created"
        );
        self.listeners.fire_state_changed(&instance);

        let handle = self.handle(instance.id);
        let guard = handle.run_lock.clone().lock_owned().await;
        instance.set_state(WorkflowState::Running);
        self.persist(&instance, WorkflowState::Instantiated, None)
            .await?;
        self.spawn_run(instance.id, guard);
        Ok(instance)
    }

    /// Run the instance in the current task until it pauses or finishes.
    ///
    /// Used to pick up stored instances, e.g. after a restart.
    pub async fn run(&self, id: i64) -> EngineResult<WorkflowInstance> {
        let handle = self.handle(id);
        let guard = handle.run_lock.clone().lock_owned().await;
        self.run_locked(id, guard).await
    }

    /// Wait until no driver is advancing the instance, then return it.
    pub async fn wait(&self, id: i64) -> EngineResult<WorkflowInstance> {
        let handle = self.handle(id);
        let _guard = handle.run_lock.lock().await;
        self.repository.load(id).await
    }

    /// Stop an instance.
    ///
    /// Refused while the current operation is paused and not abortable.
    pub async fn stop(&self, id: i64) -> EngineResult<WorkflowInstance> {
        let snapshot = self.repository.load(id).await?;
        if snapshot.state().is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "workflow {} is already {}",
                id,
                snapshot.state()
            )));
        }
        if let Some(op) = snapshot.current_operation()? {
            if op.state() == OperationState::Paused && op.abortable() == Some(false) {
                return Err(EngineError::InvalidTransition(format!(
                    "operation '{}' of workflow {} cannot be aborted",
                    op.template, id
                )));
            }
        }

        let handle = self.handle(id);
        handle.control.send_replace(ControlSignal::Stop);
        let _guard = handle.run_lock.lock().await;

        let mut instance = self.repository.load(id).await?;
        if instance.state() != WorkflowState::Stopped {
            if instance.state().is_terminal() {
                self.release(id);
                return Ok(instance);
            }
            let before = instance.state();
            let aborted = self.abort_paused_operation(&mut instance).await?;
            instance.set_state(WorkflowState::Stopped);
            self.driver.destroy_handlers(&instance).await;
            self.persist(&instance, before, aborted).await?;
            info!(workflow_id = id, "Workflow stopped");
        }
        self.release(id);
        Ok(instance)
    }

    /// Suspend an instance at the next operation boundary.
    pub async fn suspend(&self, id: i64) -> EngineResult<WorkflowInstance> {
        let snapshot = self.repository.load(id).await?;
        if snapshot.state().is_terminal() {
            return Err(EngineError::InvalidTransition(format!(
                "workflow {} is already {}",
                id,
                snapshot.state()
            )));
        }

        let handle = self.handle(id);
        handle.control.send_replace(ControlSignal::Suspend);
        let _guard = handle.run_lock.lock().await;

        let mut instance = self.repository.load(id).await?;
        if instance.state().is_active() && instance.state() != WorkflowState::Paused {
            let before = instance.state();
            instance.set_state(WorkflowState::Paused);
            self.persist(&instance, before, None).await?;
            info!(workflow_id = id, "Workflow suspended");
        }
        Ok(instance)
    }

    /// Resume a paused or suspended instance.
    ///
    /// The paused operation (if any) is continued in the calling task so
    /// refusals and configuration errors reach the caller. The rest of the
    /// workflow continues on a driver task.
    pub async fn resume(
        &self,
        id: i64,
        properties: BTreeMap<String, String>,
    ) -> EngineResult<WorkflowInstance> {
        let handle = self.handle(id);
        let guard = handle.run_lock.clone().lock_owned().await;

        let mut instance = self.repository.load(id).await?;
        if instance.state() != WorkflowState::Paused {
            return Err(EngineError::InvalidTransition(format!(
                "workflow {} is {}, not PAUSED",
                id,
                instance.state()
            )));
        }

        let paused_op = instance
            .current_operation()?
            .filter(|op| op.state() == OperationState::Paused)
            .is_some();

        let before = instance.state();
        handle.control.send_replace(ControlSignal::Run);
        if paused_op {
            let control = handle.control.subscribe();
            let outcome = self
                .driver
                .resume_operation(&mut instance, &control, &properties)
                .await?;
            let position = match outcome {
                StepOutcome::Advanced { position } | StepOutcome::Paused { position } => {
                    Some(position)
                }
                StepOutcome::Finished(_) => None,
            };
            self.persist(&instance, before, position).await?;
            match outcome {
                StepOutcome::Advanced { .. } => {}
                StepOutcome::Paused { .. } => return Ok(instance),
                StepOutcome::Finished(_) => {
                    self.release(id);
                    return Ok(instance);
                }
            }
        } else {
            instance.merge_configuration(&properties);
            instance.set_state(WorkflowState::Running);
            self.persist(&instance, before, None).await?;
        }

        info!(workflow_id = id, "Workflow resumed");
        self.spawn_run(id, guard);
        Ok(instance)
    }

    /// Store externally edited fields of an instance that is not running.
    pub async fn update(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        let handle = self.handle(instance.id);
        let _guard = handle.run_lock.try_lock().map_err(|_| {
            EngineError::InvalidTransition(format!(
                "workflow {} is being executed and cannot be updated",
                instance.id
            ))
        })?;

        let stored = self.repository.load(instance.id).await?;
        if stored.identity() != instance.identity() {
            return Err(EngineError::Validation(format!(
                "creator and organization of workflow {} cannot change",
                instance.id
            )));
        }

        let mut instance = instance.clone();
        instance.reindex();
        self.persist(&instance, stored.state(), None).await
    }

    pub async fn get(&self, id: i64) -> EngineResult<WorkflowInstance> {
        self.repository.load(id).await
    }

    pub async fn query(&self, query: &WorkflowQuery) -> EngineResult<WorkflowSet> {
        self.repository.query(query).await
    }

    pub async fn count(&self, state: Option<WorkflowState>) -> EngineResult<usize> {
        self.repository.count(state).await
    }

    /// Remove an instance. Active instances are only removed with `force`.
    pub async fn remove(&self, id: i64, force: bool) -> EngineResult<()> {
        let instance = self.repository.load(id).await?;
        if instance.state().is_active() && !force {
            return Err(EngineError::InvalidTransition(format!(
                "workflow {} is {} and cannot be removed",
                id,
                instance.state()
            )));
        }
        self.repository.remove(id).await?;
        self.release(id);
        info!(workflow_id = id, force, "Workflow removed");
        Ok(())
    }

    /// Remove instances in a terminal `state` that finished before `older_than`.
    ///
    /// Returns the number of removed instances.
    pub async fn cleanup(
        &self,
        older_than: DateTime<Utc>,
        state: WorkflowState,
    ) -> EngineResult<usize> {
        if !state.is_terminal() {
            return Err(EngineError::Validation(format!(
                "cleanup only applies to finished workflows, not {}",
                state
            )));
        }

        let candidates = self.find_all(&WorkflowQuery::new().with_state(state)).await?;
        let mut removed = 0;
        for instance in candidates {
            let finished = instance.date_completed().unwrap_or(instance.date_created);
            if finished < older_than {
                self.repository.remove(instance.id).await?;
                self.release(instance.id);
                removed += 1;
            }
        }
        info!(state = %state, removed, "Workflow cleanup finished");
        Ok(removed)
    }

    fn spawn_run(&self, id: i64, guard: OwnedMutexGuard<()>) {
        let service = self.clone();
        tokio::spawn(async move {
            service
                .run_locked(id, guard)
                .await
                .log(format!("running workflow {}", id))
                .ok();
        });
    }

    async fn run_locked(
        &self,
        id: i64,
        _guard: OwnedMutexGuard<()>,
    ) -> EngineResult<WorkflowInstance> {
        let handle = self.handle(id);
        let control = handle.control.subscribe();
        let mut instance = self.repository.load(id).await?;

        loop {
            let before = instance.state();
            if self
                .driver
                .observe_signal(&mut instance, &control)
                .await
                .is_some()
            {
                self.persist(&instance, before, None).await?;
                break;
            }

            let outcome = self.driver.step(&mut instance, &control).await?;
            let position = match outcome {
                StepOutcome::Advanced { position } | StepOutcome::Paused { position } => {
                    Some(position)
                }
                StepOutcome::Finished(_) => None,
            };
            self.persist(&instance, before, position).await?;

            match outcome {
                StepOutcome::Advanced { .. } => continue,
                StepOutcome::Paused { .. } | StepOutcome::Finished(_) => break,
            }
        }

        debug!(workflow_id = id, state = %instance.state(), "Driver released workflow");
        if instance.state().is_terminal() {
            self.release(id);
        }
        Ok(instance)
    }

    /// Save the instance and notify listeners about what changed.
    /// Fail a paused current operation that a stop aborts. Returns its position.
    async fn abort_paused_operation(
        &self,
        instance: &mut WorkflowInstance,
    ) -> EngineResult<Option<usize>> {
        let Some(idx) = instance.current_operation_index()? else {
            return Ok(None);
        };
        let op = instance.operation_mut(idx)?;
        if op.state() != OperationState::Paused {
            return Ok(None);
        }
        op.set_state(OperationState::Failed);
        let job_id = op.job_id();
        let message = format!("Operation '{}' was aborted while on hold", op.template);
        instance.add_error_message(message);
        if let Some(job_id) = job_id {
            self.driver
                .jobs()
                .update_status(job_id, JobStatus::Cancelled)
                .await
                .log("cancelling aborted operation job")
                .ok();
        }
        Ok(Some(idx))
    }

    async fn persist(
        &self,
        instance: &WorkflowInstance,
        before: WorkflowState,
        position: Option<usize>,
    ) -> EngineResult<()> {
        self.repository
            .save(instance)
            .await
            .log(format!("saving workflow {}", instance.id))?;
        if let Some(position) = position {
            self.listeners.fire_operation_changed(instance, position);
        }
        if instance.state() != before {
            self.listeners.fire_state_changed(instance);
        }
        Ok(())
    }

    async fn find_all(&self, query: &WorkflowQuery) -> EngineResult<Vec<WorkflowInstance>> {
        let mut found = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .repository
                .query(&query.clone().with_page(100, offset))
                .await?;
            let fetched = page.len();
            found.extend(page.items);
            offset += fetched;
            if fetched == 0 || offset >= page.total {
                return Ok(found);
            }
        }
    }

    fn handle(&self, id: i64) -> InstanceHandle {
        match self.handles.lock() {
            Ok(mut handles) => handles.entry(id).or_insert_with(InstanceHandle::new).clone(),
            Err(_) => {
                warn!(workflow_id = id, "Instance handle map poisoned");
                InstanceHandle::new()
            }
        }
    }

    fn release(&self, id: i64) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.remove(&id);
        }
    }
}

impl std::fmt::Debug for WorkflowService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowService")
            .field("driver", &self.driver)
            .field("listeners", &self.listeners)
            .finish()
    }
}

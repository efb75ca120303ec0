//! Execution driver: runs a workflow instance one operation at a time.
//!
//! The driver owns no instance state. Each call borrows the instance
//! mutably, so one instance is only ever advanced by one driver call at a
//! time; separate instances run on separate tasks.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::definition::{validate_definition, DefinitionRegistry, RetryStrategy};
use crate::engine::condition::{ConditionEvaluator, ConditionOutcome};
use crate::engine::control::{ControlReceiver, ControlSignal, JobContext};
use crate::engine::handler::{HandlerRegistry, OperationHandler};
use crate::engine::result::{Action, OperationResult};
use crate::error::{EngineError, EngineResult, OperationError};
use crate::jobs::{JobRegistry, JobStatus, NewJob};
use crate::model::{HoldReason, OperationState, WorkflowInstance, WorkflowState};
use crate::result_ext::{OptionResultExt, ResultExt};

/// Resume property that decides how a failed, held operation continues.
pub const RETRY_STRATEGY_PROPERTY: &str = "retryStrategy";

const START_OPERATION: &str = "START_OPERATION";
const RESUME_OPERATION: &str = "RESUME";

/// What one driver step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The operation at `position` concluded or was queued for retry.
    Advanced { position: usize },
    /// The operation at `position` is parked in a hold state.
    Paused { position: usize },
    /// No work is left; the instance ended in the given state.
    Finished(WorkflowState),
}

/// How a driver run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(WorkflowState),
    Paused,
    Suspended,
    Stopped,
}

/// Drives workflow instances through their operations.
pub struct ExecutionDriver {
    handlers: Arc<HandlerRegistry>,
    definitions: Arc<DefinitionRegistry>,
    jobs: Arc<dyn JobRegistry>,
    evaluator: ConditionEvaluator,
    config: EngineConfig,
}

impl ExecutionDriver {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        definitions: Arc<DefinitionRegistry>,
        jobs: Arc<dyn JobRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            handlers,
            definitions,
            jobs,
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn definitions(&self) -> &Arc<DefinitionRegistry> {
        &self.definitions
    }

    pub fn jobs(&self) -> &Arc<dyn JobRegistry> {
        &self.jobs
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run until the instance finishes, pauses, or an external signal arrives.
    ///
    /// Signals are observed between operations.
    pub async fn run(
        &self,
        instance: &mut WorkflowInstance,
        control: &ControlReceiver,
    ) -> EngineResult<RunOutcome> {
        loop {
            if let Some(outcome) = self.observe_signal(instance, control).await {
                return Ok(outcome);
            }
            match self.step(instance, control).await? {
                StepOutcome::Advanced { .. } => continue,
                StepOutcome::Paused { .. } => return Ok(RunOutcome::Paused),
                StepOutcome::Finished(state) => return Ok(RunOutcome::Finished(state)),
            }
        }
    }

    /// Apply a pending suspend or stop request, if any.
    pub async fn observe_signal(
        &self,
        instance: &mut WorkflowInstance,
        control: &ControlReceiver,
    ) -> Option<RunOutcome> {
        let signal = *control.borrow();
        match signal {
            ControlSignal::Run => None,
            ControlSignal::Suspend => {
                info!(workflow_id = instance.id, "Workflow suspended");
                instance.set_state(WorkflowState::Paused);
                Some(RunOutcome::Suspended)
            }
            ControlSignal::Stop => {
                info!(workflow_id = instance.id, "Workflow stopped");
                instance.set_state(WorkflowState::Stopped);
                self.destroy_handlers(instance).await;
                Some(RunOutcome::Stopped)
            }
        }
    }

    /// Execute the current operation once.
    pub async fn step(
        &self,
        instance: &mut WorkflowInstance,
        control: &ControlReceiver,
    ) -> EngineResult<StepOutcome> {
        let Some(idx) = instance.current_operation_index()? else {
            let state = self.finalize(instance).await;
            return Ok(StepOutcome::Finished(state));
        };

        match instance.operation_mut(idx)?.state() {
            OperationState::Paused => {
                instance.set_state(WorkflowState::Paused);
                return Ok(StepOutcome::Paused { position: idx });
            }
            OperationState::Running => {
                // Left behind by an interrupted driver.
                warn!(
                    workflow_id = instance.id,
                    position = idx,
                    "Resetting operation found RUNNING at pickup"
                );
                instance
                    .operation_mut(idx)?
                    .set_state(OperationState::Instantiated);
            }
            _ => {}
        }

        if instance.state() != WorkflowState::Failing {
            instance.set_state(WorkflowState::Running);
        }

        let operation = instance.operation_mut(idx)?.clone();
        let template = operation.template.clone();
        let configuration = instance.configuration();

        let skip_reason = match self.evaluator.evaluate(&operation, &configuration) {
            ConditionOutcome::Execute => None,
            ConditionOutcome::Skip { reason } => Some(reason),
        };

        let job = self
            .jobs
            .create_job(
                NewJob::new(template.clone(), START_OPERATION)
                    .with_arguments(vec![instance.id.to_string(), idx.to_string()])
                    .with_parent(instance.id)
                    .with_load(self.config.job_load),
            )
            .await?;
        instance
            .operation_mut(idx)?
            .begin_attempt(job.id, self.config.execution_host.clone());

        let operation = instance.operation_mut(idx)?.clone();
        let ctx = JobContext::new(
            instance.id,
            instance.identity().clone(),
            job.id,
            self.config.execution_host.clone(),
            control.clone(),
        );

        if let Some(reason) = skip_reason {
            debug!(workflow_id = instance.id, operation = %template, %reason, "Skipping operation");
            let result = match self.handlers.get(&template) {
                Some(handler) => self.call(handler.skip(instance, &operation, &ctx)).await,
                None => Ok(OperationResult::skip()),
            };
            return self.conclude(instance, idx, result).await;
        }

        info!(
            workflow_id = instance.id,
            operation = %template,
            position = idx,
            attempt = operation.failed_attempts() + 1,
            job_id = job.id,
            "Starting operation"
        );

        let result = match self.handlers.resolve(&template) {
            Ok(handler) => self.call(handler.start(instance, &operation, &ctx)).await,
            Err(e) => Err(e),
        };
        self.conclude(instance, idx, result).await
    }

    /// Continue the paused current operation.
    ///
    /// Properties are merged into the instance configuration. A failed
    /// operation held for error resolution needs the `retryStrategy`
    /// property set to `RETRY` or `NONE`.
    pub async fn resume_operation(
        &self,
        instance: &mut WorkflowInstance,
        control: &ControlReceiver,
        properties: &BTreeMap<String, String>,
    ) -> EngineResult<StepOutcome> {
        let idx = instance.current_operation_index()?.ok_or_else(|| {
            EngineError::InternalState(format!(
                "workflow {} has no current operation to resume",
                instance.id
            ))
        })?;
        let operation = instance.operation_mut(idx)?.clone();

        if operation.state() != OperationState::Paused {
            return Err(EngineError::InvalidTransition(format!(
                "operation '{}' of workflow {} is {}, not PAUSED",
                operation.template,
                instance.id,
                operation.state()
            )));
        }
        if operation.continuable() == Some(false) {
            return Err(EngineError::InvalidTransition(format!(
                "operation '{}' of workflow {} cannot be continued",
                operation.template, instance.id
            )));
        }

        if operation.hold_reason() == Some(HoldReason::ErrorResolution) {
            let strategy: RetryStrategy = properties
                .get(RETRY_STRATEGY_PROPERTY)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| EngineError::missing_key(RETRY_STRATEGY_PROPERTY))?
                .parse()?;

            instance.merge_configuration(properties);
            instance.set_state(WorkflowState::Running);
            info!(
                workflow_id = instance.id,
                operation = %operation.template,
                strategy = %strategy,
                "Resolving held operation failure"
            );

            return match strategy {
                RetryStrategy::Retry => {
                    instance.operation_mut(idx)?.set_state(OperationState::Retry);
                    self.sync_job(instance, idx).await;
                    self.step(instance, control).await
                }
                RetryStrategy::None => {
                    let outcome = self.fail_operation(instance, idx).await?;
                    self.sync_job(instance, idx).await;
                    Ok(outcome)
                }
                RetryStrategy::Hold => Err(EngineError::Validation(format!(
                    "'{}' must be RETRY or NONE to resolve a failed operation",
                    RETRY_STRATEGY_PROPERTY
                ))),
            };
        }

        instance.merge_configuration(properties);
        instance.operation_mut(idx)?.resume_running()?;
        instance.set_state(WorkflowState::Running);

        let job_id = match operation.job_id() {
            Some(id) => {
                self.jobs
                    .update_status(id, JobStatus::Running)
                    .await
                    .log("marking resumed job running")
                    .ok();
                id
            }
            None => {
                let job = self
                    .jobs
                    .create_job(
                        NewJob::new(operation.template.clone(), RESUME_OPERATION)
                            .with_parent(instance.id)
                            .with_load(self.config.job_load),
                    )
                    .await?;
                instance
                    .operation_mut(idx)?
                    .begin_attempt(job.id, self.config.execution_host.clone());
                job.id
            }
        };

        info!(
            workflow_id = instance.id,
            operation = %operation.template,
            job_id,
            "Resuming operation"
        );

        let operation = instance.operation_mut(idx)?.clone();
        let ctx = JobContext::new(
            instance.id,
            instance.identity().clone(),
            job_id,
            self.config.execution_host.clone(),
            control.clone(),
        )
        .with_properties(properties.clone());

        let result = match self.handlers.resolve(&operation.template) {
            Ok(handler) => {
                self.call(handler.resume(instance, &operation, &ctx, properties))
                    .await
            }
            Err(e) => Err(e),
        };
        self.conclude(instance, idx, result).await
    }

    /// Settle a terminal instance: pick its final state and tear down handlers.
    ///
    /// A FAILING instance becomes FAILED. Otherwise the instance fails when
    /// any failed operation was marked fail-on-exception, and succeeds if not.
    pub async fn finalize(&self, instance: &mut WorkflowInstance) -> WorkflowState {
        let state = match instance.state() {
            WorkflowState::Failing | WorkflowState::Failed => WorkflowState::Failed,
            WorkflowState::Stopped => WorkflowState::Stopped,
            _ if instance.has_failed_operation() => WorkflowState::Failed,
            _ => WorkflowState::Succeeded,
        };
        instance.set_state(state);
        info!(workflow_id = instance.id, state = %state, "Workflow finished");
        self.destroy_handlers(instance).await;
        state
    }

    /// Call `destroy` on the handler of every operation that ran.
    pub async fn destroy_handlers(&self, instance: &WorkflowInstance) {
        for operation in instance.operations() {
            if operation.job_id().is_none() {
                continue;
            }
            let Some(handler) = self
                .handlers
                .get(&operation.template)
                .log_none(format!("no handler to tear down '{}'", operation.template))
            else {
                continue;
            };
            if let Err(e) = handler.destroy(instance, &operation).await {
                warn!(
                    workflow_id = instance.id,
                    operation = %operation.template,
                    error = %e,
                    "Handler teardown failed"
                );
            }
        }
    }

    async fn call<F>(&self, fut: F) -> Result<OperationResult, OperationError>
    where
        F: Future<Output = Result<OperationResult, OperationError>>,
    {
        match self.config.operation_timeout() {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(OperationError::Timeout(limit.as_secs())),
            },
            None => fut.await,
        }
    }

    async fn conclude(
        &self,
        instance: &mut WorkflowInstance,
        idx: usize,
        result: Result<OperationResult, OperationError>,
    ) -> EngineResult<StepOutcome> {
        let result = result.and_then(|result| {
            result
                .extensions
                .iter()
                .try_for_each(|extension| validate_definition(extension))?;
            Ok(result)
        });
        let outcome = match result {
            Ok(result) => self.apply_result(instance, idx, result)?,
            Err(OperationError::Cancelled) => {
                let op = instance.operation_mut(idx)?;
                op.set_state(OperationState::Failed);
                let message = format!("Operation '{}' was cancelled", op.template);
                instance.add_error_message(message);
                if let Some(job_id) = instance.operation_mut(idx)?.job_id() {
                    self.jobs
                        .update_status(job_id, JobStatus::Cancelled)
                        .await
                        .log("cancelling operation job")
                        .ok();
                }
                return Ok(StepOutcome::Advanced { position: idx });
            }
            Err(err) => self.handle_failure(instance, idx, err).await?,
        };
        self.sync_job(instance, idx).await;
        Ok(outcome)
    }

    fn apply_result(
        &self,
        instance: &mut WorkflowInstance,
        idx: usize,
        result: OperationResult,
    ) -> EngineResult<StepOutcome> {
        if let Some(artifact) = result.artifact {
            instance.artifact = artifact;
        }
        instance.merge_configuration(&result.properties);

        let hold = match (result.action, instance.operation(idx)) {
            (Action::Pause, Some(op)) => self
                .handlers
                .get(&op.template)
                .and_then(|h| h.hold_state(op)),
            _ => None,
        };

        let workflow_id = instance.id;
        let op = instance.operation_mut(idx)?;
        op.time_in_queue_ms += result.time_in_queue_ms;

        let outcome = match result.action {
            Action::Continue => {
                op.set_state(OperationState::Succeeded);
                info!(workflow_id, operation = %op.template, "Operation succeeded");
                StepOutcome::Advanced { position: idx }
            }
            Action::Skip => {
                op.set_state(OperationState::Skipped);
                debug!(workflow_id, operation = %op.template, "Operation skipped");
                StepOutcome::Advanced { position: idx }
            }
            Action::Pause => {
                op.pause(
                    HoldReason::Handler,
                    result.allows_continue,
                    result.allows_abort,
                );
                if let Some(hold) = hold {
                    op.hold_state_ui_url = hold.ui_url;
                    op.hold_action_title = hold.action_title;
                }
                info!(
                    workflow_id,
                    operation = %op.template,
                    continuable = result.allows_continue,
                    abortable = result.allows_abort,
                    "Operation paused"
                );
                StepOutcome::Paused { position: idx }
            }
        };

        if matches!(outcome, StepOutcome::Paused { .. }) {
            instance.set_state(WorkflowState::Paused);
        }

        for extension in &result.extensions {
            instance.extend(extension);
        }

        Ok(outcome)
    }

    async fn handle_failure(
        &self,
        instance: &mut WorkflowInstance,
        idx: usize,
        err: OperationError,
    ) -> EngineResult<StepOutcome> {
        let workflow_id = instance.id;
        let op = instance.operation_mut(idx)?;
        let template = op.template.clone();
        let job_id = op.job_id().ok_or_else(|| {
            EngineError::InternalState(format!(
                "operation '{}' of workflow {} failed without a job",
                template, workflow_id
            ))
        })?;
        op.add_to_execution_history(job_id)?;

        warn!(
            workflow_id,
            operation = %template,
            attempt = op.failed_attempts(),
            max_attempts = op.max_attempts,
            error = %err,
            "Operation failed"
        );

        let exhausted = op.failed_attempts() == op.max_attempts;
        let strategy = op.retry_strategy;
        instance.add_error_message(format!("Operation '{}' failed: {}", template, err));

        if exhausted {
            return self.fail_operation(instance, idx).await;
        }

        match strategy {
            RetryStrategy::None => self.fail_operation(instance, idx).await,
            RetryStrategy::Retry => {
                instance
                    .operation_mut(idx)?
                    .set_state(OperationState::Retry);
                info!(workflow_id, operation = %template, "Operation scheduled for retry");
                Ok(StepOutcome::Advanced { position: idx })
            }
            RetryStrategy::Hold => {
                let op = instance.operation_mut(idx)?;
                op.pause(HoldReason::ErrorResolution, true, true);
                op.hold_action_title = Some("Resolve error".to_string());
                instance.set_state(WorkflowState::Paused);
                info!(workflow_id, operation = %template, "Operation held for error resolution");
                Ok(StepOutcome::Paused { position: idx })
            }
        }
    }

    /// Mark the operation FAILED and escalate according to its flags.
    async fn fail_operation(
        &self,
        instance: &mut WorkflowInstance,
        idx: usize,
    ) -> EngineResult<StepOutcome> {
        let workflow_id = instance.id;
        let op = instance.operation_mut(idx)?;
        op.set_state(OperationState::Failed);

        if !op.fail_on_exception {
            debug!(workflow_id, operation = %op.template, "Operation failure does not fail workflow");
            return Ok(StepOutcome::Advanced { position: idx });
        }

        let handler_id = op
            .exception_handler_workflow
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let Some(handler_id) = handler_id else {
            error!(workflow_id, operation = %op.template, "Workflow failed");
            instance.set_state(WorkflowState::Failed);
            let state = self.finalize(instance).await;
            return Ok(StepOutcome::Finished(state));
        };

        match self.definitions.get(&handler_id) {
            Ok(definition) => {
                info!(
                    workflow_id,
                    exception_workflow = %handler_id,
                    "Running exception handling workflow"
                );
                instance.set_state(WorkflowState::Failing);
                instance.skip_remaining_after(idx);
                instance.extend(&definition);
                Ok(StepOutcome::Advanced { position: idx })
            }
            Err(e) => {
                error!(workflow_id, exception_workflow = %handler_id, error = %e, "Workflow failed");
                instance.add_error_message(format!(
                    "Exception handling workflow '{}' is not available",
                    handler_id
                ));
                instance.set_state(WorkflowState::Failed);
                let state = self.finalize(instance).await;
                Ok(StepOutcome::Finished(state))
            }
        }
    }

    /// Mirror the operation state onto its job.
    async fn sync_job(&self, instance: &mut WorkflowInstance, idx: usize) {
        let Some(op) = instance.operation(idx) else {
            return;
        };
        let Some(job_id) = op.job_id() else {
            return;
        };
        let status = match op.state() {
            OperationState::Failed | OperationState::Retry => JobStatus::Failed,
            OperationState::Paused => JobStatus::Paused,
            OperationState::Skipped | OperationState::Succeeded => JobStatus::Finished,
            OperationState::Instantiated | OperationState::Running => return,
        };
        self.jobs
            .update_status(job_id, status)
            .await
            .log("synchronising operation job")
            .ok();
    }
}

impl std::fmt::Debug for ExecutionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionDriver")
            .field("handlers", &self.handlers)
            .field("definitions", &self.definitions)
            .field("config", &self.config)
            .finish()
    }
}

//! Workflow instances and position resolution.
//!
//! The instance owns its ordered operation list. Which operation is
//! "current" is never stored; it is derived from operation states every time
//! by [`WorkflowInstance::current_operation`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::definition::WorkflowDefinition;
use crate::engine::condition::single_placeholder;
use crate::error::{EngineError, EngineResult};
use crate::model::artifact::{Artifact, Identity};
use crate::model::operation::{OperationInstance, OperationState};

/// Overall state of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Instantiated,
    Running,
    Stopped,
    Paused,
    Succeeded,
    Failed,
    /// Working off an exception-handling workflow before failing.
    Failing,
}

impl WorkflowState {
    /// Succeeded, failed or stopped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instantiated => write!(f, "INSTANTIATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Failing => write!(f, "FAILING"),
        }
    }
}

/// One execution of a workflow definition against one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Assigned by the repository when the instance is first saved.
    #[serde(default)]
    pub id: i64,

    pub template: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,

    identity: Identity,

    pub artifact: Artifact,

    state: WorkflowState,

    operations: Vec<OperationInstance>,

    #[serde(default)]
    configuration: BTreeMap<String, String>,

    #[serde(default)]
    error_messages: Vec<String>,

    pub date_created: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Create an instance from a definition.
    ///
    /// Configuration is applied before the definition's operations are
    /// appended, so single-placeholder execution conditions resolve.
    pub fn new(
        definition: &WorkflowDefinition,
        artifact: Artifact,
        parent_id: Option<i64>,
        identity: Identity,
        configuration: BTreeMap<String, String>,
    ) -> Self {
        let mut instance = Self {
            id: 0,
            template: definition.id.clone(),
            title: definition.title.clone(),
            description: definition.description.clone(),
            parent_id,
            identity,
            artifact,
            state: WorkflowState::Instantiated,
            operations: Vec::new(),
            configuration,
            error_messages: Vec::new(),
            date_created: Utc::now(),
        };
        instance.extend(definition);
        instance
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn set_state(&mut self, state: WorkflowState) {
        if self.state != state {
            debug!(workflow_id = self.id, from = %self.state, to = %state, "Workflow state changed");
        }
        self.state = state;
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn creator(&self) -> &str {
        &self.identity.user
    }

    pub fn organization(&self) -> &str {
        &self.identity.organization
    }

    /// Snapshot of the operation list.
    ///
    /// Callers get a copy; the next driver tick may change the live list.
    pub fn operations(&self) -> Vec<OperationInstance> {
        self.operations.clone()
    }

    pub fn operation(&self, position: usize) -> Option<&OperationInstance> {
        self.operations.get(position)
    }

    pub(crate) fn operation_mut(&mut self, position: usize) -> EngineResult<&mut OperationInstance> {
        let id = self.id;
        self.operations.get_mut(position).ok_or_else(|| {
            EngineError::InternalState(format!(
                "workflow {} has no operation at position {}",
                id, position
            ))
        })
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    /// Replace the operation list wholesale and re-derive positions.
    pub fn set_operations(&mut self, operations: Vec<OperationInstance>) {
        self.operations = operations;
        self.reindex();
    }

    /// Make every operation's position match its index.
    pub fn reindex(&mut self) {
        for (idx, op) in self.operations.iter_mut().enumerate() {
            op.position = idx;
        }
    }

    /// Copy of the configuration map. Handlers mutate the copy, never the instance.
    pub fn configuration(&self) -> BTreeMap<String, String> {
        self.configuration.clone()
    }

    pub fn config(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(String::as_str)
    }

    pub fn set_config(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.configuration.insert(key.into(), value.into());
    }

    pub fn remove_config(&mut self, key: &str) -> Option<String> {
        self.configuration.remove(key)
    }

    /// Merge properties into the configuration, overwriting existing keys.
    pub fn merge_configuration(&mut self, properties: &BTreeMap<String, String>) {
        for (k, v) in properties {
            self.configuration.insert(k.clone(), v.clone());
        }
    }

    pub fn error_messages(&self) -> &[String] {
        &self.error_messages
    }

    pub fn add_error_message(&mut self, message: impl Into<String>) {
        self.error_messages.push(message.into());
    }

    /// Index of the current operation, if any.
    ///
    /// The first operation is current while it is INSTANTIATED or RETRY.
    /// Otherwise the list is scanned in order: RETRY/INSTANTIATED becomes
    /// current only directly after a SUCCEEDED, SKIPPED or FAILED
    /// predecessor; PAUSED and RUNNING are always current. When the scan
    /// lands on the last operation and that operation is terminal, the
    /// workflow has no current operation.
    pub fn current_operation_index(&self) -> EngineResult<Option<usize>> {
        let first = self.operations.first().ok_or_else(|| {
            EngineError::InternalState(format!("workflow {} has no operations", self.id))
        })?;

        if matches!(first.state(), OperationState::Instantiated | OperationState::Retry) {
            return Ok(Some(0));
        }

        let mut current = None;
        let mut previous: Option<OperationState> = None;
        for (idx, op) in self.operations.iter().enumerate() {
            match op.state() {
                OperationState::Retry | OperationState::Instantiated => {
                    if previous.map(|p| p.is_terminal()).unwrap_or(false) {
                        current = Some(idx);
                    }
                }
                OperationState::Paused | OperationState::Running => current = Some(idx),
                OperationState::Failed | OperationState::Skipped | OperationState::Succeeded => {}
            }
            previous = Some(op.state());
            if current.is_some() {
                break;
            }
        }

        if let Some(idx) = current {
            if idx + 1 == self.operations.len() && self.operations[idx].state().is_terminal() {
                return Ok(None);
            }
        }

        Ok(current)
    }

    /// The operation the driver should work on next.
    pub fn current_operation(&self) -> EngineResult<Option<&OperationInstance>> {
        Ok(self
            .current_operation_index()?
            .map(|idx| &self.operations[idx]))
    }

    /// Skip the current operation and return the new current one.
    pub fn advance(&mut self) -> EngineResult<Option<&OperationInstance>> {
        let idx = self.current_operation_index()?.ok_or_else(|| {
            EngineError::InternalState(format!(
                "workflow {} has no current operation to advance from",
                self.id
            ))
        })?;
        self.operations[idx].set_state(OperationState::Skipped);
        self.current_operation()
    }

    /// Whether there is more work after the current operation.
    pub fn has_next(&self) -> EngineResult<bool> {
        if matches!(
            self.state,
            WorkflowState::Failed
                | WorkflowState::Failing
                | WorkflowState::Stopped
                | WorkflowState::Succeeded
        ) {
            return Ok(false);
        }
        let last = self.operations.len().checked_sub(1).ok_or_else(|| {
            EngineError::InternalState(format!("workflow {} has no operations", self.id))
        })?;
        Ok(matches!(self.current_operation_index()?, Some(idx) if idx < last))
    }

    /// Append the operations of another definition.
    ///
    /// An execution condition that is exactly one `${key}` placeholder is
    /// replaced by the configured value once, here, if the key is set.
    pub fn extend(&mut self, definition: &WorkflowDefinition) {
        let start = self.operations.len();
        for (offset, op_def) in definition.operations.iter().enumerate() {
            let mut op = OperationInstance::from_definition(op_def, start + offset);
            let resolved = op
                .execution_condition
                .as_deref()
                .and_then(single_placeholder)
                .and_then(|key| self.configuration.get(key))
                .cloned();
            if let Some(value) = resolved {
                op.execution_condition = Some(value);
            }
            self.operations.push(op);
        }
        debug!(
            workflow_id = self.id,
            definition = %definition.id,
            appended = definition.operations.len(),
            total = self.operations.len(),
            "Extended workflow"
        );
    }

    /// Mark every not-yet-run operation after `position` as SKIPPED.
    pub(crate) fn skip_remaining_after(&mut self, position: usize) {
        for op in self.operations.iter_mut().skip(position + 1) {
            if matches!(op.state(), OperationState::Instantiated | OperationState::Retry) {
                op.set_state(OperationState::Skipped);
            }
        }
    }

    /// Whether any failed operation demands the whole workflow fail.
    pub fn has_failed_operation(&self) -> bool {
        self.operations
            .iter()
            .any(|op| op.state() == OperationState::Failed && op.fail_on_exception)
    }

    /// Completion time of the most recently completed operation.
    pub fn date_completed(&self) -> Option<DateTime<Utc>> {
        self.operations.iter().filter_map(|op| op.date_completed()).max()
    }
}

impl std::fmt::Display for WorkflowInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "workflow {} ({})", self.id, self.template)
    }
}

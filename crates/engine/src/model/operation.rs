//! Operation instances: the per-step execution record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{OperationDefinition, RetryStrategy};
use crate::error::{EngineError, EngineResult};

/// State of a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Created, not yet run.
    Instantiated,
    /// Handler is executing.
    Running,
    /// Parked in a hold state.
    Paused,
    /// Handler finished successfully.
    Succeeded,
    /// Handler failed and no recovery is left for this operation.
    Failed,
    /// Bypassed without running.
    Skipped,
    /// Failed, waiting to be run again.
    Retry,
}

impl OperationState {
    /// Succeeded, failed or skipped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instantiated => write!(f, "INSTANTIATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Retry => write!(f, "RETRY"),
        }
    }
}

/// Why an operation sits in PAUSED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// The handler asked for a pause.
    Handler,
    /// The operation failed under the HOLD retry strategy.
    ErrorResolution,
}

/// One step of a workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInstance {
    pub template: String,

    /// Index in the owning instance. Maintained by `WorkflowInstance::reindex`.
    #[serde(default)]
    pub position: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    state: OperationState,

    /// Job of the current (or last) execution attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job_id: Option<i64>,

    #[serde(default)]
    pub configuration: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_state_ui_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_action_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    hold_reason: Option<HoldReason>,

    /// Unset until the operation pauses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    continuable: Option<bool>,

    /// Unset until the operation pauses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    abortable: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_handler_workflow: Option<String>,

    pub fail_on_exception: bool,

    pub retry_strategy: RetryStrategy,

    pub max_attempts: u32,

    #[serde(default)]
    failed_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_started: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_completed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub time_in_queue_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_host: Option<String>,

    /// Job ids of failed attempts, oldest first.
    #[serde(default)]
    execution_history: Vec<i64>,
}

impl OperationInstance {
    /// Instantiate an operation from its definition.
    pub fn from_definition(definition: &OperationDefinition, position: usize) -> Self {
        Self {
            template: definition.id.clone(),
            position,
            description: definition.description.clone(),
            state: OperationState::Instantiated,
            job_id: None,
            configuration: definition.configuration.clone(),
            execution_condition: definition.execution_condition.clone(),
            skip_condition: definition.skip_condition.clone(),
            hold_state_ui_url: None,
            hold_action_title: None,
            hold_reason: None,
            continuable: None,
            abortable: None,
            exception_handler_workflow: definition.exception_handler_workflow.clone(),
            fail_on_exception: definition.fail_on_exception,
            retry_strategy: definition.retry_strategy,
            max_attempts: definition.max_attempts,
            failed_attempts: 0,
            date_started: None,
            date_completed: None,
            time_in_queue_ms: 0,
            execution_host: None,
            execution_history: Vec::new(),
        }
    }

    pub fn state(&self) -> OperationState {
        self.state
    }

    /// Set the state, stamping the completion time on terminal states.
    pub fn set_state(&mut self, state: OperationState) {
        if state.is_terminal() {
            self.date_completed = Some(Utc::now());
        }
        self.state = state;
    }

    pub fn job_id(&self) -> Option<i64> {
        self.job_id
    }

    pub fn date_started(&self) -> Option<DateTime<Utc>> {
        self.date_started
    }

    pub fn date_completed(&self) -> Option<DateTime<Utc>> {
        self.date_completed
    }

    /// Start an execution attempt under the given job.
    ///
    /// The job id is recorded before the start time.
    pub fn begin_attempt(&mut self, job_id: i64, host: impl Into<String>) {
        self.job_id = Some(job_id);
        self.date_started = Some(Utc::now());
        self.date_completed = None;
        self.execution_host = Some(host.into());
        self.state = OperationState::Running;
    }

    /// Continue a paused operation.
    pub fn resume_running(&mut self) -> EngineResult<()> {
        if self.state != OperationState::Paused {
            return Err(EngineError::InvalidTransition(format!(
                "operation '{}' is {}, not PAUSED",
                self.template, self.state
            )));
        }
        self.state = OperationState::Running;
        Ok(())
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn execution_history(&self) -> &[i64] {
        &self.execution_history
    }

    /// Record a failed execution attempt.
    pub fn add_to_execution_history(&mut self, job_id: i64) -> EngineResult<()> {
        if self.failed_attempts >= self.max_attempts {
            return Err(EngineError::InternalState(format!(
                "operation '{}' already failed {} of {} attempts",
                self.template, self.failed_attempts, self.max_attempts
            )));
        }
        self.execution_history.push(job_id);
        self.failed_attempts += 1;
        Ok(())
    }

    pub fn has_attempts_left(&self) -> bool {
        self.failed_attempts < self.max_attempts
    }

    /// Park the operation in PAUSED with explicit hold flags.
    pub fn pause(&mut self, reason: HoldReason, continuable: bool, abortable: bool) {
        self.hold_reason = Some(reason);
        self.continuable = Some(continuable);
        self.abortable = Some(abortable);
        self.state = OperationState::Paused;
    }

    pub fn hold_reason(&self) -> Option<HoldReason> {
        self.hold_reason
    }

    pub fn continuable(&self) -> Option<bool> {
        self.continuable
    }

    pub fn abortable(&self) -> Option<bool> {
        self.abortable
    }

    /// Optional configuration value; blank values count as absent.
    pub fn config(&self, key: &str) -> Option<&str> {
        self.configuration
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Required configuration value.
    pub fn required_config(&self, key: &str) -> EngineResult<&str> {
        self.config(key).ok_or_else(|| EngineError::missing_key(key))
    }

    pub fn config_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.config(key).unwrap_or(default)
    }

    /// Boolean configuration value (`"true"`, ASCII case-insensitive).
    pub fn config_flag(&self, key: &str, default: bool) -> bool {
        self.config(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn operation(max_attempts: u32) -> OperationInstance {
        let def = OperationDefinition::new("encode")
            .with_retry(RetryStrategy::Retry, max_attempts)
            .with_config("profile", "mp4-hd")
            .with_config("blank", "  ");
        OperationInstance::from_definition(&def, 2)
    }

    #[test]
    fn test_from_definition() {
        let op = operation(2);
        assert_eq!(op.template, "encode");
        assert_eq!(op.position, 2);
        assert_eq!(op.state(), OperationState::Instantiated);
        assert_eq!(op.job_id(), None);
        assert_eq!(op.continuable(), None);
        assert_eq!(op.abortable(), None);
    }

    #[test]
    fn test_begin_attempt_sets_job_before_start() {
        let mut op = operation(1);
        op.begin_attempt(41, "encoder-1");
        assert_eq!(op.state(), OperationState::Running);
        assert_eq!(op.job_id(), Some(41));
        assert!(op.date_started().is_some());
        assert_eq!(op.execution_host.as_deref(), Some("encoder-1"));
    }

    #[test]
    fn test_execution_history_tracks_failed_attempts() {
        let mut op = operation(2);
        assert_ok!(op.add_to_execution_history(10));
        assert!(op.has_attempts_left());
        assert_ok!(op.add_to_execution_history(11));
        assert!(!op.has_attempts_left());
        assert_eq!(op.execution_history(), &[10, 11]);
        assert_eq!(op.failed_attempts(), 2);

        let err = assert_err!(op.add_to_execution_history(12));
        assert!(err.is_internal());
        assert_eq!(op.execution_history().len() as u32, op.failed_attempts());
    }

    #[test]
    fn test_pause_sets_both_flags() {
        let mut op = operation(1);
        op.begin_attempt(1, "h");
        op.pause(HoldReason::Handler, true, false);
        assert_eq!(op.state(), OperationState::Paused);
        assert_eq!(op.continuable(), Some(true));
        assert_eq!(op.abortable(), Some(false));

        assert_ok!(op.resume_running());
        assert_eq!(op.state(), OperationState::Running);
        assert_err!(op.resume_running());
    }

    #[test]
    fn test_terminal_state_stamps_completion() {
        let mut op = operation(1);
        op.set_state(OperationState::Skipped);
        assert!(op.date_completed().is_some());
        assert!(op.state().is_terminal());
    }

    #[test]
    fn test_config_helpers() {
        let op = operation(1);
        assert_eq!(op.config("profile"), Some("mp4-hd"));
        assert_eq!(op.config("blank"), None);
        assert_eq!(op.config_or("missing", "fallback"), "fallback");

        let err = op.required_config("blank").unwrap_err();
        assert_eq!(err.to_string(), "Configuration key 'blank' is either missing or empty");
    }
}

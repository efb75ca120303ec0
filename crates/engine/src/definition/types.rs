//! Workflow definition types.
//!
//! Definitions are immutable templates. Instances reference them by id and
//! copy what they need at creation time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Policy applied when an operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// Fail the operation.
    #[default]
    #[serde(alias = "NONE")]
    None,
    /// Re-run the operation until max attempts is reached.
    #[serde(alias = "RETRY")]
    Retry,
    /// Park the operation for manual error resolution.
    #[serde(alias = "HOLD")]
    Hold,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Retry => write!(f, "RETRY"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

impl FromStr for RetryStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "RETRY" => Ok(Self::Retry),
            "HOLD" => Ok(Self::Hold),
            other => Err(EngineError::Validation(format!(
                "Unknown retry strategy '{}'",
                other
            ))),
        }
    }
}

/// One step of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationDefinition {
    /// Operation template id, used to look up the handler.
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Workflow appended to the instance when this operation fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_handler_workflow: Option<String>,

    #[serde(default = "default_true")]
    pub fail_on_exception: bool,

    /// Runs the operation only when it evaluates to `"true"`.
    #[serde(default, alias = "if", skip_serializing_if = "Option::is_none")]
    pub execution_condition: Option<String>,

    /// Skips the operation when it evaluates to `"true"`.
    #[serde(default, alias = "unless", skip_serializing_if = "Option::is_none")]
    pub skip_condition: Option<String>,

    #[serde(default)]
    pub retry_strategy: RetryStrategy,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    1
}

impl OperationDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            exception_handler_workflow: None,
            fail_on_exception: true,
            execution_condition: None,
            skip_condition: None,
            retry_strategy: RetryStrategy::None,
            max_attempts: default_max_attempts(),
            configuration: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_retry(mut self, strategy: RetryStrategy, max_attempts: u32) -> Self {
        self.retry_strategy = strategy;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_exception_handler(mut self, workflow_id: impl Into<String>) -> Self {
        self.exception_handler_workflow = Some(workflow_id.into());
        self
    }

    pub fn with_fail_on_exception(mut self, fail: bool) -> Self {
        self.fail_on_exception = fail;
        self
    }

    pub fn with_execution_condition(mut self, condition: impl Into<String>) -> Self {
        self.execution_condition = Some(condition.into());
        self
    }

    pub fn with_skip_condition(mut self, condition: impl Into<String>) -> Self {
        self.skip_condition = Some(condition.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }
}

/// Immutable workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    #[serde(default)]
    pub operations: Vec<OperationDefinition>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            description: None,
            tags: BTreeSet::new(),
            operations: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_operation(mut self, operation: OperationDefinition) -> Self {
        self.operations.push(operation);
        self
    }

    /// Check whether the definition carries a tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Get an operation by template id.
    pub fn get_operation(&self, id: &str) -> Option<&OperationDefinition> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Names of all exception-handling workflows referenced by operations.
    pub fn exception_handlers(&self) -> BTreeSet<&str> {
        self.operations
            .iter()
            .filter_map(|op| op.exception_handler_workflow.as_deref())
            .filter(|id| !id.trim().is_empty())
            .collect()
    }
}

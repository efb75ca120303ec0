//! What an operation handler hands back to the driver.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::definition::WorkflowDefinition;
use crate::model::Artifact;

/// How the workflow proceeds after a handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Operation succeeded, move on.
    Continue,
    /// Park the operation in a hold state.
    Pause,
    /// Operation did nothing, mark it skipped.
    Skip,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Continue => write!(f, "CONTINUE"),
            Action::Pause => write!(f, "PAUSE"),
            Action::Skip => write!(f, "SKIP"),
        }
    }
}

/// Result of one handler call.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub action: Action,

    /// Replacement artifact, if the handler produced one.
    pub artifact: Option<Artifact>,

    /// Merged into the instance configuration.
    pub properties: BTreeMap<String, String>,

    /// Hold flags, only meaningful for [`Action::Pause`].
    pub allows_continue: bool,
    pub allows_abort: bool,

    pub time_in_queue_ms: u64,

    /// Definitions appended to the workflow after this operation.
    pub extensions: Vec<Arc<WorkflowDefinition>>,
}

impl OperationResult {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            artifact: None,
            properties: BTreeMap::new(),
            allows_continue: true,
            allows_abort: true,
            time_in_queue_ms: 0,
            extensions: Vec::new(),
        }
    }

    pub fn proceed() -> Self {
        Self::new(Action::Continue)
    }

    pub fn pause() -> Self {
        Self::new(Action::Pause)
    }

    pub fn skip() -> Self {
        Self::new(Action::Skip)
    }

    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifact = Some(artifact);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_hold_flags(mut self, allows_continue: bool, allows_abort: bool) -> Self {
        self.allows_continue = allows_continue;
        self.allows_abort = allows_abort;
        self
    }

    pub fn with_time_in_queue(mut self, millis: u64) -> Self {
        self.time_in_queue_ms = millis;
        self
    }

    pub fn with_extension(mut self, definition: Arc<WorkflowDefinition>) -> Self {
        self.extensions.push(definition);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let result = OperationResult::pause()
            .with_property("approved", "false")
            .with_hold_flags(true, false)
            .with_time_in_queue(25);
        assert_eq!(result.action, Action::Pause);
        assert_eq!(result.properties.get("approved").map(String::as_str), Some("false"));
        assert!(result.allows_continue);
        assert!(!result.allows_abort);
        assert_eq!(result.time_in_queue_ms, 25);
        assert!(result.artifact.is_none());
    }
}

//! Pauses a workflow until an operator resumes it.

use async_trait::async_trait;
use mediaflow_engine::engine::{HoldState, JobContext, OperationHandler, OperationResult};
use mediaflow_engine::model::{OperationInstance, WorkflowInstance};
use mediaflow_engine::OperationError;

/// Manual hold.
///
/// Configuration:
/// - `continuable`: whether the operator may continue (default `true`)
/// - `abortable`: whether the operator may stop the workflow (default `true`)
/// - `ui-url`, `action-title`: hold-state details shown to the operator
pub struct HoldHandler;

#[async_trait]
impl OperationHandler for HoldHandler {
    fn name(&self) -> &str {
        "hold"
    }

    async fn start(
        &self,
        _instance: &WorkflowInstance,
        operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        Ok(OperationResult::pause().with_hold_flags(
            operation.config_flag("continuable", true),
            operation.config_flag("abortable", true),
        ))
    }

    fn hold_state(&self, operation: &OperationInstance) -> Option<HoldState> {
        Some(HoldState {
            ui_url: operation.config("ui-url").map(str::to_string),
            action_title: Some(operation.config_or("action-title", "Continue").to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, instance};
    use mediaflow_engine::definition::OperationDefinition;
    use mediaflow_engine::engine::Action;

    #[tokio::test]
    async fn test_hold_flags_from_configuration() {
        let instance = instance(OperationDefinition::new("hold").with_config("abortable", "false"));
        let (_tx, ctx) = context(1);
        let operation = instance.operation(0).unwrap();

        let result = HoldHandler.start(&instance, operation, &ctx).await.unwrap();

        assert_eq!(result.action, Action::Pause);
        assert!(result.allows_continue);
        assert!(!result.allows_abort);
    }

    #[test]
    fn test_hold_state_defaults() {
        let instance = instance(OperationDefinition::new("hold").with_config("ui-url", "/admin/hold"));
        let state = HoldHandler.hold_state(instance.operation(0).unwrap()).unwrap();

        assert_eq!(state.ui_url.as_deref(), Some("/admin/hold"));
        assert_eq!(state.action_title.as_deref(), Some("Continue"));
    }
}

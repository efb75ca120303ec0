//! Seeds workflow configuration with default values.

use std::collections::BTreeMap;

use async_trait::async_trait;
use mediaflow_engine::engine::{JobContext, OperationHandler, OperationResult};
use mediaflow_engine::model::{OperationInstance, WorkflowInstance};
use mediaflow_engine::OperationError;
use tracing::debug;

/// Copies the operation configuration into the workflow configuration,
/// leaving keys the workflow already carries untouched.
pub struct DefaultsHandler;

#[async_trait]
impl OperationHandler for DefaultsHandler {
    fn name(&self) -> &str {
        "defaults"
    }

    async fn start(
        &self,
        instance: &WorkflowInstance,
        operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        let defaults: BTreeMap<String, String> = operation
            .configuration
            .iter()
            .filter(|(key, _)| instance.config(key).is_none())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        debug!(
            workflow_id = instance.id,
            applied = defaults.len(),
            "Applying configuration defaults"
        );

        Ok(OperationResult::proceed().with_properties(defaults))
    }
}

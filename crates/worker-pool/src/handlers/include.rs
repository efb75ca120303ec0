//! Extends a running workflow with another registered definition.

use std::sync::Arc;

use async_trait::async_trait;
use mediaflow_engine::definition::DefinitionRegistry;
use mediaflow_engine::engine::{JobContext, OperationHandler, OperationResult};
use mediaflow_engine::model::{OperationInstance, WorkflowInstance};
use mediaflow_engine::OperationError;
use tracing::info;

/// Appends the operations of the definition named by `workflow-id`.
pub struct IncludeHandler {
    definitions: Arc<DefinitionRegistry>,
}

impl IncludeHandler {
    pub fn new(definitions: Arc<DefinitionRegistry>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl OperationHandler for IncludeHandler {
    fn name(&self) -> &str {
        "include"
    }

    async fn start(
        &self,
        instance: &WorkflowInstance,
        operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        let workflow_id = operation.required_config("workflow-id")?;
        let definition = self.definitions.get(workflow_id)?;

        info!(
            workflow_id = instance.id,
            included = %definition.id,
            operations = definition.operations.len(),
            "Including workflow definition"
        );

        Ok(OperationResult::proceed().with_extension(definition))
    }
}

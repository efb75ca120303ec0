//! Built-in operation handlers.

pub mod defaults;
pub mod hold;
pub mod include;
pub mod shell;

use std::sync::Arc;
use std::time::Duration;

use mediaflow_engine::definition::DefinitionRegistry;
use mediaflow_engine::engine::HandlerRegistry;
use mediaflow_engine::jobs::JobRegistry;
use mediaflow_engine::EngineResult;

pub use defaults::DefaultsHandler;
pub use hold::HoldHandler;
pub use include::IncludeHandler;
pub use shell::ShellHandler;

/// Register every built-in handler.
pub fn register_builtin(
    handlers: &HandlerRegistry,
    definitions: Arc<DefinitionRegistry>,
    jobs: Arc<dyn JobRegistry>,
    poll_interval: Duration,
) -> EngineResult<()> {
    handlers.register(DefaultsHandler)?;
    handlers.register(HoldHandler)?;
    handlers.register(IncludeHandler::new(definitions))?;
    handlers.register(ShellHandler::new(jobs, poll_interval))?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use mediaflow_engine::definition::{OperationDefinition, WorkflowDefinition};
    use mediaflow_engine::engine::{control_channel, ControlSender, JobContext};
    use mediaflow_engine::model::{Artifact, Identity, WorkflowInstance};

    pub fn instance(operation: OperationDefinition) -> WorkflowInstance {
        instance_with_config(operation, BTreeMap::new())
    }

    pub fn instance_with_config(
        operation: OperationDefinition,
        config: BTreeMap<String, String>,
    ) -> WorkflowInstance {
        let def = WorkflowDefinition::new("test").with_operation(operation);
        WorkflowInstance::new(
            &def,
            Artifact::new("mp-1"),
            None,
            Identity::new("admin", "mh_default_org"),
            config,
        )
    }

    pub fn context(job_id: i64) -> (ControlSender, JobContext) {
        let (tx, rx) = control_channel();
        let ctx = JobContext::new(1, Identity::new("admin", "mh_default_org"), job_id, "localhost", rx);
        (tx, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediaflow_engine::jobs::InMemoryJobRegistry;

    #[test]
    fn test_register_builtin() {
        let handlers = HandlerRegistry::new();
        register_builtin(
            &handlers,
            Arc::new(DefinitionRegistry::new()),
            Arc::new(InMemoryJobRegistry::new()),
            Duration::from_millis(10),
        )
        .unwrap();

        assert_eq!(handlers.list(), vec!["defaults", "hold", "include", "shell"]);
    }
}

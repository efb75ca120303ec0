//! Handlers and fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Notify;

use mediaflow_engine::config::EngineConfig;
use mediaflow_engine::definition::{DefinitionRegistry, OperationDefinition, WorkflowDefinition};
use mediaflow_engine::engine::{
    ExecutionDriver, HandlerRegistry, HoldState, JobContext, OperationHandler, OperationResult,
};
use mediaflow_engine::jobs::InMemoryJobRegistry;
use mediaflow_engine::model::{Artifact, Identity, OperationInstance, OperationState, WorkflowInstance};
use mediaflow_engine::services::WorkflowService;
use mediaflow_engine::OperationError;

/// Succeeds and records `<name>.done = true`.
pub struct Succeed(pub &'static str);

#[async_trait]
impl OperationHandler for Succeed {
    fn name(&self) -> &str {
        self.0
    }

    async fn start(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        Ok(OperationResult::proceed().with_property(format!("{}.done", self.0), "true"))
    }
}

/// Fails a number of times, then succeeds.
pub struct Flaky {
    pub name: &'static str,
    failures: AtomicU32,
    pub calls: AtomicU32,
}

impl Flaky {
    pub fn new(name: &'static str, failures: u32) -> Self {
        Self {
            name,
            failures: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(name: &'static str) -> Self {
        Self::new(name, u32::MAX)
    }
}

#[async_trait]
impl OperationHandler for Flaky {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(OperationError::ExecutionFailed(format!("{} crashed", self.name)));
        }
        Ok(OperationResult::proceed())
    }
}

/// Pauses with fixed hold flags; resuming continues.
pub struct Hold {
    pub name: &'static str,
    pub continuable: bool,
    pub abortable: bool,
}

#[async_trait]
impl OperationHandler for Hold {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        Ok(OperationResult::pause().with_hold_flags(self.continuable, self.abortable))
    }

    fn hold_state(&self, _operation: &OperationInstance) -> Option<HoldState> {
        Some(HoldState {
            ui_url: Some("/admin/review".to_string()),
            action_title: Some("Review".to_string()),
        })
    }
}

/// Blocks until released, or until the workflow is stopped.
/// Blocks inside `start` until opened or cancelled. Signals `entered`
/// once the handler is running.
pub struct Gate {
    pub name: &'static str,
    pub open: Arc<Notify>,
    pub entered: Arc<Notify>,
}

#[async_trait]
impl OperationHandler for Gate {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
        ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        self.entered.notify_one();
        tokio::select! {
            _ = self.open.notified() => Ok(OperationResult::proceed()),
            _ = ctx.cancelled() => Err(OperationError::Cancelled),
        }
    }
}

pub fn identity() -> Identity {
    Identity::new("admin", "mh_default_org")
}

pub fn definition(id: &str, ops: &[&str]) -> WorkflowDefinition {
    ops.iter().fold(WorkflowDefinition::new(id), |def, op| {
        def.with_operation(OperationDefinition::new(*op))
    })
}

pub fn instance(definition: &WorkflowDefinition) -> WorkflowInstance {
    instance_with_config(definition, BTreeMap::new())
}

pub fn instance_with_config(
    definition: &WorkflowDefinition,
    configuration: BTreeMap<String, String>,
) -> WorkflowInstance {
    let mut wf = WorkflowInstance::new(
        definition,
        Artifact::new("mp-1"),
        None,
        identity(),
        configuration,
    );
    wf.id = 1;
    wf
}

pub fn config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn handlers() -> Arc<HandlerRegistry> {
    let handlers = Arc::new(HandlerRegistry::new());
    for name in ["x", "y", "z", "w", "cleanup"] {
        handlers.register(Succeed(name)).unwrap();
    }
    handlers
}

pub fn driver(handlers: Arc<HandlerRegistry>, definitions: Arc<DefinitionRegistry>) -> ExecutionDriver {
    let config = EngineConfig {
        job_poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    ExecutionDriver::new(
        handlers,
        definitions,
        Arc::new(InMemoryJobRegistry::new()),
        config,
    )
}

pub fn service(handlers: Arc<HandlerRegistry>) -> WorkflowService {
    let config = EngineConfig {
        job_poll_interval_ms: 5,
        ..EngineConfig::default()
    };
    WorkflowService::in_memory(handlers, Arc::new(DefinitionRegistry::new()), config)
}

pub fn states(wf: &WorkflowInstance) -> Vec<OperationState> {
    wf.operations().iter().map(|op| op.state()).collect()
}

pub fn current(wf: &WorkflowInstance) -> Option<String> {
    wf.current_operation()
        .unwrap()
        .map(|op| op.template.clone())
}

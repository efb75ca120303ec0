//! Operation handler trait and registry.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::engine::control::JobContext;
use crate::engine::result::OperationResult;
use crate::error::{EngineError, EngineResult, OperationError};
use crate::model::{OperationInstance, WorkflowInstance};

/// Hold-state details a pausing handler exposes to an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoldState {
    pub ui_url: Option<String>,
    pub action_title: Option<String>,
}

/// A pluggable unit of work, registered under an operation template id.
///
/// Handlers read the instance but never mutate it; their effects come back
/// through [`OperationResult`].
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Template id this handler serves.
    fn name(&self) -> &str;

    /// Run the operation.
    async fn start(
        &self,
        instance: &WorkflowInstance,
        operation: &OperationInstance,
        ctx: &JobContext,
    ) -> Result<OperationResult, OperationError>;

    /// Called instead of `start` when the operation's conditions skip it.
    async fn skip(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
        _ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        Ok(OperationResult::skip())
    }

    /// Continue a paused operation with the operator's properties.
    async fn resume(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
        _ctx: &JobContext,
        properties: &BTreeMap<String, String>,
    ) -> Result<OperationResult, OperationError> {
        Ok(OperationResult::proceed().with_properties(properties.clone()))
    }

    /// Release resources once the workflow has finished.
    async fn destroy(
        &self,
        _instance: &WorkflowInstance,
        _operation: &OperationInstance,
    ) -> Result<(), OperationError> {
        Ok(())
    }

    /// Hold-state details used when this handler pauses.
    fn hold_state(&self, _operation: &OperationInstance) -> Option<HoldState> {
        None
    }
}

/// Operation handlers keyed by template id.
///
/// Lookups hand out `Arc`s so the driver resolves the handler fresh for every
/// attempt while registrations may change in between.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn OperationHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler under its name, replacing any previous one.
    pub fn register<H: OperationHandler + 'static>(&self, handler: H) -> EngineResult<()> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&self, handler: Arc<dyn OperationHandler>) -> EngineResult<()> {
        let name = handler.name().to_string();
        self.handlers
            .write()
            .map_err(|_| EngineError::InternalState("handler registry lock poisoned".to_string()))?
            .insert(name, handler);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> EngineResult<Option<Arc<dyn OperationHandler>>> {
        Ok(self
            .handlers
            .write()
            .map_err(|_| EngineError::InternalState("handler registry lock poisoned".to_string()))?
            .remove(name))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.read().ok()?.get(name).cloned()
    }

    /// Resolve a handler or fail the attempt.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn OperationHandler>, OperationError> {
        self.get(name)
            .ok_or_else(|| OperationError::HandlerNotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Registered template ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.list())
            .finish()
    }
}

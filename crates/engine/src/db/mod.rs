//! Persistence collaborator for workflow instances.

pub mod memory;
pub mod query;

use async_trait::async_trait;

use crate::error::EngineResult;
use crate::model::{WorkflowInstance, WorkflowState};

pub use memory::InMemoryRepository;
pub use query::{WorkflowQuery, WorkflowSet};

/// Durable storage for workflow instances.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Allocate a new instance id.
    async fn next_id(&self) -> EngineResult<i64>;

    /// Insert or replace an instance.
    async fn save(&self, instance: &WorkflowInstance) -> EngineResult<()>;

    async fn load(&self, id: i64) -> EngineResult<WorkflowInstance>;

    async fn query(&self, query: &WorkflowQuery) -> EngineResult<WorkflowSet>;

    /// Number of instances, optionally restricted to one state.
    async fn count(&self, state: Option<WorkflowState>) -> EngineResult<usize>;

    async fn remove(&self, id: i64) -> EngineResult<()>;
}

//! Repository that keeps serialized workflow documents in memory.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::query::{WorkflowQuery, WorkflowSet};
use crate::db::WorkflowRepository;
use crate::error::{EngineError, EngineResult};
use crate::model::{from_document, to_document, WorkflowInstance, WorkflowState};

/// In-memory repository.
///
/// Instances are stored as versioned JSON documents, so every load goes
/// through the same deserialize-and-reindex path a durable store would.
#[derive(Debug)]
pub struct InMemoryRepository {
    documents: RwLock<BTreeMap<i64, String>>,
    next_id: AtomicI64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    async fn all(&self) -> EngineResult<Vec<WorkflowInstance>> {
        self.documents
            .read()
            .await
            .values()
            .map(|doc| from_document(doc))
            .collect()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn next_id(&self) -> EngineResult<i64> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn save(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        if instance.id <= 0 {
            return Err(EngineError::Repository(format!(
                "cannot save workflow without an id ({})",
                instance.id
            )));
        }
        let document = to_document(instance)?;
        self.documents.write().await.insert(instance.id, document);
        debug!(workflow_id = instance.id, state = %instance.state(), "Saved workflow");
        Ok(())
    }

    async fn load(&self, id: i64) -> EngineResult<WorkflowInstance> {
        let documents = self.documents.read().await;
        let document = documents
            .get(&id)
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", id)))?;
        from_document(document)
    }

    async fn query(&self, query: &WorkflowQuery) -> EngineResult<WorkflowSet> {
        let matching: Vec<WorkflowInstance> = self
            .all()
            .await?
            .into_iter()
            .filter(|wf| query.matches(wf))
            .collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .collect();
        Ok(WorkflowSet {
            items,
            total,
            limit: query.limit(),
            offset: query.offset(),
        })
    }

    async fn count(&self, state: Option<WorkflowState>) -> EngineResult<usize> {
        Ok(self
            .all()
            .await?
            .iter()
            .filter(|wf| state.map_or(true, |s| wf.state() == s))
            .count())
    }

    async fn remove(&self, id: i64) -> EngineResult<()> {
        self.documents
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("workflow {}", id)))
    }
}

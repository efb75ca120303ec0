//! Versioned serialized form of a workflow instance.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::instance::WorkflowInstance;

/// Current document format version.
pub const DOCUMENT_VERSION: u32 = 1;

/// What the repository stores for each instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub version: u32,
    pub instance: WorkflowInstance,
}

impl WorkflowDocument {
    pub fn new(instance: WorkflowInstance) -> Self {
        Self {
            version: DOCUMENT_VERSION,
            instance,
        }
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored document.
    ///
    /// Operation positions are re-derived from list order after loading.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let mut doc: WorkflowDocument = serde_json::from_str(json)?;
        if doc.version != DOCUMENT_VERSION {
            return Err(EngineError::Validation(format!(
                "unsupported workflow document version {} (expected {})",
                doc.version, DOCUMENT_VERSION
            )));
        }
        doc.instance.reindex();
        Ok(doc)
    }

    pub fn into_instance(self) -> WorkflowInstance {
        self.instance
    }
}

/// Serialize an instance to its stored form.
pub fn to_document(instance: &WorkflowInstance) -> EngineResult<String> {
    WorkflowDocument::new(instance.clone()).to_json()
}

/// Restore an instance from its stored form.
pub fn from_document(json: &str) -> EngineResult<WorkflowInstance> {
    WorkflowDocument::from_json(json).map(WorkflowDocument::into_instance)
}

//! Runtime model: workflow instances, their operations and stored documents.

pub mod artifact;
pub mod document;
pub mod instance;
pub mod operation;

pub use artifact::{Artifact, Identity};
pub use document::{from_document, to_document, WorkflowDocument, DOCUMENT_VERSION};
pub use instance::{WorkflowInstance, WorkflowState};
pub use operation::{HoldReason, OperationInstance, OperationState};

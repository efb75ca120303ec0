//! Workflow definitions: types, YAML parsing and the definition registry.

pub mod parser;
pub mod registry;
pub mod types;

pub use parser::{parse_definition, parse_definition_file, validate_definition};
pub use registry::DefinitionRegistry;
pub use types::{OperationDefinition, RetryStrategy, WorkflowDefinition};

//! Workflow definition YAML parser.
//!
//! Parses and validates definition documents:
//!
//! ```yaml
//! id: publish
//! title: Publish recording
//! tags: [upload, schedule]
//! operations:
//!   - id: inspect
//!   - id: encode
//!     retry-strategy: retry
//!     max-attempts: 2
//!     exception-handler-workflow: cleanup
//!   - id: publish-engage
//!     if: "${publishToEngage}"
//! ```

use std::path::Path;

use crate::definition::types::{RetryStrategy, WorkflowDefinition};
use crate::error::{EngineError, EngineResult};

/// Parse a YAML string into a validated workflow definition.
pub fn parse_definition(yaml_content: &str) -> EngineResult<WorkflowDefinition> {
    let definition: WorkflowDefinition = serde_yaml::from_str(yaml_content)?;
    validate_definition(&definition)?;
    Ok(definition)
}

/// Read and parse a definition file.
pub fn parse_definition_file(path: &Path) -> EngineResult<WorkflowDefinition> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::Parse(format!("Unable to read {}: {}", path.display(), e))
    })?;
    parse_definition(&content).map_err(|e| match e {
        EngineError::Validation(msg) => {
            EngineError::Validation(format!("{}: {}", path.display(), msg))
        }
        EngineError::Parse(msg) => EngineError::Parse(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}

/// Validate a parsed definition.
pub fn validate_definition(definition: &WorkflowDefinition) -> EngineResult<()> {
    if definition.id.trim().is_empty() {
        return Err(EngineError::Validation(
            "Workflow definition must have an id".to_string(),
        ));
    }

    if definition.operations.is_empty() {
        return Err(EngineError::Validation(format!(
            "Workflow definition '{}' has no operations",
            definition.id
        )));
    }

    for (idx, op) in definition.operations.iter().enumerate() {
        if op.id.trim().is_empty() {
            return Err(EngineError::Validation(format!(
                "Operation {} of '{}' has no id",
                idx, definition.id
            )));
        }

        if op.max_attempts == 0 {
            let hint = match op.retry_strategy {
                RetryStrategy::None => "",
                RetryStrategy::Retry | RetryStrategy::Hold => {
                    " (retry strategy needs at least one attempt)"
                }
            };
            return Err(EngineError::Validation(format!(
                "Operation '{}' of '{}' must allow at least one attempt{}",
                op.id, definition.id, hint
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition() {
        let yaml = r#"
id: publish
title: Publish recording
tags: [upload, schedule]
operations:
  - id: inspect
  - id: encode
    retry-strategy: retry
    max-attempts: 2
    exception-handler-workflow: cleanup
    configuration:
      profile: mp4-hd
  - id: publish-engage
    if: "${publishToEngage}"
"#;
        let def = parse_definition(yaml).unwrap();
        assert_eq!(def.id, "publish");
        assert!(def.has_tag("upload"));
        assert_eq!(def.operations.len(), 3);

        let encode = def.get_operation("encode").unwrap();
        assert_eq!(encode.retry_strategy, RetryStrategy::Retry);
        assert_eq!(encode.configuration.get("profile").map(String::as_str), Some("mp4-hd"));
        assert_eq!(
            def.operations[2].execution_condition.as_deref(),
            Some("${publishToEngage}")
        );
    }

    #[test]
    fn test_rejects_empty_operations() {
        let err = parse_definition("id: nothing\noperations: []").unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let yaml = "id: wf\noperations:\n  - id: encode\n    retry-strategy: hold\n    max-attempts: 0\n";
        let err = parse_definition(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one attempt"));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let err = parse_definition("id: [unterminated").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_parse_definition_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "id: broken\noperations: []\n").unwrap();

        let err = parse_definition_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.yaml"));
    }
}

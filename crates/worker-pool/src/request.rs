//! Workflow requests handed to the worker.

use std::collections::BTreeMap;
use std::path::Path;

use mediaflow_engine::model::Artifact;

use crate::error::{WorkerError, WorkerResult};

/// One workflow to run: a registered definition applied to an artifact.
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub definition_id: String,
    pub artifact: Artifact,
    pub configuration: BTreeMap<String, String>,
}

impl WorkflowRequest {
    pub fn new(definition_id: impl Into<String>, artifact: Artifact) -> Self {
        Self {
            definition_id: definition_id.into(),
            artifact,
            configuration: BTreeMap::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: BTreeMap<String, String>) -> Self {
        self.configuration = configuration;
        self
    }
}

/// Parse a `key=value` pair. The value may be empty and may contain `=`.
pub fn parse_config_pair(pair: &str) -> WorkerResult<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(WorkerError::InvalidPair(pair.to_string())),
    }
}

/// Load an artifact from a JSON file (`{"id": ..., "payload": ...}`).
pub fn load_artifact(path: &Path) -> WorkerResult<Artifact> {
    let artifact_err = |message: String| WorkerError::Artifact {
        path: path.to_path_buf(),
        message,
    };
    let content = std::fs::read_to_string(path).map_err(|e| artifact_err(e.to_string()))?;
    let artifact: Artifact =
        serde_json::from_str(&content).map_err(|e| artifact_err(e.to_string()))?;
    if artifact.id.trim().is_empty() {
        return Err(artifact_err("artifact id is empty".to_string()));
    }
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config_pair() {
        assert_eq!(
            parse_config_pair("flavor=presenter/source").unwrap(),
            ("flavor".to_string(), "presenter/source".to_string())
        );
        assert_eq!(
            parse_config_pair("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_config_pair("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(matches!(
            parse_config_pair("novalue"),
            Err(WorkerError::InvalidPair(_))
        ));
        assert!(matches!(
            parse_config_pair("=value"),
            Err(WorkerError::InvalidPair(_))
        ));
    }

    #[test]
    fn test_load_artifact() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"id": "mp-7", "payload": {{"title": "Lecture 7"}}}}"#).unwrap();

        let artifact = load_artifact(file.path()).unwrap();
        assert_eq!(artifact.id, "mp-7");
        assert_eq!(artifact.payload["title"], "Lecture 7");
    }

    #[test]
    fn test_load_artifact_rejects_blank_id() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"id": " "}}"#).unwrap();

        assert!(matches!(
            load_artifact(file.path()),
            Err(WorkerError::Artifact { .. })
        ));
    }
}

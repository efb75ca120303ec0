//! Registry of known workflow definitions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::definition::parser::{parse_definition_file, validate_definition};
use crate::definition::types::WorkflowDefinition;
use crate::error::{EngineError, EngineResult};

/// Registry of workflow definitions, keyed by id.
///
/// Used to resolve exception-handling workflows and `include` targets
/// while an instance is running.
#[derive(Default)]
pub struct DefinitionRegistry {
    definitions: RwLock<BTreeMap<String, Arc<WorkflowDefinition>>>,
}

impl DefinitionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validated definition. Ids must be unique.
    pub fn register(&self, definition: WorkflowDefinition) -> EngineResult<Arc<WorkflowDefinition>> {
        validate_definition(&definition)?;
        let mut definitions = self.write()?;
        if definitions.contains_key(&definition.id) {
            return Err(EngineError::Validation(format!(
                "Workflow definition '{}' is already registered",
                definition.id
            )));
        }
        let id = definition.id.clone();
        let definition = Arc::new(definition);
        definitions.insert(id.clone(), Arc::clone(&definition));
        debug!(definition = %id, "Registered workflow definition");
        Ok(definition)
    }

    /// Get a definition by id.
    pub fn get(&self, id: &str) -> EngineResult<Arc<WorkflowDefinition>> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("Workflow definition '{}'", id)))
    }

    /// Check if a definition is registered.
    pub fn has(&self, id: &str) -> bool {
        self.read().map(|d| d.contains_key(id)).unwrap_or(false)
    }

    /// List all registered definitions, ordered by id.
    pub fn list(&self) -> Vec<Arc<WorkflowDefinition>> {
        self.read()
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Load every `*.yaml` / `*.yml` file in a directory.
    ///
    /// Returns the number of definitions loaded.
    pub fn load_dir(&self, dir: &Path) -> EngineResult<usize> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            EngineError::Parse(format!("Unable to read {}: {}", dir.display(), e))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let definition = parse_definition_file(&path)?;
            self.register(definition)?;
            loaded += 1;
        }

        info!(dir = %dir.display(), count = loaded, "Loaded workflow definitions");
        Ok(loaded)
    }

    fn read(
        &self,
    ) -> EngineResult<std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<WorkflowDefinition>>>> {
        self.definitions
            .read()
            .map_err(|_| EngineError::InternalState("definition registry lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> EngineResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<WorkflowDefinition>>>> {
        self.definitions
            .write()
            .map_err(|_| EngineError::InternalState("definition registry lock poisoned".to_string()))
    }
}

impl std::fmt::Debug for DefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<String> = self.list().iter().map(|d| d.id.clone()).collect();
        f.debug_struct("DefinitionRegistry")
            .field("definitions", &ids)
            .finish()
    }
}

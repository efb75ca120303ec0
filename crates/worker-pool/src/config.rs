//! Worker configuration.

use std::path::PathBuf;

use anyhow::Result;
use mediaflow_engine::model::Identity;

/// Worker process configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker identifier (UUID).
    pub worker_id: String,

    /// Directory of YAML workflow definitions.
    pub definitions_dir: PathBuf,

    /// Maximum workflows driven at the same time.
    pub max_concurrent_workflows: usize,

    /// Emit logs as JSON lines.
    pub log_json: bool,

    /// Organization new workflows are created under.
    pub organization: String,

    /// User new workflows are created by.
    pub user: String,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let worker_id =
            std::env::var("WORKER_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let definitions_dir = std::env::var("WORKER_DEFINITIONS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("definitions"));

        let max_concurrent: usize = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(4);

        let log_json = std::env::var("WORKER_LOG_JSON")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let organization = std::env::var("WORKER_ORGANIZATION")
            .unwrap_or_else(|_| "mh_default_org".to_string());

        let user = std::env::var("WORKER_USER").unwrap_or_else(|_| "admin".to_string());

        Ok(Self {
            worker_id,
            definitions_dir,
            max_concurrent_workflows: max_concurrent,
            log_json,
            organization,
            user,
        })
    }

    /// Identity stamped on workflows this worker starts.
    pub fn identity(&self) -> Identity {
        Identity::new(self.user.clone(), self.organization.clone())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            definitions_dir: PathBuf::from("definitions"),
            max_concurrent_workflows: 4,
            log_json: false,
            organization: "mh_default_org".to_string(),
            user: "admin".to_string(),
        }
    }
}

//! Engine configuration loaded from environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineResult;

/// Engine configuration.
///
/// Environment variables are prefixed with `MEDIAFLOW_`:
/// - `MEDIAFLOW_JOB_POLL_INTERVAL_MS`: job barrier polling interval (default: 500)
/// - `MEDIAFLOW_OPERATION_TIMEOUT_SECS`: upper bound for one handler call (optional)
/// - `MEDIAFLOW_JOB_LOAD`: load recorded on dispatched operation jobs (default: 1.0)
/// - `MEDIAFLOW_EXECUTION_HOST`: host name stamped on running operations
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_poll_interval")]
    pub job_poll_interval_ms: u64,

    /// Unset means handlers may run as long as they like.
    #[serde(default)]
    pub operation_timeout_secs: Option<u64>,

    #[serde(default = "default_job_load")]
    pub job_load: f32,

    #[serde(default = "default_execution_host")]
    pub execution_host: String,
}

fn default_poll_interval() -> u64 {
    500
}

fn default_job_load() -> f32 {
    1.0
}

fn default_execution_host() -> String {
    "localhost".to_string()
}

impl EngineConfig {
    /// Load configuration from `MEDIAFLOW_`-prefixed environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Ok(envy::prefixed("MEDIAFLOW_").from_env::<EngineConfig>()?)
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms.max(1))
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }

    pub fn with_execution_host(mut self, host: impl Into<String>) -> Self {
        self.execution_host = host.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            job_poll_interval_ms: default_poll_interval(),
            operation_timeout_secs: None,
            job_load: default_job_load(),
            execution_host: default_execution_host(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.job_poll_interval(), Duration::from_millis(500));
        assert!(config.operation_timeout().is_none());
        assert_eq!(config.execution_host, "localhost");
    }

    #[test]
    fn test_from_iter_uses_defaults() {
        let vars = vec![
            ("MEDIAFLOW_OPERATION_TIMEOUT_SECS".to_string(), "90".to_string()),
            ("MEDIAFLOW_EXECUTION_HOST".to_string(), "encoder-3".to_string()),
        ];
        let config: EngineConfig = envy::prefixed("MEDIAFLOW_").from_iter(vars).unwrap();
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(90)));
        assert_eq!(config.execution_host, "encoder-3");
        assert_eq!(config.job_poll_interval_ms, 500);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = EngineConfig {
            job_poll_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.job_poll_interval(), Duration::from_millis(1));
    }
}

//! Artifact and identity types carried by a workflow instance.

use serde::{Deserialize, Serialize};

/// The media package (or similar) a workflow processes.
///
/// The engine never inspects the payload; it only hands it to handlers and
/// replaces it with whatever a handler returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Artifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Creator and tenant of a workflow instance. Fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
    pub organization: String,
}

impl Identity {
    pub fn new(user: impl Into<String>, organization: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            organization: organization.into(),
        }
    }
}

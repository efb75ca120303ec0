//! Workflow query filter and result page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{WorkflowInstance, WorkflowState};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 100;

/// Filter for listing workflow instances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowQuery {
    pub state: Option<WorkflowState>,
    pub artifact_id: Option<String>,
    pub template: Option<String>,
    pub organization: Option<String>,
    pub creator: Option<String>,
    /// Only instances whose current operation has this template.
    pub current_operation: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl WorkflowQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: WorkflowState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_artifact(mut self, artifact_id: impl Into<String>) -> Self {
        self.artifact_id = Some(artifact_id.into());
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    pub fn with_current_operation(mut self, template: impl Into<String>) -> Self {
        self.current_operation = Some(template.into());
        self
    }

    pub fn with_page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Page size, clamped to 1..=100.
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    /// Whether an instance passes every set filter.
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        if self.state.is_some_and(|s| s != instance.state()) {
            return false;
        }
        if self
            .artifact_id
            .as_deref()
            .is_some_and(|id| id != instance.artifact.id)
        {
            return false;
        }
        if self
            .template
            .as_deref()
            .is_some_and(|t| t != instance.template)
        {
            return false;
        }
        if self
            .organization
            .as_deref()
            .is_some_and(|o| o != instance.organization())
        {
            return false;
        }
        if self
            .creator
            .as_deref()
            .is_some_and(|c| c != instance.creator())
        {
            return false;
        }
        if self
            .created_after
            .is_some_and(|after| instance.date_created <= after)
        {
            return false;
        }
        if let Some(template) = self.current_operation.as_deref() {
            let current = instance.current_operation().ok().flatten();
            if current.map(|op| op.template.as_str()) != Some(template) {
                return false;
            }
        }
        true
    }
}

/// One page of query results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSet {
    pub items: Vec<WorkflowInstance>,
    /// Matches before paging.
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

impl WorkflowSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

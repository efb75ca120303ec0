//! Workflow listeners and fire-and-forget notification.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::warn;

use crate::model::WorkflowInstance;

/// Observer of workflow progress.
///
/// Notifications run on their own tasks with a snapshot of the instance.
/// A failing listener is logged and never affects the workflow.
#[async_trait]
pub trait WorkflowListener: Send + Sync {
    async fn state_changed(&self, _instance: &WorkflowInstance) -> anyhow::Result<()> {
        Ok(())
    }

    async fn operation_changed(
        &self,
        _instance: &WorkflowInstance,
        _position: usize,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registered listeners.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn WorkflowListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn WorkflowListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Remove a listener by identity. Returns whether it was registered.
    pub fn remove(&self, listener: &Arc<dyn WorkflowListener>) -> bool {
        let Ok(mut listeners) = self.listeners.write() else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn WorkflowListener>> {
        self.listeners.read().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn fire_state_changed(&self, instance: &WorkflowInstance) {
        let snapshot = Arc::new(instance.clone());
        for listener in self.snapshot() {
            let instance = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.state_changed(&instance).await {
                    warn!(workflow_id = instance.id, error = %e, "Listener failed on state change");
                }
            });
        }
    }

    pub fn fire_operation_changed(&self, instance: &WorkflowInstance, position: usize) {
        let snapshot = Arc::new(instance.clone());
        for listener in self.snapshot() {
            let instance = snapshot.clone();
            tokio::spawn(async move {
                if let Err(e) = listener.operation_changed(&instance, position).await {
                    warn!(
                        workflow_id = instance.id,
                        position,
                        error = %e,
                        "Listener failed on operation change"
                    );
                }
            });
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{OperationDefinition, WorkflowDefinition};
    use crate::model::{Artifact, Identity, WorkflowState};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Recorder(mpsc::UnboundedSender<WorkflowState>);

    #[async_trait]
    impl WorkflowListener for Recorder {
        async fn state_changed(&self, instance: &WorkflowInstance) -> anyhow::Result<()> {
            self.0.send(instance.state())?;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl WorkflowListener for Broken {
        async fn state_changed(&self, _instance: &WorkflowInstance) -> anyhow::Result<()> {
            anyhow::bail!("listener is broken")
        }
    }

    fn instance() -> WorkflowInstance {
        let def = WorkflowDefinition::new("wf").with_operation(OperationDefinition::new("x"));
        WorkflowInstance::new(
            &def,
            Artifact::new("mp"),
            None,
            Identity::new("admin", "org"),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_fire_reaches_listeners_despite_failures() {
        let set = ListenerSet::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        set.add(Arc::new(Broken));
        set.add(Arc::new(Recorder(tx)));

        set.fire_state_changed(&instance());

        let state = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert_eq!(state, Some(WorkflowState::Instantiated));
    }

    #[test]
    fn test_remove_by_identity() {
        let set = ListenerSet::new();
        let a: Arc<dyn WorkflowListener> = Arc::new(Broken);
        let b: Arc<dyn WorkflowListener> = Arc::new(Broken);
        set.add(a.clone());
        set.add(b.clone());

        assert!(set.remove(&a));
        assert!(!set.remove(&a));
        assert_eq!(set.len(), 1);
    }
}

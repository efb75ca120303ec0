//! Workflow service lifecycle tests.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, Notify};

use common::*;
use mediaflow_engine::db::WorkflowQuery;
use mediaflow_engine::model::{Artifact, OperationState, WorkflowInstance, WorkflowState};
use mediaflow_engine::services::WorkflowListener;
use mediaflow_engine::EngineError;

struct StateRecorder(mpsc::UnboundedSender<WorkflowState>);

#[async_trait]
impl WorkflowListener for StateRecorder {
    async fn state_changed(&self, instance: &WorkflowInstance) -> anyhow::Result<()> {
        self.0.send(instance.state())?;
        Ok(())
    }
}

async fn next_state(rx: &mut mpsc::UnboundedReceiver<WorkflowState>) -> WorkflowState {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("listener notification")
        .expect("listener channel open")
}

#[tokio::test]
async fn test_start_runs_to_completion() {
    let service = service(handlers());
    let (tx, mut rx) = mpsc::unbounded_channel();
    service.add_listener(Arc::new(StateRecorder(tx)));

    let started = service
        .start(
            &definition("publish", &["x", "y", "z"]),
            Artifact::new("mp-1"),
            None,
            identity(),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    assert!(started.id > 0);
    assert_eq!(started.state(), WorkflowState::Running);

    let finished = service.wait(started.id).await.unwrap();
    assert_eq!(finished.state(), WorkflowState::Succeeded);
    assert_eq!(finished.creator(), "admin");
    assert_eq!(finished.organization(), "mh_default_org");

    // Notifications run on their own tasks, so only membership is checked.
    let expected = [
        WorkflowState::Instantiated,
        WorkflowState::Running,
        WorkflowState::Succeeded,
    ];
    let mut seen = Vec::new();
    while !expected.iter().all(|s| seen.contains(s)) {
        seen.push(next_state(&mut rx).await);
    }

    assert_eq!(service.count(Some(WorkflowState::Succeeded)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_pause_then_resume_through_service() {
    let handlers = handlers();
    handlers
        .register(Hold {
            name: "y",
            continuable: true,
            abortable: true,
        })
        .unwrap();
    let service = service(handlers);

    let started = service
        .start(
            &definition("publish", &["x", "y", "z"]),
            Artifact::new("mp-1"),
            None,
            identity(),
            BTreeMap::new(),
        )
        .await
        .unwrap();
    let paused = service.wait(started.id).await.unwrap();
    assert_eq!(paused.state(), WorkflowState::Paused);
    assert_eq!(paused.operations()[1].state(), OperationState::Paused);

    let resumed = service
        .resume(started.id, config(&[("approved", "true")]))
        .await
        .unwrap();
    assert_eq!(resumed.operations()[1].state(), OperationState::Succeeded);

    let finished = service.wait(started.id).await.unwrap();
    assert_eq!(finished.state(), WorkflowState::Succeeded);
    assert_eq!(finished.config("approved"), Some("true"));
}

#[tokio::test]
async fn test_stop_respects_abortable_flag() {
    let handlers = handlers();
    handlers
        .register(Hold {
            name: "x",
            continuable: true,
            abortable: false,
        })
        .unwrap();
    handlers
        .register(Hold {
            name: "y",
            continuable: true,
            abortable: true,
        })
        .unwrap();
    let service = service(handlers);

    let locked = service
        .start(&definition("a", &["x"]), Artifact::new("mp-1"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    service.wait(locked.id).await.unwrap();
    let err = service.stop(locked.id).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(_)));
    assert_eq!(service.get(locked.id).await.unwrap().state(), WorkflowState::Paused);

    let open = service
        .start(&definition("b", &["y"]), Artifact::new("mp-2"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    service.wait(open.id).await.unwrap();
    let stopped = service.stop(open.id).await.unwrap();
    assert_eq!(stopped.state(), WorkflowState::Stopped);
    assert_eq!(stopped.operations()[0].state(), OperationState::Failed);
    assert_eq!(stopped.error_messages().len(), 1);
    assert!(stopped.error_messages()[0].contains("aborted"));
    assert!(matches!(
        service.stop(open.id).await,
        Err(EngineError::InvalidTransition(_))
    ));
}

#[tokio::test]
async fn test_stop_cancels_running_operation() {
    let handlers = handlers();
    let open = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    handlers
        .register(Gate {
            name: "x",
            open: open.clone(),
            entered: entered.clone(),
        })
        .unwrap();
    let service = service(handlers);

    let started = service
        .start(&definition("publish", &["x", "y"]), Artifact::new("mp-1"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    entered.notified().await;

    let stopped = service.stop(started.id).await.unwrap();
    assert_eq!(stopped.state(), WorkflowState::Stopped);
    assert_eq!(stopped.operations()[1].state(), OperationState::Instantiated);
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let handlers = handlers();
    let open = Arc::new(Notify::new());
    let entered = Arc::new(Notify::new());
    handlers
        .register(Gate {
            name: "x",
            open: open.clone(),
            entered: entered.clone(),
        })
        .unwrap();
    let service = service(handlers);

    let started = service
        .start(&definition("publish", &["x", "y"]), Artifact::new("mp-1"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    // Suspend only once `x` is in flight, so it has to finish first.
    entered.notified().await;

    let (suspended, _) = tokio::join!(service.suspend(started.id), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        open.notify_one();
    });
    let suspended = suspended.unwrap();
    assert_eq!(suspended.state(), WorkflowState::Paused);
    assert_eq!(
        suspended.operations().iter().map(|op| op.state()).collect::<Vec<_>>(),
        vec![OperationState::Succeeded, OperationState::Instantiated]
    );

    service.resume(started.id, BTreeMap::new()).await.unwrap();
    let finished = service.wait(started.id).await.unwrap();
    assert_eq!(finished.state(), WorkflowState::Succeeded);
}

#[tokio::test]
async fn test_one_active_workflow_per_artifact() {
    let handlers = handlers();
    handlers
        .register(Hold {
            name: "y",
            continuable: true,
            abortable: true,
        })
        .unwrap();
    let service = service(handlers);
    let def = definition("publish", &["y"]);

    let first = service
        .start(&def, Artifact::new("mp-1"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    service.wait(first.id).await.unwrap();

    let err = service
        .start(&def, Artifact::new("mp-1"), None, identity(), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(_)));

    let child = service
        .start(&def, Artifact::new("mp-1"), Some(first.id), identity(), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(child.parent_id, Some(first.id));

    let err = service
        .start(&def, Artifact::new("mp-9"), Some(999), identity(), BTreeMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn test_update_remove_and_cleanup() {
    let handlers = handlers();
    handlers
        .register(Hold {
            name: "y",
            continuable: true,
            abortable: true,
        })
        .unwrap();
    let service = service(handlers);

    let paused = service
        .start(&definition("review", &["y"]), Artifact::new("mp-1"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    let mut paused = service.wait(paused.id).await.unwrap();
    paused.set_config("reviewer", "jane");
    service.update(&paused).await.unwrap();
    assert_eq!(
        service.get(paused.id).await.unwrap().config("reviewer"),
        Some("jane")
    );

    assert!(matches!(
        service.remove(paused.id, false).await,
        Err(EngineError::InvalidTransition(_))
    ));

    let done = service
        .start(&definition("publish", &["x"]), Artifact::new("mp-2"), None, identity(), BTreeMap::new())
        .await
        .unwrap();
    service.wait(done.id).await.unwrap();

    let page = service
        .query(&WorkflowQuery::new().with_template("publish"))
        .await
        .unwrap();
    assert_eq!(page.total, 1);

    assert!(matches!(
        service.cleanup(Utc::now(), WorkflowState::Running).await,
        Err(EngineError::Validation(_))
    ));
    let removed = service
        .cleanup(Utc::now() + chrono::Duration::seconds(1), WorkflowState::Succeeded)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(matches!(service.get(done.id).await, Err(EngineError::NotFound(_))));

    service.remove(paused.id, true).await.unwrap();
    assert_eq!(service.count(None).await.unwrap(), 0);
}

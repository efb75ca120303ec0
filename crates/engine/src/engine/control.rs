//! Control signals and the per-attempt job context.

use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::model::Identity;

/// External request observed by the driver between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Suspend,
    Stop,
}

/// Sending half kept by the workflow service per running instance.
pub type ControlSender = watch::Sender<ControlSignal>;

/// Receiving half handed to the driver and to handlers.
pub type ControlReceiver = watch::Receiver<ControlSignal>;

/// Create a fresh control channel in the `Run` state.
pub fn control_channel() -> (ControlSender, ControlReceiver) {
    watch::channel(ControlSignal::Run)
}

/// Context passed to a handler for one execution attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub workflow_id: i64,
    pub identity: Identity,
    /// Job created for this attempt.
    pub job_id: i64,
    pub host: String,
    /// Resume properties, empty on a first start.
    pub properties: BTreeMap<String, String>,
    control: ControlReceiver,
}

impl JobContext {
    pub fn new(
        workflow_id: i64,
        identity: Identity,
        job_id: i64,
        host: impl Into<String>,
        control: ControlReceiver,
    ) -> Self {
        Self {
            workflow_id,
            identity,
            job_id,
            host: host.into(),
            properties: BTreeMap::new(),
            control,
        }
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    pub fn signal(&self) -> ControlSignal {
        *self.control.borrow()
    }

    pub fn is_stop_requested(&self) -> bool {
        self.signal() == ControlSignal::Stop
    }

    /// Receiver for long waits that should end on a stop request.
    pub fn control(&self) -> ControlReceiver {
        self.control.clone()
    }

    /// Resolves once a stop is requested or the sender is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.control.clone();
        loop {
            if *rx.borrow_and_update() == ControlSignal::Stop {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

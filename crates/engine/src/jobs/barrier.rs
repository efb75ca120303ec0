//! Job barrier: wait for dispatched jobs to reach a terminal status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::control::{ControlReceiver, ControlSignal};
use crate::error::OperationError;
use crate::jobs::registry::{Job, JobRegistry, JobStatus};

/// Final status of every job the barrier waited for.
#[derive(Debug, Clone, PartialEq)]
pub struct BarrierResult {
    pub outcomes: BTreeMap<i64, JobStatus>,
}

impl BarrierResult {
    /// All jobs finished successfully.
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(|s| *s == JobStatus::Finished)
    }

    pub fn status(&self, job_id: i64) -> Option<JobStatus> {
        self.outcomes.get(&job_id).copied()
    }
}

/// Polls the job registry until jobs complete.
#[derive(Clone)]
pub struct JobBarrier {
    registry: Arc<dyn JobRegistry>,
    poll_interval: Duration,
}

impl JobBarrier {
    pub fn new(registry: Arc<dyn JobRegistry>, poll_interval: Duration) -> Self {
        Self {
            registry,
            poll_interval,
        }
    }

    /// Wait for all `jobs` to finish.
    ///
    /// A zero `timeout` waits indefinitely. On timeout the unfinished jobs
    /// are reported with their last seen status. A stop signal on `control`
    /// ends the wait with [`OperationError::Cancelled`].
    pub async fn wait_for_jobs(
        &self,
        jobs: &[Job],
        timeout: Duration,
        mut control: ControlReceiver,
    ) -> Result<BarrierResult, OperationError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let mut outcomes: BTreeMap<i64, JobStatus> =
            jobs.iter().map(|j| (j.id, j.status)).collect();

        loop {
            if *control.borrow_and_update() == ControlSignal::Stop {
                debug!(jobs = outcomes.len(), "Job barrier cancelled");
                return Err(OperationError::Cancelled);
            }

            let mut pending = 0usize;
            for (id, status) in outcomes.iter_mut() {
                if status.is_terminal() {
                    continue;
                }
                let job = self
                    .registry
                    .get_job(*id)
                    .await
                    .map_err(|e| OperationError::Job(e.to_string()))?;
                *status = job.status;
                if !status.is_terminal() {
                    pending += 1;
                }
            }

            if pending == 0 {
                return Ok(BarrierResult { outcomes });
            }

            let sleep_for = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(pending, "Job barrier timed out");
                        return Ok(BarrierResult { outcomes });
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                changed = control.changed() => {
                    // Sender dropped: nobody can stop us any more, keep polling.
                    if changed.is_err() {
                        tokio::time::sleep(sleep_for).await;
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for JobBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobBarrier")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

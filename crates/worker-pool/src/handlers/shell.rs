//! Shell command execution through a dispatched job.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mediaflow_engine::engine::{JobContext, OperationHandler, OperationResult};
use mediaflow_engine::jobs::{JobBarrier, JobRegistry, JobStatus, NewJob};
use mediaflow_engine::model::{OperationInstance, WorkflowInstance};
use mediaflow_engine::{OperationError, ResultExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Job type recorded for shell commands.
pub const SHELL_JOB_TYPE: &str = "shell";

/// Runs a command in a child job and waits for it on the job barrier.
///
/// Configuration:
/// - `command`: command line passed to the shell with `-c` (required)
/// - `shell`: shell binary (default `bash`)
/// - `cwd`: working directory
/// - `timeout`: seconds to wait for the command, `0` or unset waits forever
/// - `output-key`: workflow property receiving the trimmed stdout
pub struct ShellHandler {
    jobs: Arc<dyn JobRegistry>,
    barrier: JobBarrier,
}

/// Shell settings read from the operation configuration.
#[derive(Debug, Clone)]
struct ShellCommand {
    shell: String,
    command: String,
    cwd: Option<PathBuf>,
    timeout: Duration,
}

impl ShellCommand {
    fn from_operation(operation: &OperationInstance) -> Result<Self, OperationError> {
        let command = operation.required_config("command")?.to_string();
        let timeout_secs = match operation.config("timeout") {
            Some(value) => value.parse::<u64>().map_err(|_| {
                OperationError::ExecutionFailed(format!("Invalid timeout '{}'", value))
            })?,
            None => 0,
        };

        Ok(Self {
            shell: operation.config_or("shell", "bash").to_string(),
            command,
            cwd: operation.config("cwd").map(PathBuf::from),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Run to completion and record the outcome on the job.
    async fn run(self, jobs: Arc<dyn JobRegistry>, job_id: i64) {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }

        let (status, payload) = match cmd.output().await {
            Ok(output) if output.status.success() => (
                JobStatus::Finished,
                String::from_utf8_lossy(&output.stdout).into_owned(),
            ),
            Ok(output) => (
                JobStatus::Failed,
                format!(
                    "Command exited with code {}: {}",
                    output.status.code().unwrap_or(-1),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ),
            Err(e) => (
                JobStatus::Failed,
                format!("Failed to spawn '{}': {}", self.shell, e),
            ),
        };

        debug!(job_id, status = %status, "Shell command finished");
        jobs.complete(job_id, status, Some(payload))
            .await
            .log("completing shell job")
            .ok();
    }
}

impl ShellHandler {
    pub fn new(jobs: Arc<dyn JobRegistry>, poll_interval: Duration) -> Self {
        let barrier = JobBarrier::new(jobs.clone(), poll_interval);
        Self { jobs, barrier }
    }
}

#[async_trait]
impl OperationHandler for ShellHandler {
    fn name(&self) -> &str {
        "shell"
    }

    async fn start(
        &self,
        instance: &WorkflowInstance,
        operation: &OperationInstance,
        ctx: &JobContext,
    ) -> Result<OperationResult, OperationError> {
        let command = ShellCommand::from_operation(operation)?;
        let timeout = command.timeout;

        let job = self
            .jobs
            .create_job(
                NewJob::new(SHELL_JOB_TYPE, "EXECUTE")
                    .with_arguments(vec![command.command.clone()])
                    .with_parent(ctx.job_id),
            )
            .await?;
        debug!(
            workflow_id = instance.id,
            job_id = job.id,
            command = %command.command,
            "Dispatching shell command"
        );

        let runner = tokio::spawn(command.run(self.jobs.clone(), job.id));

        let barrier = match self
            .barrier
            .wait_for_jobs(std::slice::from_ref(&job), timeout, ctx.control())
            .await
        {
            Ok(barrier) => barrier,
            Err(e) => {
                runner.abort();
                self.jobs
                    .complete(job.id, JobStatus::Cancelled, None)
                    .await
                    .log("cancelling shell job")
                    .ok();
                return Err(e);
            }
        };

        match barrier.status(job.id) {
            Some(JobStatus::Finished) => {}
            Some(JobStatus::Failed) | Some(JobStatus::Cancelled) => {
                let job = self.jobs.get_job(job.id).await?;
                return Err(OperationError::ExecutionFailed(
                    job.payload.unwrap_or_else(|| "Shell command failed".to_string()),
                ));
            }
            _ => {
                runner.abort();
                warn!(job_id = job.id, "Shell command timed out");
                self.jobs
                    .complete(job.id, JobStatus::Failed, None)
                    .await
                    .log("failing timed out shell job")
                    .ok();
                return Err(OperationError::Timeout(timeout.as_secs()));
            }
        }

        let mut result = OperationResult::proceed();
        if let Some(key) = operation.config("output-key") {
            let stdout = self.jobs.get_job(job.id).await?.payload.unwrap_or_default();
            result = result.with_property(key, stdout.trim());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{context, instance};
    use mediaflow_engine::definition::OperationDefinition;
    use mediaflow_engine::engine::{Action, ControlSignal};
    use mediaflow_engine::jobs::InMemoryJobRegistry;

    fn handler(jobs: Arc<InMemoryJobRegistry>) -> ShellHandler {
        ShellHandler::new(jobs, Duration::from_millis(5))
    }

    fn shell_op(command: &str) -> OperationDefinition {
        OperationDefinition::new("shell").with_config("command", command)
    }

    #[tokio::test]
    async fn test_output_captured_into_property() {
        let jobs = Arc::new(InMemoryJobRegistry::new());
        let instance = instance(shell_op("echo encoded").with_config("output-key", "encoder.output"));
        let (_tx, ctx) = context(42);

        let result = handler(jobs.clone())
            .start(&instance, instance.operation(0).unwrap(), &ctx)
            .await
            .unwrap();

        assert_eq!(result.action, Action::Continue);
        assert_eq!(result.properties.get("encoder.output").map(String::as_str), Some("encoded"));

        let job = jobs.get_job(1).await.unwrap();
        assert_eq!(job.status, JobStatus::Finished);
        assert_eq!(job.parent_id, Some(42));
        assert_eq!(job.job_type, SHELL_JOB_TYPE);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails() {
        let jobs = Arc::new(InMemoryJobRegistry::new());
        let instance = instance(shell_op("echo broken >&2; exit 3"));
        let (_tx, ctx) = context(1);

        let err = handler(jobs)
            .start(&instance, instance.operation(0).unwrap(), &ctx)
            .await
            .unwrap_err();

        match err {
            OperationError::ExecutionFailed(message) => {
                assert!(message.contains("code 3"), "{message}");
                assert!(message.contains("broken"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_command_is_configuration_error() {
        let jobs = Arc::new(InMemoryJobRegistry::new());
        let instance = instance(OperationDefinition::new("shell"));
        let (_tx, ctx) = context(1);

        let err = handler(jobs.clone())
            .start(&instance, instance.operation(0).unwrap(), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperationError::Configuration(key) if key == "command"));
        assert!(jobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_timeout() {
        let jobs = Arc::new(InMemoryJobRegistry::new());
        let instance = instance(shell_op("sleep 5").with_config("timeout", "1"));
        let (_tx, ctx) = context(1);

        let err = handler(jobs.clone())
            .start(&instance, instance.operation(0).unwrap(), &ctx)
            .await
            .unwrap_err();

        assert!(matches!(err, OperationError::Timeout(1)));
        assert_eq!(jobs.get_job(1).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_stop_signal_cancels_command() {
        let jobs = Arc::new(InMemoryJobRegistry::new());
        let instance = instance(shell_op("sleep 5"));
        let (tx, ctx) = context(1);

        let handler = handler(jobs.clone());
        let (result, _) = tokio::join!(
            handler.start(&instance, instance.operation(0).unwrap(), &ctx),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                tx.send(ControlSignal::Stop).unwrap();
            }
        );

        assert!(matches!(result, Err(OperationError::Cancelled)));
        assert_eq!(jobs.get_job(1).await.unwrap().status, JobStatus::Cancelled);
    }
}

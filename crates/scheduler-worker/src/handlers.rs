//! Example job handlers registered by the bundled binary. A deployment
//! with its own job types links against `scheduler-core::handler` and
//! registers its own `JobHandler` implementations instead; these two
//! exist so `scheduler-worker run` does something useful out of the box.

use async_trait::async_trait;
use scheduler_core::handler::{ExecutionOutcome, JobContext, JobHandler};
use tracing::info;

/// Logs `jobData` at info level and completes. Useful for smoke-testing
/// a dispatcher/worker pair end to end without a real side effect.
pub struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    fn job_name(&self) -> &str {
        "log"
    }

    async fn handle(&self, ctx: &JobContext, job_data: serde_json::Value) -> ExecutionOutcome {
        info!(correlation_id = %ctx.correlation_id, job_data = %job_data, "log job executed");
        ExecutionOutcome::Completed(Some(job_data.to_string()))
    }
}

/// Runs a shell command from `jobData.command` (`jobData.args`
/// optional). Missing/non-string `command` is a permanent failure —
/// retrying it would fail identically every time. A non-zero exit code
/// is a transient failure, since the same command can succeed on a
/// later attempt once its environment changes.
pub struct ShellCommandHandler;

#[async_trait]
impl JobHandler for ShellCommandHandler {
    fn job_name(&self) -> &str {
        "shell"
    }

    async fn handle(&self, _ctx: &JobContext, job_data: serde_json::Value) -> ExecutionOutcome {
        let Some(command) = job_data.get("command").and_then(|v| v.as_str()) else {
            return ExecutionOutcome::permanent_failure("jobData.command must be a string");
        };
        let args: Vec<String> = job_data
            .get("args")
            .and_then(|v| v.as_array())
            .map(|values| values.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        match tokio::process::Command::new(command).args(&args).output().await {
            Ok(output) if output.status.success() => {
                ExecutionOutcome::Completed(Some(String::from_utf8_lossy(&output.stdout).to_string()))
            }
            Ok(output) => ExecutionOutcome::failed(format!(
                "command exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )),
            Err(err) => ExecutionOutcome::failed(format!("failed to spawn command: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn ctx() -> JobContext {
        JobContext {
            correlation_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            job_name: "log".into(),
            worker_id: "w1".into(),
            attempt: 1,
            started_at: Utc::now(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn log_handler_always_completes() {
        let outcome = LogHandler.handle(&ctx(), serde_json::json!({"hello": "world"})).await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn shell_handler_rejects_missing_command_as_permanent() {
        let outcome = ShellCommandHandler.handle(&ctx(), serde_json::json!({})).await;
        match outcome {
            ExecutionOutcome::Failed { permanent, .. } => assert!(permanent),
            other => panic!("expected permanent failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shell_handler_runs_a_real_command() {
        let outcome = ShellCommandHandler.handle(&ctx(), serde_json::json!({"command": "true"})).await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }
}

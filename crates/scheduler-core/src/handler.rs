//! The worker-side job handler contract.
//!
//! User job code never throws past the executor: every outcome, success or
//! failure, is carried as an [`ExecutionOutcome`] value rather than a
//! propagated error, matching the "exception-based control flow becomes a
//! result variant" shift this crate makes from the handler patterns the
//! bus and coordination layers were generalised from.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything a running job needs to know about its own invocation.
/// Handed to [`JobHandler::handle`] by value; the executor constructs it
/// fresh per occurrence from the dispatch message and job definition.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub correlation_id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub worker_id: String,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub timeout: Option<Duration>,
}

impl JobContext {
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.started_at).to_std().unwrap_or_default()
    }

    pub fn has_timed_out(&self) -> bool {
        match self.timeout {
            Some(timeout) => self.elapsed() >= timeout,
            None => false,
        }
    }
}

/// The four ways a job execution can end. `TimedOut` and `Cancelled` are
/// never returned by user code directly; the executor produces them when
/// the cancellation scope fires before `handle` returns.
#[derive(Debug)]
pub enum ExecutionOutcome {
    Completed(Option<String>),
    Failed { error: String, permanent: bool },
    TimedOut,
    Cancelled,
}

impl ExecutionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        ExecutionOutcome::Failed { error: error.into(), permanent: false }
    }

    pub fn permanent_failure(error: impl Into<String>) -> Self {
        ExecutionOutcome::Failed { error: error.into(), permanent: true }
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Failed { .. } | ExecutionOutcome::TimedOut | ExecutionOutcome::Cancelled)
    }
}

/// Implemented once per `jobNameInWorker` the process accepts. Registered
/// with the worker's handler registry at start-up; the consumer looks a
/// handler up by job name before accepting a dispatch delivery, rejecting
/// (without requeue) deliveries for unregistered names per the
/// unknown-job-type-at-worker error policy.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The `jobNameInWorker` this handler accepts.
    fn job_name(&self) -> &str;

    /// Run the job. Implementations should poll `ctx.has_timed_out()` (or
    /// otherwise cooperate with cancellation) on any long-running loop;
    /// the executor's timeout/cancellation race is advisory, not
    /// preemptive.
    async fn handle(&self, ctx: &JobContext, job_data: serde_json::Value) -> ExecutionOutcome;
}

/// Looks up a registered [`JobHandler`] by job name. A plain `HashMap`
/// wrapper rather than a generic registry trait: this process always
/// knows its full handler set at start-up, so dynamic registration isn't
/// a requirement worth abstracting over.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: std::collections::HashMap<String, std::sync::Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: std::sync::Arc<dyn JobHandler>) {
        self.handlers.insert(handler.job_name().to_string(), handler);
    }

    pub fn get(&self, job_name: &str) -> Option<std::sync::Arc<dyn JobHandler>> {
        self.handlers.get(job_name).cloned()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl JobHandler for EchoHandler {
        fn job_name(&self) -> &str {
            "echo"
        }

        async fn handle(&self, _ctx: &JobContext, job_data: serde_json::Value) -> ExecutionOutcome {
            ExecutionOutcome::Completed(Some(job_data.to_string()))
        }
    }

    #[test]
    fn registry_resolves_by_job_name() {
        let mut registry = HandlerRegistry::new();
        registry.register(std::sync::Arc::new(EchoHandler));
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn context_reports_timeout_once_elapsed_exceeds_budget() {
        let ctx = JobContext {
            correlation_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            job_name: "echo".into(),
            worker_id: "w1".into(),
            attempt: 1,
            started_at: Utc::now() - chrono::Duration::seconds(5),
            timeout: Some(Duration::from_secs(1)),
        };
        assert!(ctx.has_timed_out());
    }
}

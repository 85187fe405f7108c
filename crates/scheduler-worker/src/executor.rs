//! Runs a single job occurrence under a [`JobContext`], racing completion
//! against the resolved timeout and a per-correlation-id cancellation
//! signal. Whichever finishes first decides the outcome; a job that
//! finishes in the same tick as a cancellation request still wins, since
//! `handle` is polled as the first branch.

use std::sync::Arc;

use scheduler_core::handler::{ExecutionOutcome, JobContext, JobHandler};
use tokio::sync::watch;

/// Run `handler` to completion, or stop early on timeout/cancellation.
pub async fn execute(
    handler: Arc<dyn JobHandler>,
    ctx: JobContext,
    job_data: serde_json::Value,
    cancel_rx: watch::Receiver<bool>,
) -> ExecutionOutcome {
    tokio::select! {
        biased;

        outcome = handler.handle(&ctx, job_data) => outcome,
        _ = sleep_until_timeout(ctx.timeout) => ExecutionOutcome::TimedOut,
        _ = wait_for_cancel(cancel_rx) => ExecutionOutcome::Cancelled,
    }
}

async fn sleep_until_timeout(timeout: Option<std::time::Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

async fn wait_for_cancel(mut cancel_rx: watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // Sender dropped without ever cancelling; this branch never wins.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    struct SlowHandler(Duration);

    #[async_trait]
    impl JobHandler for SlowHandler {
        fn job_name(&self) -> &str {
            "slow"
        }

        async fn handle(&self, _ctx: &JobContext, _job_data: serde_json::Value) -> ExecutionOutcome {
            tokio::time::sleep(self.0).await;
            ExecutionOutcome::Completed(None)
        }
    }

    fn ctx(timeout: Option<Duration>) -> JobContext {
        JobContext {
            correlation_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            job_name: "slow".into(),
            worker_id: "w1".into(),
            attempt: 1,
            started_at: Utc::now(),
            timeout,
        }
    }

    #[tokio::test]
    async fn completes_when_handler_finishes_before_timeout() {
        let (_tx, rx) = watch::channel(false);
        let outcome = execute(
            Arc::new(SlowHandler(Duration::from_millis(5))),
            ctx(Some(Duration::from_secs(5))),
            serde_json::Value::Null,
            rx,
        )
        .await;
        assert!(matches!(outcome, ExecutionOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn times_out_when_handler_outlives_the_budget() {
        let (_tx, rx) = watch::channel(false);
        let outcome = execute(
            Arc::new(SlowHandler(Duration::from_secs(5))),
            ctx(Some(Duration::from_millis(5))),
            serde_json::Value::Null,
            rx,
        )
        .await;
        assert!(matches!(outcome, ExecutionOutcome::TimedOut));
    }

    #[tokio::test]
    async fn cancels_when_signalled_before_completion() {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = tx.send(true);
        });
        let outcome =
            execute(Arc::new(SlowHandler(Duration::from_secs(5))), ctx(None), serde_json::Value::Null, rx).await;
        assert!(matches!(outcome, ExecutionOutcome::Cancelled));
    }
}

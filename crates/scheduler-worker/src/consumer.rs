//! Worker Consumer: binds one `consume_dispatch` stream per configured
//! job type, enforces the dual capacity gate (this instance's own
//! `currentJobs < maxParallelJobs`, and the cross-instance
//! per-`(workerId, jobNameInWorker)` gate from [`CapacityGate`]), and
//! drives accepted jobs through the [`crate::executor`].
//!
//! Every status update, log line, and heartbeat the consumer produces is
//! written to the [`Outbox`] before the bus delivery is acknowledged;
//! the outbox's own sync task is what actually talks to the bus on the
//! way back out. See `crate::sync` for that half of the contract.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use scheduler_core::bus::{DispatchMessage, JobHeartbeatMessage, MessageBus, StatusUpdateMessage};
use scheduler_core::config::{JobTypeConfig, WorkerConfig};
use scheduler_core::coordination::{CoordinationStore, KeyPrefix};
use scheduler_core::handler::{ExecutionOutcome, HandlerRegistry, JobContext};
use scheduler_core::model::OccurrenceStatus;
use scheduler_core::Result;
use tracing::{info, warn};

use crate::capacity::CapacityGate;
use crate::cancellation::CancellationRegistry;
use crate::executor;
use crate::outbox::Outbox;

pub struct Consumer {
    bus: Arc<dyn MessageBus>,
    outbox: Arc<Outbox>,
    handlers: Arc<HandlerRegistry>,
    cancellation: Arc<CancellationRegistry>,
    capacity_gate: Arc<CapacityGate>,
    config: WorkerConfig,
    instance_jobs: Arc<AtomicU32>,
}

impl Consumer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        coordination: Arc<dyn CoordinationStore>,
        keys: KeyPrefix,
        outbox: Arc<Outbox>,
        handlers: Arc<HandlerRegistry>,
        cancellation: Arc<CancellationRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            bus,
            outbox,
            handlers,
            cancellation,
            capacity_gate: Arc::new(CapacityGate::new(coordination, keys)),
            config,
            instance_jobs: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Current number of jobs this instance is executing, for the
    /// worker-heartbeat loop to report.
    pub fn current_jobs(&self) -> u32 {
        self.instance_jobs.load(Ordering::SeqCst)
    }

    /// Spawn one consume loop per configured job type and wait for all of
    /// them (a loop only exits on an unrecoverable bus error).
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks = Vec::new();
        for job_type in self.config.job_types.clone() {
            let this = self.clone();
            tasks.push(tokio::spawn(async move { this.run_job_type(job_type).await }));
        }

        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "consumer task panicked");
            }
        }
        Ok(())
    }

    /// Each delivery becomes its own spawned unit of work rather than
    /// being awaited inline, so `max_parallel_jobs` in-flight jobs can
    /// genuinely run at once per routing pattern; `handle_delivery` itself
    /// is what enforces the dual capacity gate and rejects-with-requeue
    /// once the instance (or the cross-instance slot pool) is full.
    async fn run_job_type(self: Arc<Self>, job_type: JobTypeConfig) -> Result<()> {
        let mut stream = self.bus.consume_dispatch(&job_type.routing_pattern).await?;
        info!(pattern = %job_type.routing_pattern, "consuming dispatch messages");

        while let Some(delivery) = stream.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(error = %err, "dispatch delivery error");
                    continue;
                }
            };

            let this = self.clone();
            let job_type = job_type.clone();
            tokio::spawn(async move {
                if let Err(err) = this.handle_delivery(&job_type, delivery).await {
                    warn!(error = %err, "failed processing dispatch delivery");
                }
            });
        }

        Ok(())
    }

    async fn handle_delivery(
        &self,
        job_type: &JobTypeConfig,
        delivery: scheduler_core::bus::Delivery<DispatchMessage>,
    ) -> Result<()> {
        let message = delivery.payload.clone();

        let Some(handler) = self.handlers.get(&job_type.job_name_in_worker) else {
            warn!(job_name = %job_type.job_name_in_worker, "unknown job type at worker, rejecting without requeue");
            return delivery.reject(false).await;
        };

        // Optimistic claim-then-check: with deliveries now handled
        // concurrently, a plain load-then-compare would let two in-flight
        // deliveries both pass the check before either increments.
        // Claiming first and rolling back on overflow keeps the counter
        // exact under concurrency.
        if self.instance_jobs.fetch_add(1, Ordering::SeqCst) + 1 > self.config.max_parallel_jobs {
            self.instance_jobs.fetch_sub(1, Ordering::SeqCst);
            return delivery.reject(true).await;
        }

        let max_parallel_jobs = job_type.max_parallel_jobs.min(self.config.max_parallel_jobs).max(1);
        let timeout_ttl = resolve_timeout(job_type.execution_timeout_seconds, self.config.execution_timeout_seconds)
            .unwrap_or(Duration::from_secs(3600));

        let slot = self
            .capacity_gate
            .try_acquire(&self.config.worker_id, &job_type.job_name_in_worker, max_parallel_jobs, timeout_ttl)
            .await?;
        let Some(slot) = slot else {
            self.instance_jobs.fetch_sub(1, Ordering::SeqCst);
            return delivery.reject(true).await;
        };

        let timeout = resolve_timeout(
            message.execution_timeout_seconds.or(job_type.execution_timeout_seconds),
            self.config.execution_timeout_seconds,
        );

        let ctx = JobContext {
            correlation_id: message.correlation_id,
            job_id: message.job_id,
            job_name: message.job_name.clone(),
            worker_id: self.config.worker_id.clone(),
            attempt: 1,
            started_at: Utc::now(),
            timeout,
        };

        self.emit_status(StatusUpdateMessage {
            correlation_id: message.correlation_id,
            job_id: message.job_id,
            worker_id: self.config.worker_id.clone(),
            status: OccurrenceStatus::Running,
            start_time: Some(ctx.started_at),
            end_time: None,
            duration_ms: None,
            result: None,
            exception: None,
            message_timestamp: Utc::now(),
        })?;

        let cancel_rx = self.cancellation.register(message.correlation_id);
        let heartbeat_task = self.spawn_job_heartbeat(&ctx);

        let outcome = executor::execute(handler, ctx.clone(), message.job_data.clone(), cancel_rx).await;

        heartbeat_task.abort();
        self.cancellation.clear(&message.correlation_id);
        self.instance_jobs.fetch_sub(1, Ordering::SeqCst);
        slot.release().await?;

        let end_time = Utc::now();
        let status_message = match outcome {
            ExecutionOutcome::Completed(result) => StatusUpdateMessage {
                correlation_id: message.correlation_id,
                job_id: message.job_id,
                worker_id: self.config.worker_id.clone(),
                status: OccurrenceStatus::Completed,
                start_time: Some(ctx.started_at),
                end_time: Some(end_time),
                duration_ms: Some((end_time - ctx.started_at).num_milliseconds()),
                result,
                exception: None,
                message_timestamp: end_time,
            },
            ExecutionOutcome::Failed { error, .. } => StatusUpdateMessage {
                correlation_id: message.correlation_id,
                job_id: message.job_id,
                worker_id: self.config.worker_id.clone(),
                status: OccurrenceStatus::Failed,
                start_time: Some(ctx.started_at),
                end_time: Some(end_time),
                duration_ms: Some((end_time - ctx.started_at).num_milliseconds()),
                result: None,
                exception: Some(error),
                message_timestamp: end_time,
            },
            ExecutionOutcome::TimedOut => StatusUpdateMessage {
                correlation_id: message.correlation_id,
                job_id: message.job_id,
                worker_id: self.config.worker_id.clone(),
                status: OccurrenceStatus::TimedOut,
                start_time: Some(ctx.started_at),
                end_time: Some(end_time),
                duration_ms: Some((end_time - ctx.started_at).num_milliseconds()),
                result: None,
                exception: Some("execution exceeded its timeout budget".to_string()),
                message_timestamp: end_time,
            },
            ExecutionOutcome::Cancelled => StatusUpdateMessage {
                correlation_id: message.correlation_id,
                job_id: message.job_id,
                worker_id: self.config.worker_id.clone(),
                status: OccurrenceStatus::Cancelled,
                start_time: Some(ctx.started_at),
                end_time: Some(end_time),
                duration_ms: Some((end_time - ctx.started_at).num_milliseconds()),
                result: None,
                exception: Some("cancelled by operator request".to_string()),
                message_timestamp: end_time,
            },
        };

        // The outbox durably queues the terminal status before the bus
        // delivery is acknowledged, so a crash between here and the next
        // outbox sync tick never silently loses the result.
        self.emit_status(status_message)?;
        delivery.ack().await
    }

    fn emit_status(&self, message: StatusUpdateMessage) -> Result<()> {
        self.outbox.enqueue_status_update(message)?;
        Ok(())
    }

    fn spawn_job_heartbeat(&self, ctx: &JobContext) -> tokio::task::JoinHandle<()> {
        let outbox = self.outbox.clone();
        let interval = Duration::from_secs(self.config.job_heartbeat_interval_seconds);
        let correlation_id = ctx.correlation_id;
        let job_id = ctx.job_id;
        let worker_id = ctx.worker_id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let _ = outbox.set_job_heartbeat(JobHeartbeatMessage {
                    correlation_id,
                    job_id,
                    worker_id: worker_id.clone(),
                    timestamp: Utc::now(),
                });
            }
        })
    }
}

/// Resolve the effective execution timeout:
/// `occurrence ?? consumer ?? worker`, converting seconds to a `Duration`.
fn resolve_timeout(occurrence_or_consumer: Option<i64>, worker: Option<i64>) -> Option<Duration> {
    occurrence_or_consumer.or(worker).and_then(|seconds| if seconds > 0 { Some(Duration::from_secs(seconds as u64)) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_resolution_prefers_the_more_specific_value() {
        assert_eq!(resolve_timeout(Some(30), Some(60)), Some(Duration::from_secs(30)));
        assert_eq!(resolve_timeout(None, Some(60)), Some(Duration::from_secs(60)));
        assert_eq!(resolve_timeout(None, None), None);
    }
}

//! Status Tracker: consumes status-update messages off the bus, batches
//! them into grouped commits, applies the terminal-status transition rule,
//! and runs the per-job auto-disable circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use scheduler_core::bus::{MessageBus, StatusUpdateMessage};
use scheduler_core::coordination::{CoordinationStore, KeyPrefix};
use scheduler_core::model::OccurrenceStatus;
use scheduler_core::repository::JobOccurrenceRepositoryTrait;
use scheduler_core::{config::StatusTrackerConfig, Result};
use tracing::{error, info, warn};

use crate::auto_disable::AutoDisableTracker;
use crate::failed_occurrence_handler::FailedOccurrenceHandler;

pub struct StatusTracker {
    coordination: Arc<dyn CoordinationStore>,
    bus: Arc<dyn MessageBus>,
    occurrences: Arc<dyn JobOccurrenceRepositoryTrait>,
    failed_occurrence_handler: Arc<FailedOccurrenceHandler>,
    auto_disable: Arc<AutoDisableTracker>,
    keys: KeyPrefix,
    config: StatusTrackerConfig,
}

impl StatusTracker {
    pub fn new(
        coordination: Arc<dyn CoordinationStore>,
        bus: Arc<dyn MessageBus>,
        occurrences: Arc<dyn JobOccurrenceRepositoryTrait>,
        failed_occurrence_handler: Arc<FailedOccurrenceHandler>,
        auto_disable: Arc<AutoDisableTracker>,
        keys: KeyPrefix,
        config: StatusTrackerConfig,
    ) -> Self {
        Self { coordination, bus, occurrences, failed_occurrence_handler, auto_disable, keys, config }
    }

    pub async fn run(&self) -> Result<()> {
        let mut stream = self.bus.consume_status_updates().await?;
        let mut batch = Vec::with_capacity(self.config.batch_size);
        let batch_interval = Duration::from_millis(self.config.batch_interval_ms);

        loop {
            let flush = tokio::time::sleep(batch_interval);
            tokio::pin!(flush);

            tokio::select! {
                delivery = stream.next() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            batch.push(delivery);
                            if batch.len() >= self.config.batch_size {
                                self.flush_batch(&mut batch).await;
                            }
                        }
                        Some(Err(err)) => error!(error = %err, "status update delivery error"),
                        None => {
                            warn!("status update stream closed");
                            return Ok(());
                        }
                    }
                }
                _ = &mut flush => {
                    if !batch.is_empty() {
                        self.flush_batch(&mut batch).await;
                    }
                }
            }
        }
    }

    async fn flush_batch(&self, batch: &mut Vec<scheduler_core::bus::Delivery<StatusUpdateMessage>>) {
        let deliveries = std::mem::take(batch);
        let mut acked = Vec::with_capacity(deliveries.len());

        for delivery in deliveries {
            let message = &delivery.payload;
            match self.apply(message).await {
                Ok(()) => acked.push(delivery),
                Err(err) => {
                    error!(correlation_id = %message.correlation_id, error = %err, "failed to apply status update");
                    let _ = delivery.reject(true).await;
                }
            }
        }

        for delivery in acked {
            if let Err(err) = delivery.ack().await {
                error!(error = %err, "failed to ack status update delivery");
            }
        }
    }

    /// Apply one status update, enforcing the transition rule and
    /// idempotency on `(correlationId, status)`.
    async fn apply(&self, message: &StatusUpdateMessage) -> Result<()> {
        let mut occurrence = match self.occurrences.get_by_correlation_id(message.correlation_id).await? {
            Some(occurrence) => occurrence,
            None => {
                warn!(correlation_id = %message.correlation_id, "status update for unknown occurrence, dropping");
                return Ok(());
            }
        };

        if occurrence.status == message.status {
            // Idempotent no-op: the same (correlationId, status) pair twice.
            return Ok(());
        }

        let applied = occurrence.try_transition(message.status, message.message_timestamp);
        if !applied {
            info!(correlation_id = %message.correlation_id, status = ?message.status, "discarding update: occurrence already terminal");
            return Ok(());
        }

        occurrence.start_time = message.start_time.or(occurrence.start_time);
        occurrence.end_time = message.end_time.or(occurrence.end_time);
        occurrence.result = message.result.clone().or(occurrence.result.clone());
        occurrence.exception = message.exception.clone().or(occurrence.exception.clone());

        self.occurrences.save(&occurrence).await?;

        if message.status.is_terminal() {
            self.coordination.del(&self.keys.job_lock(&occurrence.job_id.to_string())).await?;
            self.coordination.srem(&self.keys.running_set(), &occurrence.job_id.to_string()).await?;
            self.auto_disable.apply(&occurrence).await?;

            if matches!(message.status, OccurrenceStatus::Failed | OccurrenceStatus::TimedOut) {
                self.failed_occurrence_handler.handle(&occurrence).await?;
            }
        }

        Ok(())
    }
}

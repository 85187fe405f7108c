//! Outbox sync orchestrator.
//!
//! Drains the durable outbox and publishes to the bus whenever the
//! connection is up, removing each record only once the broker has
//! confirmed it. A publish failure leaves the record in place for the
//! next tick; the outbox is the source of truth until the ack comes
//! back, never the other way around.

use std::sync::Arc;
use std::time::Duration;

use scheduler_core::bus::MessageBus;
use scheduler_core::Result;
use tracing::warn;

use crate::outbox::{Outbox, OutboxEvent};

pub struct SyncOrchestrator {
    bus: Arc<dyn MessageBus>,
    outbox: Arc<Outbox>,
    interval: Duration,
}

impl SyncOrchestrator {
    pub fn new(bus: Arc<dyn MessageBus>, outbox: Arc<Outbox>, interval: Duration) -> Self {
        Self { bus, outbox, interval }
    }

    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.drain_once().await {
                warn!(error = %err, "outbox drain failed, will retry next tick");
            }
        }
    }

    /// One FIFO pass over the queued events, then the coalesced
    /// heartbeats. Public so callers (and tests) can drive a single
    /// drain without waiting on the interval.
    pub async fn drain_once(&self) -> Result<()> {
        for (id, event) in self.outbox.drain_events()? {
            let published = match &event {
                OutboxEvent::StatusUpdate(message) => self.bus.publish_status_update(message).await,
                OutboxEvent::Log(message) => self.bus.publish_log(message).await,
            };
            match published {
                Ok(()) => self.outbox.remove_event(id)?,
                Err(err) => {
                    warn!(error = %err, "failed publishing outbox event, leaving queued");
                    // FIFO per correlation id: stop at the first failure
                    // rather than reordering later events ahead of it.
                    return Ok(());
                }
            }
        }

        for (key, message) in self.outbox.drain_worker_heartbeats()? {
            if self.bus.publish_worker_heartbeat(&message).await.is_ok() {
                self.outbox.remove_worker_heartbeat(&key)?;
            }
        }

        for (key, message) in self.outbox.drain_job_heartbeats()? {
            if self.bus.publish_job_heartbeat(&message).await.is_ok() {
                self.outbox.remove_job_heartbeat(&key)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scheduler_core::bus::*;
    use scheduler_core::model::OccurrenceStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FlakyBus {
        fail_status_updates: AtomicBool,
        published: Mutex<Vec<StatusUpdateMessage>>,
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        async fn publish_dispatch(&self, _: &str, _: &DispatchMessage) -> Result<()> {
            Ok(())
        }
        async fn publish_status_update(&self, message: &StatusUpdateMessage) -> Result<()> {
            if self.fail_status_updates.load(Ordering::SeqCst) {
                return Err(scheduler_core::Error::bus("broker unreachable"));
            }
            self.published.lock().unwrap().push(message.clone());
            Ok(())
        }
        async fn publish_log(&self, _: &LogMessage) -> Result<()> {
            Ok(())
        }
        async fn publish_worker_heartbeat(&self, _: &WorkerHeartbeatMessage) -> Result<()> {
            Ok(())
        }
        async fn publish_job_heartbeat(&self, _: &JobHeartbeatMessage) -> Result<()> {
            Ok(())
        }
        async fn publish_registration(&self, _: &RegistrationMessage) -> Result<()> {
            Ok(())
        }
        async fn publish_dlq(&self, _: &DlqMessage) -> Result<()> {
            Ok(())
        }
        async fn consume_dispatch(&self, _: &str) -> Result<DeliveryStream<DispatchMessage>> {
            unimplemented!()
        }
        async fn consume_status_updates(&self) -> Result<DeliveryStream<StatusUpdateMessage>> {
            unimplemented!()
        }
        async fn consume_logs(&self) -> Result<DeliveryStream<LogMessage>> {
            unimplemented!()
        }
        async fn consume_worker_heartbeats(&self) -> Result<DeliveryStream<WorkerHeartbeatMessage>> {
            unimplemented!()
        }
        async fn consume_job_heartbeats(&self) -> Result<DeliveryStream<JobHeartbeatMessage>> {
            unimplemented!()
        }
        async fn consume_registrations(&self) -> Result<DeliveryStream<RegistrationMessage>> {
            unimplemented!()
        }
        async fn consume_failed_jobs(&self) -> Result<DeliveryStream<DlqMessage>> {
            unimplemented!()
        }
    }

    fn status_message() -> StatusUpdateMessage {
        StatusUpdateMessage {
            correlation_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            worker_id: "w1".to_string(),
            status: OccurrenceStatus::Completed,
            start_time: None,
            end_time: None,
            duration_ms: None,
            result: None,
            exception: None,
            message_timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn drains_and_removes_on_successful_publish() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().to_str().unwrap()).unwrap();
        outbox.enqueue_status_update(status_message()).unwrap();

        let bus = Arc::new(FlakyBus { fail_status_updates: AtomicBool::new(false), published: Mutex::new(vec![]) });
        let orchestrator = SyncOrchestrator::new(bus.clone(), outbox.clone(), Duration::from_secs(60));

        orchestrator.drain_once().await.unwrap();

        assert_eq!(bus.published.lock().unwrap().len(), 1);
        assert!(outbox.drain_events().unwrap().is_empty());
    }

    #[tokio::test]
    async fn leaves_the_event_queued_on_publish_failure() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().to_str().unwrap()).unwrap();
        outbox.enqueue_status_update(status_message()).unwrap();

        let bus = Arc::new(FlakyBus { fail_status_updates: AtomicBool::new(true), published: Mutex::new(vec![]) });
        let orchestrator = SyncOrchestrator::new(bus.clone(), outbox.clone(), Duration::from_secs(60));

        orchestrator.drain_once().await.unwrap();

        assert!(bus.published.lock().unwrap().is_empty());
        assert_eq!(outbox.drain_events().unwrap().len(), 1);
    }
}

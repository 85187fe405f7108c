//! Failed-Occurrence Handler: turns a terminal Failed/TimedOut occurrence
//! into a durable DLQ entry exactly once, for offline operator tooling.

use std::sync::Arc;

use scheduler_core::bus::{DlqMessage, MessageBus};
use scheduler_core::model::{FailedOccurrence, FailureType, JobOccurrence};
use scheduler_core::repository::{FailedOccurrenceRepositoryTrait, ScheduledJobRepositoryTrait};
use scheduler_core::Result;
use tracing::info;

pub struct FailedOccurrenceHandler {
    bus: Arc<dyn MessageBus>,
    jobs: Arc<dyn ScheduledJobRepositoryTrait>,
    failed_occurrences: Arc<dyn FailedOccurrenceRepositoryTrait>,
}

impl FailedOccurrenceHandler {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        jobs: Arc<dyn ScheduledJobRepositoryTrait>,
        failed_occurrences: Arc<dyn FailedOccurrenceRepositoryTrait>,
    ) -> Self {
        Self { bus, jobs, failed_occurrences }
    }

    /// Persist a `FailedOccurrence` (idempotent on `occurrenceId`) and
    /// publish the DLQ triage payload. Called by the Status Tracker for
    /// ordinary terminal failures and by the Zombie Detector for
    /// zombie-detected ones.
    pub async fn handle(&self, occurrence: &JobOccurrence) -> Result<()> {
        self.handle_with_failure_type(occurrence, self.classify(occurrence)).await
    }

    pub async fn handle_with_failure_type(&self, occurrence: &JobOccurrence, failure_type: FailureType) -> Result<()> {
        let job = self.jobs.get(occurrence.job_id).await?;
        let display_name = job.as_ref().map(|j| j.display_name.clone()).unwrap_or_else(|| occurrence.job_name.clone());
        let job_data = job.as_ref().map(|j| j.job_data.clone()).unwrap_or(serde_json::Value::Null);
        let execute_at = job.as_ref().map(|j| j.execute_at).unwrap_or(occurrence.created_at);

        let failed = FailedOccurrence::new(
            occurrence.job_id,
            occurrence.id,
            occurrence.correlation_id,
            display_name.clone(),
            occurrence.job_name.clone(),
            occurrence.worker_id.clone(),
            job_data.clone(),
            occurrence.exception.clone(),
            occurrence.dispatch_retry_count,
            failure_type,
        );

        let inserted = self.failed_occurrences.create_if_absent(&failed).await?;
        if !inserted {
            return Ok(());
        }

        info!(occurrence_id = %occurrence.id, failure_type = ?failure_type, "routed occurrence to DLQ");

        let message = DlqMessage {
            id: failed.id,
            display_name,
            job_name_in_worker: occurrence.job_name.clone(),
            job_data,
            execute_at,
            status: occurrence.status,
            exception: occurrence.exception.clone(),
        };
        self.bus.publish_dlq(&message).await
    }

    fn classify(&self, occurrence: &JobOccurrence) -> FailureType {
        if occurrence.is_permanent_failure {
            FailureType::InvalidJobData
        } else if occurrence.dispatch_retry_count > 0 {
            FailureType::MaxRetriesExceeded
        } else {
            match occurrence.status {
                scheduler_core::model::OccurrenceStatus::TimedOut => FailureType::Timeout,
                scheduler_core::model::OccurrenceStatus::Cancelled => FailureType::Cancelled,
                _ => FailureType::UnhandledException,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use scheduler_core::bus::*;
    use scheduler_core::model::*;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct NullBus {
        published: Mutex<Vec<DlqMessage>>,
    }

    #[async_trait]
    impl MessageBus for NullBus {
        async fn publish_dispatch(&self, _: &str, _: &DispatchMessage) -> Result<()> {
            Ok(())
        }
        async fn publish_status_update(&self, _: &StatusUpdateMessage) -> Result<()> {
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
        async fn publish_dlq(&self, message: &DlqMessage) -> Result<()> {
            self.published.lock().unwrap().push(message.clone());
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

    struct NullJobs;

    #[async_trait]
    impl ScheduledJobRepositoryTrait for NullJobs {
        async fn create(&self, _: &ScheduledJob) -> Result<()> {
            Ok(())
        }
        async fn get(&self, _: Uuid) -> Result<Option<ScheduledJob>> {
            Ok(None)
        }
        async fn get_many(&self, _: &[Uuid]) -> Result<Vec<ScheduledJob>> {
            Ok(vec![])
        }
        async fn update(&self, _: &ScheduledJob) -> Result<()> {
            Ok(())
        }
        async fn list_active(&self) -> Result<Vec<ScheduledJob>> {
            Ok(vec![])
        }
        async fn set_active(&self, _: Uuid, _: bool) -> Result<()> {
            Ok(())
        }
        async fn apply_auto_disable(&self, _: Uuid, _: &AutoDisableSettings, _: bool) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _: Uuid) -> Result<()> {
            Ok(())
        }
    }

    struct MemoryFailedOccurrences {
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl FailedOccurrenceRepositoryTrait for MemoryFailedOccurrences {
        async fn create_if_absent(&self, failed: &FailedOccurrence) -> Result<bool> {
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(&failed.occurrence_id) {
                return Ok(false);
            }
            seen.push(failed.occurrence_id);
            Ok(true)
        }
        async fn get(&self, _: Uuid) -> Result<Option<FailedOccurrence>> {
            Ok(None)
        }
        async fn resolve(&self, _: Uuid, _: &str, _: Option<String>, _: Option<String>) -> Result<()> {
            Ok(())
        }
        async fn list_unresolved(&self, _: usize) -> Result<Vec<FailedOccurrence>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn publishes_dlq_exactly_once_per_occurrence() {
        let bus = Arc::new(NullBus { published: Mutex::new(vec![]) });
        let handler =
            FailedOccurrenceHandler::new(bus.clone(), Arc::new(NullJobs), Arc::new(MemoryFailedOccurrences { seen: Mutex::new(vec![]) }));

        let mut occurrence = JobOccurrence::new_queued(Uuid::new_v4(), "job", 1, "worker", None, None);
        occurrence.try_transition(OccurrenceStatus::Running, Utc::now());
        occurrence.try_transition(OccurrenceStatus::Failed, Utc::now());

        handler.handle(&occurrence).await.unwrap();
        handler.handle(&occurrence).await.unwrap();

        assert_eq!(bus.published.lock().unwrap().len(), 1);
    }
}

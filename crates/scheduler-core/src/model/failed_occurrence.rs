use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CorrelationId, FailedOccurrenceId, JobId, OccurrenceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FailureType {
    Unknown,
    MaxRetriesExceeded,
    Timeout,
    WorkerCrash,
    InvalidJobData,
    ExternalDependencyFailure,
    UnhandledException,
    Cancelled,
    ZombieDetection,
}

/// Dead-letter entry created once per `JobOccurrence` that exhausts
/// retries, is marked permanent by the worker, or is produced by the
/// zombie detector. Idempotent on `occurrence_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedOccurrence {
    pub id: FailedOccurrenceId,
    pub job_id: JobId,
    pub occurrence_id: OccurrenceId,
    pub correlation_id: CorrelationId,
    pub display_name: String,
    pub job_name_in_worker: String,
    pub worker_id: String,
    pub last_payload: serde_json::Value,
    pub exception: Option<String>,
    pub retry_count: u32,
    pub failure_type: FailureType,
    pub failed_at: DateTime<Utc>,

    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
    pub resolution_action: Option<String>,
}

impl FailedOccurrence {
    pub fn new(
        job_id: JobId,
        occurrence_id: OccurrenceId,
        correlation_id: CorrelationId,
        display_name: impl Into<String>,
        job_name_in_worker: impl Into<String>,
        worker_id: impl Into<String>,
        last_payload: serde_json::Value,
        exception: Option<String>,
        retry_count: u32,
        failure_type: FailureType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            occurrence_id,
            correlation_id,
            display_name: display_name.into(),
            job_name_in_worker: job_name_in_worker.into(),
            worker_id: worker_id.into(),
            last_payload,
            exception,
            retry_count,
            failure_type,
            failed_at: Utc::now(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_note: None,
            resolution_action: None,
        }
    }

    pub fn resolve(&mut self, resolved_by: impl Into<String>, note: Option<String>, action: Option<String>) {
        self.resolved = true;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(resolved_by.into());
        self.resolution_note = note;
        self.resolution_action = action;
    }
}

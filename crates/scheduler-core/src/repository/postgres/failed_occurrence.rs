use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::model::{FailedOccurrence, FailedOccurrenceId, FailureType};
use crate::repository::traits::FailedOccurrenceRepository;
use crate::Result;

use super::PostgresDb;

#[derive(sqlx::FromRow)]
struct FailedOccurrenceRow {
    id: Uuid,
    job_id: Uuid,
    occurrence_id: Uuid,
    correlation_id: Uuid,
    display_name: String,
    job_name_in_worker: String,
    worker_id: String,
    last_payload: Json<serde_json::Value>,
    exception: Option<String>,
    retry_count: i32,
    failure_type: String,
    failed_at: DateTime<Utc>,
    resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    resolution_note: Option<String>,
    resolution_action: Option<String>,
}

fn failure_type_to_str(failure_type: FailureType) -> &'static str {
    match failure_type {
        FailureType::Unknown => "Unknown",
        FailureType::MaxRetriesExceeded => "MaxRetriesExceeded",
        FailureType::Timeout => "Timeout",
        FailureType::WorkerCrash => "WorkerCrash",
        FailureType::InvalidJobData => "InvalidJobData",
        FailureType::ExternalDependencyFailure => "ExternalDependencyFailure",
        FailureType::UnhandledException => "UnhandledException",
        FailureType::Cancelled => "Cancelled",
        FailureType::ZombieDetection => "ZombieDetection",
    }
}

fn failure_type_from_str(value: &str) -> FailureType {
    match value {
        "MaxRetriesExceeded" => FailureType::MaxRetriesExceeded,
        "Timeout" => FailureType::Timeout,
        "WorkerCrash" => FailureType::WorkerCrash,
        "InvalidJobData" => FailureType::InvalidJobData,
        "ExternalDependencyFailure" => FailureType::ExternalDependencyFailure,
        "UnhandledException" => FailureType::UnhandledException,
        "Cancelled" => FailureType::Cancelled,
        "ZombieDetection" => FailureType::ZombieDetection,
        _ => FailureType::Unknown,
    }
}

impl From<FailedOccurrenceRow> for FailedOccurrence {
    fn from(row: FailedOccurrenceRow) -> Self {
        FailedOccurrence {
            id: row.id,
            job_id: row.job_id,
            occurrence_id: row.occurrence_id,
            correlation_id: row.correlation_id,
            display_name: row.display_name,
            job_name_in_worker: row.job_name_in_worker,
            worker_id: row.worker_id,
            last_payload: row.last_payload.0,
            exception: row.exception,
            retry_count: row.retry_count as u32,
            failure_type: failure_type_from_str(&row.failure_type),
            failed_at: row.failed_at,
            resolved: row.resolved,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
            resolution_note: row.resolution_note,
            resolution_action: row.resolution_action,
        }
    }
}

/// Owns the `failed_occurrences` table (the DLQ's persisted half).
/// `create_if_absent` is a plain `ON CONFLICT DO NOTHING` keyed on
/// `occurrence_id`, matching the "one `FailedOccurrence` per source
/// `JobOccurrence`" idempotency rule.
#[derive(Clone)]
pub struct PostgresFailedOccurrenceRepository {
    db: PostgresDb,
}

impl PostgresFailedOccurrenceRepository {
    pub fn new(db: PostgresDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl FailedOccurrenceRepository for PostgresFailedOccurrenceRepository {
    async fn create_if_absent(&self, failed: &FailedOccurrence) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO failed_occurrences (
                id, job_id, occurrence_id, correlation_id, display_name, job_name_in_worker,
                worker_id, last_payload, exception, retry_count, failure_type, failed_at,
                resolved, resolved_at, resolved_by, resolution_note, resolution_action
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            ON CONFLICT (occurrence_id) DO NOTHING
            "#,
        )
        .bind(failed.id)
        .bind(failed.job_id)
        .bind(failed.occurrence_id)
        .bind(failed.correlation_id)
        .bind(&failed.display_name)
        .bind(&failed.job_name_in_worker)
        .bind(&failed.worker_id)
        .bind(Json(&failed.last_payload))
        .bind(&failed.exception)
        .bind(failed.retry_count as i32)
        .bind(failure_type_to_str(failed.failure_type))
        .bind(failed.failed_at)
        .bind(failed.resolved)
        .bind(failed.resolved_at)
        .bind(&failed.resolved_by)
        .bind(&failed.resolution_note)
        .bind(&failed.resolution_action)
        .execute(self.db.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: FailedOccurrenceId) -> Result<Option<FailedOccurrence>> {
        let row = sqlx::query_as::<_, FailedOccurrenceRow>("SELECT * FROM failed_occurrences WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(FailedOccurrence::from))
    }

    async fn resolve(
        &self,
        id: FailedOccurrenceId,
        resolved_by: &str,
        note: Option<String>,
        action: Option<String>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE failed_occurrences
            SET resolved = true, resolved_at = NOW(), resolved_by = $2, resolution_note = $3, resolution_action = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(resolved_by)
        .bind(note)
        .bind(action)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn list_unresolved(&self, limit: usize) -> Result<Vec<FailedOccurrence>> {
        let rows = sqlx::query_as::<_, FailedOccurrenceRow>(
            "SELECT * FROM failed_occurrences WHERE resolved = false ORDER BY failed_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(FailedOccurrence::from).collect())
    }
}

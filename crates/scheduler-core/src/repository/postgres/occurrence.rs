use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgExecutor;
use sqlx::types::Json;
use uuid::Uuid;

use crate::model::{CorrelationId, JobOccurrence, LogEntry, OccurrenceId, OccurrenceStatus, StatusChangeLog};
use crate::repository::traits::JobOccurrenceRepository;
use crate::Result;

use super::PostgresDb;

#[derive(sqlx::FromRow)]
struct JobOccurrenceRow {
    id: Uuid,
    job_id: Uuid,
    job_name: String,
    job_version: i64,
    correlation_id: Uuid,
    worker_id: String,
    status: String,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    result: Option<String>,
    exception: Option<String>,
    is_permanent_failure: bool,
    logs: Json<Vec<LogEntry>>,
    status_change_logs: Json<Vec<StatusChangeLog>>,
    dispatch_retry_count: i32,
    next_dispatch_retry_at: Option<DateTime<Utc>>,
    last_heartbeat: Option<DateTime<Utc>>,
    zombie_timeout_minutes: Option<i64>,
    execution_timeout_seconds: Option<i64>,
}

fn status_to_str(status: OccurrenceStatus) -> &'static str {
    match status {
        OccurrenceStatus::Queued => "Queued",
        OccurrenceStatus::Running => "Running",
        OccurrenceStatus::Completed => "Completed",
        OccurrenceStatus::Failed => "Failed",
        OccurrenceStatus::Cancelled => "Cancelled",
        OccurrenceStatus::TimedOut => "TimedOut",
        OccurrenceStatus::Unknown => "Unknown",
    }
}

fn status_from_str(value: &str) -> OccurrenceStatus {
    match value {
        "Running" => OccurrenceStatus::Running,
        "Completed" => OccurrenceStatus::Completed,
        "Failed" => OccurrenceStatus::Failed,
        "Cancelled" => OccurrenceStatus::Cancelled,
        "TimedOut" => OccurrenceStatus::TimedOut,
        "Unknown" => OccurrenceStatus::Unknown,
        _ => OccurrenceStatus::Queued,
    }
}

impl From<JobOccurrenceRow> for JobOccurrence {
    fn from(row: JobOccurrenceRow) -> Self {
        JobOccurrence {
            id: row.id,
            job_id: row.job_id,
            job_name: row.job_name,
            job_version: row.job_version,
            correlation_id: row.correlation_id,
            worker_id: row.worker_id,
            status: status_from_str(&row.status),
            created_at: row.created_at,
            start_time: row.start_time,
            end_time: row.end_time,
            result: row.result,
            exception: row.exception,
            is_permanent_failure: row.is_permanent_failure,
            logs: row.logs.0,
            status_change_logs: row.status_change_logs.0,
            dispatch_retry_count: row.dispatch_retry_count as u32,
            next_dispatch_retry_at: row.next_dispatch_retry_at,
            last_heartbeat: row.last_heartbeat,
            zombie_timeout_minutes: row.zombie_timeout_minutes,
            execution_timeout_seconds: row.execution_timeout_seconds,
        }
    }
}

/// Owns the `job_occurrences` table. The dispatcher's retry scan and the
/// zombie detector's sweep are plain indexed queries here rather than
/// coordination-store scans, matching the persisted-state section of the
/// external-interfaces contract: `(status, nextDispatchRetryAt,
/// dispatchRetryCount)` and `(status, createdAt)`.
#[derive(Clone)]
pub struct PostgresOccurrenceRepository {
    db: PostgresDb,
}

impl PostgresOccurrenceRepository {
    pub fn new(db: PostgresDb) -> Self {
        Self { db }
    }

    async fn upsert(&self, occurrence: &JobOccurrence, executor: impl PgExecutor<'_>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_occurrences (
                id, job_id, job_name, job_version, correlation_id, worker_id, status,
                created_at, start_time, end_time, result, exception, is_permanent_failure,
                logs, status_change_logs, dispatch_retry_count, next_dispatch_retry_at,
                last_heartbeat, zombie_timeout_minutes, execution_timeout_seconds
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                start_time = EXCLUDED.start_time,
                end_time = EXCLUDED.end_time,
                result = EXCLUDED.result,
                exception = EXCLUDED.exception,
                is_permanent_failure = EXCLUDED.is_permanent_failure,
                logs = EXCLUDED.logs,
                status_change_logs = EXCLUDED.status_change_logs,
                dispatch_retry_count = EXCLUDED.dispatch_retry_count,
                next_dispatch_retry_at = EXCLUDED.next_dispatch_retry_at,
                last_heartbeat = EXCLUDED.last_heartbeat
            "#,
        )
        .bind(occurrence.id)
        .bind(occurrence.job_id)
        .bind(&occurrence.job_name)
        .bind(occurrence.job_version)
        .bind(occurrence.correlation_id)
        .bind(&occurrence.worker_id)
        .bind(status_to_str(occurrence.status))
        .bind(occurrence.created_at)
        .bind(occurrence.start_time)
        .bind(occurrence.end_time)
        .bind(&occurrence.result)
        .bind(&occurrence.exception)
        .bind(occurrence.is_permanent_failure)
        .bind(Json(&occurrence.logs))
        .bind(Json(&occurrence.status_change_logs))
        .bind(occurrence.dispatch_retry_count as i32)
        .bind(occurrence.next_dispatch_retry_at)
        .bind(occurrence.last_heartbeat)
        .bind(occurrence.zombie_timeout_minutes)
        .bind(occurrence.execution_timeout_seconds)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobOccurrenceRepository for PostgresOccurrenceRepository {
    async fn create(&self, occurrence: &JobOccurrence) -> Result<()> {
        self.upsert(occurrence, self.db.pool()).await
    }

    async fn get(&self, id: OccurrenceId) -> Result<Option<JobOccurrence>> {
        let row = sqlx::query_as::<_, JobOccurrenceRow>("SELECT * FROM job_occurrences WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(JobOccurrence::from))
    }

    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Option<JobOccurrence>> {
        let row = sqlx::query_as::<_, JobOccurrenceRow>("SELECT * FROM job_occurrences WHERE correlation_id = $1")
            .bind(correlation_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(JobOccurrence::from))
    }

    async fn save(&self, occurrence: &JobOccurrence) -> Result<()> {
        self.upsert(occurrence, self.db.pool()).await
    }

    async fn save_batch(&self, occurrences: &[JobOccurrence]) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        for occurrence in occurrences {
            self.upsert(occurrence, &mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_heartbeat(&self, correlation_id: CorrelationId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE job_occurrences SET last_heartbeat = $2 WHERE correlation_id = $1")
            .bind(correlation_id)
            .bind(at)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn find_due_dispatch_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobOccurrence>> {
        let rows = sqlx::query_as::<_, JobOccurrenceRow>(
            r#"
            SELECT * FROM job_occurrences
            WHERE status = 'Queued' AND next_dispatch_retry_at IS NOT NULL AND next_dispatch_retry_at <= $1
            ORDER BY next_dispatch_retry_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(JobOccurrence::from).collect())
    }

    async fn find_zombies(&self, now: DateTime<Utc>, default_zombie_timeout_minutes: i64, limit: usize) -> Result<Vec<JobOccurrence>> {
        let rows = sqlx::query_as::<_, JobOccurrenceRow>(
            r#"
            SELECT * FROM job_occurrences
            WHERE status IN ('Queued', 'Running')
              AND created_at + (COALESCE(zombie_timeout_minutes, $2) * INTERVAL '1 minute') < $1
            ORDER BY created_at ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(default_zombie_timeout_minutes)
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(JobOccurrence::from).collect())
    }
}

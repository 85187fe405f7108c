use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::model::{AutoDisableSettings, ConcurrencyPolicy, JobId, JobVersion, ScheduledJob};
use crate::repository::traits::ScheduledJobRepository;
use crate::Result;

use super::PostgresDb;

#[derive(sqlx::FromRow)]
struct ScheduledJobRow {
    id: Uuid,
    display_name: String,
    description: Option<String>,
    tags: Json<Vec<String>>,
    job_name_in_worker: String,
    routing_pattern: String,
    job_data: Json<serde_json::Value>,
    execute_at: DateTime<Utc>,
    cron_expression: Option<String>,
    is_active: bool,
    concurrent_execution_policy: String,
    worker_id: String,
    zombie_timeout_minutes: Option<i64>,
    execution_timeout_seconds: Option<i64>,
    version: i64,
    job_versions: Json<Vec<JobVersion>>,
    auto_disable_settings: Json<AutoDisableSettings>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn policy_to_str(policy: ConcurrencyPolicy) -> &'static str {
    match policy {
        ConcurrencyPolicy::Skip => "Skip",
        ConcurrencyPolicy::Queue => "Queue",
    }
}

fn policy_from_str(value: &str) -> ConcurrencyPolicy {
    match value {
        "Queue" => ConcurrencyPolicy::Queue,
        _ => ConcurrencyPolicy::Skip,
    }
}

impl From<ScheduledJobRow> for ScheduledJob {
    fn from(row: ScheduledJobRow) -> Self {
        ScheduledJob {
            id: row.id,
            display_name: row.display_name,
            description: row.description,
            tags: row.tags.0,
            job_name_in_worker: row.job_name_in_worker,
            routing_pattern: row.routing_pattern,
            job_data: row.job_data.0,
            execute_at: row.execute_at,
            cron_expression: row.cron_expression,
            is_active: row.is_active,
            concurrent_execution_policy: policy_from_str(&row.concurrent_execution_policy),
            worker_id: row.worker_id,
            zombie_timeout_minutes: row.zombie_timeout_minutes,
            execution_timeout_seconds: row.execution_timeout_seconds,
            version: row.version,
            job_versions: row.job_versions.0,
            auto_disable_settings: row.auto_disable_settings.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Owns the `scheduled_jobs` table. `jobData`, `tags`, `jobVersions`, and
/// `autoDisableSettings` round-trip through JSONB; everything else the
/// dispatcher or status tracker filters/sorts on is a plain column so the
/// indexes named in the external-interfaces contract apply.
#[derive(Clone)]
pub struct PostgresScheduledJobRepository {
    db: PostgresDb,
}

impl PostgresScheduledJobRepository {
    pub fn new(db: PostgresDb) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScheduledJobRepository for PostgresScheduledJobRepository {
    async fn create(&self, job: &ScheduledJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (
                id, display_name, description, tags, job_name_in_worker, routing_pattern,
                job_data, execute_at, cron_expression, is_active, concurrent_execution_policy,
                worker_id, zombie_timeout_minutes, execution_timeout_seconds, version,
                job_versions, auto_disable_settings, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(job.id)
        .bind(&job.display_name)
        .bind(&job.description)
        .bind(Json(&job.tags))
        .bind(&job.job_name_in_worker)
        .bind(&job.routing_pattern)
        .bind(Json(&job.job_data))
        .bind(job.execute_at)
        .bind(&job.cron_expression)
        .bind(job.is_active)
        .bind(policy_to_str(job.concurrent_execution_policy))
        .bind(&job.worker_id)
        .bind(job.zombie_timeout_minutes)
        .bind(job.execution_timeout_seconds)
        .bind(job.version)
        .bind(Json(&job.job_versions))
        .bind(Json(&job.auto_disable_settings))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query_as::<_, ScheduledJobRow>("SELECT * FROM scheduled_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(ScheduledJob::from))
    }

    async fn get_many(&self, ids: &[JobId]) -> Result<Vec<ScheduledJob>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ScheduledJobRow>("SELECT * FROM scheduled_jobs WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().map(ScheduledJob::from).collect())
    }

    async fn update(&self, job: &ScheduledJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_jobs SET
                display_name = $2, description = $3, tags = $4, job_name_in_worker = $5,
                routing_pattern = $6, job_data = $7, execute_at = $8, cron_expression = $9,
                is_active = $10, concurrent_execution_policy = $11, worker_id = $12,
                zombie_timeout_minutes = $13, execution_timeout_seconds = $14, version = $15,
                job_versions = $16, auto_disable_settings = $17, updated_at = $18
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(&job.display_name)
        .bind(&job.description)
        .bind(Json(&job.tags))
        .bind(&job.job_name_in_worker)
        .bind(&job.routing_pattern)
        .bind(Json(&job.job_data))
        .bind(job.execute_at)
        .bind(&job.cron_expression)
        .bind(job.is_active)
        .bind(policy_to_str(job.concurrent_execution_policy))
        .bind(&job.worker_id)
        .bind(job.zombie_timeout_minutes)
        .bind(job.execution_timeout_seconds)
        .bind(job.version)
        .bind(Json(&job.job_versions))
        .bind(Json(&job.auto_disable_settings))
        .bind(job.updated_at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn list_active(&self) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduledJobRow>(
            "SELECT * FROM scheduled_jobs WHERE is_active = true ORDER BY execute_at ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(ScheduledJob::from).collect())
    }

    async fn set_active(&self, id: JobId, is_active: bool) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET is_active = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(is_active)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn apply_auto_disable(&self, id: JobId, settings: &AutoDisableSettings, is_active: bool) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_jobs SET auto_disable_settings = $2, is_active = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Json(settings))
        .bind(is_active)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1").bind(id).execute(self.db.pool()).await?;
        Ok(())
    }
}

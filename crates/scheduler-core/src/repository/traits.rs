//! Repository traits for database abstraction.
//!
//! These define the interface every persistence backend must provide;
//! `postgres` is the only implementation this crate carries, grounded
//! directly on the schema it owns, but the trait boundary keeps callers
//! (dispatcher, status tracker, zombie detector, failed-occurrence
//! handler) decoupled from `sqlx` types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{AutoDisableSettings, FailedOccurrence, JobOccurrence, ScheduledJob};
use crate::model::{CorrelationId, FailedOccurrenceId, JobId, OccurrenceId};
use crate::Result;

/// Authoritative CRUD for job definitions, database-agnostic.
#[async_trait]
pub trait ScheduledJobRepository: Send + Sync + 'static {
    async fn create(&self, job: &ScheduledJob) -> Result<()>;
    async fn get(&self, id: JobId) -> Result<Option<ScheduledJob>>;
    async fn get_many(&self, ids: &[JobId]) -> Result<Vec<ScheduledJob>>;
    async fn update(&self, job: &ScheduledJob) -> Result<()>;
    async fn list_active(&self) -> Result<Vec<ScheduledJob>>;
    async fn set_active(&self, id: JobId, is_active: bool) -> Result<()>;

    /// Applied by the Status Tracker's auto-disable circuit breaker; a
    /// dedicated method rather than a full `update` because it only ever
    /// touches `autoDisableSettings` and `isActive`.
    async fn apply_auto_disable(&self, id: JobId, settings: &AutoDisableSettings, is_active: bool) -> Result<()>;

    async fn delete(&self, id: JobId) -> Result<()>;
}

/// CRUD plus the range/scan queries the dispatcher, status tracker, and
/// zombie detector each run over `JobOccurrence`.
#[async_trait]
pub trait JobOccurrenceRepository: Send + Sync + 'static {
    async fn create(&self, occurrence: &JobOccurrence) -> Result<()>;
    async fn get(&self, id: OccurrenceId) -> Result<Option<JobOccurrence>>;
    async fn get_by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Option<JobOccurrence>>;

    /// Persist a full occurrence snapshot. Callers are responsible for
    /// having already applied `try_transition`/idempotency rules in
    /// memory; this is a plain upsert, not itself transition-aware.
    async fn save(&self, occurrence: &JobOccurrence) -> Result<()>;

    /// Apply a batch of occurrence snapshots as one transaction, used by
    /// the Status Tracker to amortise commit cost per `batchSize`.
    async fn save_batch(&self, occurrences: &[JobOccurrence]) -> Result<()>;

    async fn update_heartbeat(&self, correlation_id: CorrelationId, at: DateTime<Utc>) -> Result<()>;

    /// Occurrences in `Queued` whose `nextDispatchRetryAt <= now`.
    async fn find_due_dispatch_retries(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<JobOccurrence>>;

    /// Occurrences in `Queued`/`Running` whose `createdAt + zombieTimeoutMinutes < now`.
    async fn find_zombies(&self, now: DateTime<Utc>, default_zombie_timeout_minutes: i64, limit: usize) -> Result<Vec<JobOccurrence>>;
}

/// CRUD for DLQ rows, idempotent on `occurrenceId`.
#[async_trait]
pub trait FailedOccurrenceRepository: Send + Sync + 'static {
    /// Insert a `FailedOccurrence` unless one already exists for
    /// `failed.occurrence_id`. Returns `true` if this call inserted it.
    async fn create_if_absent(&self, failed: &FailedOccurrence) -> Result<bool>;

    async fn get(&self, id: FailedOccurrenceId) -> Result<Option<FailedOccurrence>>;

    async fn resolve(
        &self,
        id: FailedOccurrenceId,
        resolved_by: &str,
        note: Option<String>,
        action: Option<String>,
    ) -> Result<()>;

    async fn list_unresolved(&self, limit: usize) -> Result<Vec<FailedOccurrence>>;
}

/// Repository container, wired once at process start-up and threaded
/// through the control-plane components that need persistence.
#[derive(Clone)]
pub struct Repositories<J, O, F>
where
    J: ScheduledJobRepository,
    O: JobOccurrenceRepository,
    F: FailedOccurrenceRepository,
{
    pub jobs: J,
    pub occurrences: O,
    pub failed_occurrences: F,
}

impl<J, O, F> Repositories<J, O, F>
where
    J: ScheduledJobRepository,
    O: JobOccurrenceRepository,
    F: FailedOccurrenceRepository,
{
    pub fn new(jobs: J, occurrences: O, failed_occurrences: F) -> Self {
        Self { jobs, occurrences, failed_occurrences }
    }
}

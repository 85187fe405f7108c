//! Shared types and infrastructure clients for the job scheduler's
//! control-plane and worker binaries: domain models, the coordination
//! store and message bus abstractions (each with a Redis/AMQP
//! implementation plus an in-memory fake for tests), Postgres
//! repositories, configuration, retry/backoff, cron evaluation, and the
//! job-handler trait the worker runtime dispatches into.

pub mod bus;
pub mod config;
pub mod coordination;
pub mod cron_util;
pub mod db;
pub mod error;
pub mod handler;
pub mod model;
pub mod repository;
pub mod retry;

pub use config::Config;
pub use coordination::CoordinationStore;
pub use db::migrate::{auto_migrate, DbStatus, Migrator};
pub use error::{Error, Result};
pub use handler::{ExecutionOutcome, HandlerRegistry, JobContext, JobHandler};
pub use model::{
    AutoDisableSettings, ConcurrencyPolicy, CorrelationId, FailedOccurrence, FailedOccurrenceId, FailureType, JobId,
    JobOccurrence, JobVersion, LogEntry, LogLevel, OccurrenceId, OccurrenceStatus, ScheduledJob, StatusChangeLog,
    WorkerInstance, WorkerStatus,
};
pub use repository::{
    create_pool, Database, FailedOccurrenceRepository, FailedOccurrenceRepositoryTrait, JobOccurrenceRepositoryTrait,
    OccurrenceRepository, Repositories, ScheduledJobRepository, ScheduledJobRepositoryTrait,
};

/// Current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!VERSION.is_empty());
    }
}

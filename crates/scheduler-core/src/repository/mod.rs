//! Repository module for database access.
//!
//! PostgreSQL is the only backend this crate carries; the trait
//! boundary in [`traits`] exists so control-plane components depend on
//! the three repository traits rather than `sqlx` directly.

pub mod postgres;
pub mod traits;

pub use postgres::{
    create_pool, PostgresDb as Database, PostgresFailedOccurrenceRepository as FailedOccurrenceRepository,
    PostgresOccurrenceRepository as OccurrenceRepository, PostgresScheduledJobRepository as ScheduledJobRepository,
};

pub use traits::{
    FailedOccurrenceRepository as FailedOccurrenceRepositoryTrait,
    JobOccurrenceRepository as JobOccurrenceRepositoryTrait, Repositories,
    ScheduledJobRepository as ScheduledJobRepositoryTrait,
};

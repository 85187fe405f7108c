//! Domain types shared by the control plane and the worker runtime.
//!
//! These mirror the persisted schema (`ScheduledJob`, `JobOccurrence`,
//! `FailedOccurrence`) and the coordination-store-only worker registry.
//! Nothing in this module talks to a database, a bus, or the coordination
//! store directly — see [`crate::repository`], [`crate::bus`], and
//! [`crate::coordination`] for that.

mod failed_occurrence;
mod job;
mod occurrence;
mod worker;

pub use failed_occurrence::{FailedOccurrence, FailureType};
pub use job::{AutoDisableSettings, ConcurrencyPolicy, JobVersion, ScheduledJob};
pub use occurrence::{JobOccurrence, LogEntry, LogLevel, OccurrenceStatus, StatusChangeLog};
pub use worker::{WorkerInstance, WorkerStatus};

use uuid::Uuid;

pub type JobId = Uuid;
pub type OccurrenceId = Uuid;
pub type FailedOccurrenceId = Uuid;
pub type CorrelationId = Uuid;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CorrelationId, JobId, OccurrenceId};

/// Lifecycle of a single execution attempt. Every variant except `Queued`
/// and `Running` is terminal: once an occurrence reaches one of them no
/// further transition is accepted (see [`OccurrenceStatus::is_terminal`]).
///
/// `Unknown` is terminal for every external consumer of this type; only the
/// zombie detector is permitted to transition an occurrence *out* of it
/// (into `Failed` with `ZombieDetection`), via a repository method ordinary
/// status updates never call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum OccurrenceStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
    Unknown,
}

impl OccurrenceStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OccurrenceStatus::Queued | OccurrenceStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub category: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChangeLog {
    pub timestamp: DateTime<Utc>,
    pub from: Option<OccurrenceStatus>,
    pub to: OccurrenceStatus,
}

/// One execution instance of a `ScheduledJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOccurrence {
    pub id: OccurrenceId,
    pub job_id: JobId,
    pub job_name: String,
    pub job_version: i64,
    pub correlation_id: CorrelationId,

    pub worker_id: String,
    pub status: OccurrenceStatus,

    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,

    pub result: Option<String>,
    pub exception: Option<String>,
    pub is_permanent_failure: bool,

    pub logs: Vec<LogEntry>,
    pub status_change_logs: Vec<StatusChangeLog>,

    pub dispatch_retry_count: u32,
    pub next_dispatch_retry_at: Option<DateTime<Utc>>,

    pub last_heartbeat: Option<DateTime<Utc>>,
    pub zombie_timeout_minutes: Option<i64>,
    pub execution_timeout_seconds: Option<i64>,
}

impl JobOccurrence {
    pub fn new_queued(
        job_id: JobId,
        job_name: impl Into<String>,
        job_version: i64,
        worker_id: impl Into<String>,
        zombie_timeout_minutes: Option<i64>,
        execution_timeout_seconds: Option<i64>,
    ) -> Self {
        let now = Utc::now();
        let mut occurrence = Self {
            id: Uuid::new_v4(),
            job_id,
            job_name: job_name.into(),
            job_version,
            correlation_id: Uuid::new_v4(),
            worker_id: worker_id.into(),
            status: OccurrenceStatus::Queued,
            created_at: now,
            start_time: None,
            end_time: None,
            result: None,
            exception: None,
            is_permanent_failure: false,
            logs: Vec::new(),
            status_change_logs: Vec::new(),
            dispatch_retry_count: 0,
            next_dispatch_retry_at: None,
            last_heartbeat: None,
            zombie_timeout_minutes,
            execution_timeout_seconds,
        };
        occurrence.status_change_logs.push(StatusChangeLog {
            timestamp: now,
            from: None,
            to: OccurrenceStatus::Queued,
        });
        occurrence
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Apply a status transition if and only if the transition rule from
    /// the status tracker's contract allows it: never overwrite a terminal
    /// status with anything, terminal or not. Returns `true` if the
    /// transition was applied.
    pub fn try_transition(&mut self, to: OccurrenceStatus, at: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let from = self.status;
        self.status = to;
        self.status_change_logs.push(StatusChangeLog {
            timestamp: at,
            from: Some(from),
            to,
        });
        if to == OccurrenceStatus::Running && self.start_time.is_none() {
            self.start_time = Some(at);
        }
        if to.is_terminal() {
            self.end_time = Some(at);
        }
        true
    }

    /// The single transition permitted from outside the normal status-
    /// tracker path: `Unknown -> Failed(ZombieDetection)`, used only by the
    /// zombie detector. Bypasses `try_transition`'s terminal guard because
    /// `Unknown` is itself terminal to every other caller.
    pub fn zombie_override_to_failed(&mut self, at: DateTime<Utc>) {
        let from = self.status;
        self.status = OccurrenceStatus::Failed;
        self.status_change_logs.push(StatusChangeLog {
            timestamp: at,
            from: Some(from),
            to: OccurrenceStatus::Failed,
        });
        self.end_time = Some(at);
    }

    pub fn append_log(&mut self, level: LogLevel, message: impl Into<String>, category: Option<String>, data: Option<serde_json::Value>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            category,
            data,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_rejects_further_transitions() {
        let mut occurrence = JobOccurrence::new_queued(Uuid::new_v4(), "job", 1, "w", None, None);
        let now = Utc::now();
        assert!(occurrence.try_transition(OccurrenceStatus::Running, now));
        assert!(occurrence.try_transition(OccurrenceStatus::Completed, now));
        assert!(!occurrence.try_transition(OccurrenceStatus::Running, now));
        assert_eq!(occurrence.status, OccurrenceStatus::Completed);
    }

    #[test]
    fn duration_ms_only_present_with_both_timestamps() {
        let mut occurrence = JobOccurrence::new_queued(Uuid::new_v4(), "job", 1, "w", None, None);
        assert!(occurrence.duration_ms().is_none());
        let start = Utc::now();
        occurrence.try_transition(OccurrenceStatus::Running, start);
        assert!(occurrence.duration_ms().is_none());
        let end = start + chrono::Duration::milliseconds(250);
        occurrence.try_transition(OccurrenceStatus::Completed, end);
        assert_eq!(occurrence.duration_ms(), Some(250));
    }
}

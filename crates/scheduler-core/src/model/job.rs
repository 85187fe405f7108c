use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobId;

/// When the previous occurrence of a job is still `Running` at fire time,
/// `Skip` drops the new fire and `Queue` enqueues it behind the running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ConcurrencyPolicy {
    Skip,
    Queue,
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        ConcurrencyPolicy::Skip
    }
}

/// Append-only snapshot of a `ScheduledJob`'s definition at the moment its
/// `version` was bumped. Cheap to keep around since `jobData` on the job
/// itself is typically small, and this is the only audit trail a definition
/// change leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobVersion {
    pub version: i64,
    pub changed_at: DateTime<Utc>,
    pub job_data: serde_json::Value,
    pub cron_expression: Option<String>,
    pub execute_at: DateTime<Utc>,
}

/// Per-job override of the circuit-breaker that auto-disables a job after
/// repeated failures. Embedded in `ScheduledJob` rather than a side table
/// since it is always read/written together with the job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoDisableSettings {
    pub consecutive_failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disable_reason: Option<String>,
    pub enabled: bool,
    pub threshold: Option<u32>,
    pub auto_re_enable_cooldown_minutes: Option<i64>,
}

impl AutoDisableSettings {
    pub fn new_enabled(threshold: u32) -> Self {
        Self {
            enabled: true,
            threshold: Some(threshold),
            ..Default::default()
        }
    }
}

/// Persistent definition of a scheduled job. Owned exclusively by the
/// control plane; workers never write to it, only read `jobData` and
/// `jobNameInWorker` off the dispatch message built from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    pub display_name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,

    pub job_name_in_worker: String,
    pub routing_pattern: String,

    pub job_data: serde_json::Value,

    pub execute_at: DateTime<Utc>,
    pub cron_expression: Option<String>,
    pub is_active: bool,

    pub concurrent_execution_policy: ConcurrencyPolicy,
    pub worker_id: String,

    pub zombie_timeout_minutes: Option<i64>,
    pub execution_timeout_seconds: Option<i64>,

    pub version: i64,
    pub job_versions: Vec<JobVersion>,

    pub auto_disable_settings: AutoDisableSettings,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Build a new job definition, auto-generating the routing pattern the
    /// way the dispatch algorithm expects (`<workerId>.<jobNameLower>.*`)
    /// when the caller doesn't supply one.
    pub fn new(
        display_name: impl Into<String>,
        job_name_in_worker: impl Into<String>,
        worker_id: impl Into<String>,
        job_data: serde_json::Value,
        execute_at: DateTime<Utc>,
    ) -> Self {
        let job_name_in_worker = job_name_in_worker.into();
        let worker_id = worker_id.into();
        let routing_pattern = Self::default_routing_pattern(&worker_id, &job_name_in_worker);
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            description: None,
            tags: Vec::new(),
            job_name_in_worker,
            routing_pattern,
            job_data,
            execute_at,
            cron_expression: None,
            is_active: true,
            concurrent_execution_policy: ConcurrencyPolicy::default(),
            worker_id,
            zombie_timeout_minutes: None,
            execution_timeout_seconds: None,
            version: 1,
            job_versions: Vec::new(),
            auto_disable_settings: AutoDisableSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn default_routing_pattern(worker_id: &str, job_name_in_worker: &str) -> String {
        format!("{}.{}.*", worker_id.to_lowercase(), job_name_in_worker.to_lowercase())
    }

    pub fn with_cron(mut self, cron_expression: impl Into<String>) -> Self {
        self.cron_expression = Some(cron_expression.into());
        self
    }

    pub fn with_policy(mut self, policy: ConcurrencyPolicy) -> Self {
        self.concurrent_execution_policy = policy;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_zombie_timeout_minutes(mut self, minutes: i64) -> Self {
        self.zombie_timeout_minutes = Some(minutes);
        self
    }

    pub fn with_execution_timeout_seconds(mut self, seconds: i64) -> Self {
        self.execution_timeout_seconds = Some(seconds);
        self
    }

    pub fn with_auto_disable(mut self, settings: AutoDisableSettings) -> Self {
        self.auto_disable_settings = settings;
        self
    }

    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }

    /// Bump `version`, appending the outgoing definition to `jobVersions`
    /// before the caller mutates fields on `self`. `version` strictly
    /// increases; this is the only place it is written.
    pub fn record_version_change(&mut self) {
        self.job_versions.push(JobVersion {
            version: self.version,
            changed_at: self.updated_at,
            job_data: self.job_data.clone(),
            cron_expression: self.cron_expression.clone(),
            execute_at: self.execute_at,
        });
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Routing key for a specific occurrence: the pattern's trailing
    /// wildcard replaced by the occurrence's correlation id.
    pub fn routing_key_for(&self, correlation_id: Uuid) -> String {
        match self.routing_pattern.strip_suffix('*') {
            Some(prefix) => format!("{}{}", prefix, correlation_id),
            None => format!("{}.{}", self.routing_pattern, correlation_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_routing_pattern_lowercases_and_templates() {
        let pattern = ScheduledJob::default_routing_pattern("ReportsWorker", "SendWeeklyDigest");
        assert_eq!(pattern, "reportsworker.sendweeklydigest.*");
    }

    #[test]
    fn routing_key_substitutes_wildcard_with_correlation_id() {
        let job = ScheduledJob::new(
            "Weekly digest",
            "SendWeeklyDigest",
            "ReportsWorker",
            serde_json::json!({}),
            Utc::now(),
        );
        let correlation_id = Uuid::new_v4();
        let key = job.routing_key_for(correlation_id);
        assert_eq!(key, format!("reportsworker.sendweeklydigest.{}", correlation_id));
    }

    #[test]
    fn record_version_change_snapshots_and_increments() {
        let mut job = ScheduledJob::new(
            "Job",
            "Name",
            "worker",
            serde_json::json!({"a": 1}),
            Utc::now(),
        );
        assert_eq!(job.version, 1);
        job.job_data = serde_json::json!({"a": 2});
        job.record_version_change();
        assert_eq!(job.version, 2);
        assert_eq!(job.job_versions.len(), 1);
        assert_eq!(job.job_versions[0].version, 1);
        assert_eq!(job.job_versions[0].job_data, serde_json::json!({"a": 1}));
    }
}

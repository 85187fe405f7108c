//! Key naming for the coordination store. Every key the scheduler writes
//! is namespaced under a configurable prefix so multiple environments can
//! share one Redis instance without collision.

/// Builds namespaced coordination-store keys, following the fixed key
/// layout of the external-interfaces contract this crate implements:
/// `scheduled_jobs`, `lock:<jobId>`, `running`, `job:<jobId>`,
/// `worker:<workerId>`, `cancellation_channel`, `dispatcher:leader`.
#[derive(Debug, Clone)]
pub struct KeyPrefix(String);

impl KeyPrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self(prefix.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn key(&self, suffix: impl AsRef<str>) -> String {
        format!("{}{}", self.0, suffix.as_ref())
    }

    /// Time-ordered set mapping `jobId -> executeAt` (unix seconds).
    pub fn scheduled_index(&self) -> String {
        self.key("scheduled_jobs")
    }

    /// Mutual-exclusion marker for a single job's mark-running test-and-set.
    pub fn job_lock(&self, job_id: &str) -> String {
        self.key(format!("lock:{}", job_id))
    }

    /// Set of `jobId`s currently running, under any concurrency policy.
    pub fn running_set(&self) -> String {
        self.key("running")
    }

    /// Cached job definition hash, TTL 24h.
    pub fn job_cache(&self, job_id: &str) -> String {
        self.key(format!("job:{}", job_id))
    }

    /// Worker instance registry hash.
    pub fn worker_hash(&self, worker_id: &str) -> String {
        self.key(format!("worker:{}", worker_id))
    }

    /// Per-`(workerId, jobNameInWorker)` consumer-capacity counter.
    pub fn consumer_capacity(&self, worker_id: &str, job_name_in_worker: &str) -> String {
        self.key(format!("capacity:{}:{}", worker_id, job_name_in_worker))
    }

    /// Dispatcher leadership lease, TTL `lockTtlSeconds`.
    pub fn dispatcher_leader(&self) -> String {
        self.key("dispatcher:leader")
    }

    /// Single global pub/sub channel carrying
    /// `{correlationId, jobId, occurrenceId, reason}` cancellation signals.
    pub fn cancellation_channel(&self) -> String {
        self.key("cancellation_channel")
    }
}

impl Default for KeyPrefix {
    fn default() -> Self {
        Self::new("Milvaion:JobScheduler:")
    }
}

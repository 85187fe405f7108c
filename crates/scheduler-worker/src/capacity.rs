//! Consumer-type capacity gate.
//!
//! The coordination store exposes exactly one atomic primitive, `setnx`,
//! so per-`(workerId, jobNameInWorker)` capacity is modelled as a fixed
//! set of numbered slot keys rather than a counter: acquiring capacity is
//! "claim the first free slot in `0..maxParallelJobs` via `setnx`",
//! releasing is "delete the slot key". Each attempt is a single atomic
//! round trip; worst case is `maxParallelJobs` round trips to find a free
//! slot, which is small by construction.

use std::sync::Arc;

use scheduler_core::coordination::{CoordinationStore, KeyPrefix};
use scheduler_core::Result;

pub struct CapacityGate {
    coordination: Arc<dyn CoordinationStore>,
    keys: KeyPrefix,
}

/// A held capacity slot. Dropping it without calling [`release`] leaks
/// the slot until its TTL expires, so callers must release explicitly
/// once the job reaches a terminal state.
///
/// [`release`]: CapacitySlot::release
pub struct CapacitySlot {
    key: String,
    coordination: Arc<dyn CoordinationStore>,
}

impl CapacitySlot {
    pub async fn release(self) -> Result<()> {
        self.coordination.del(&self.key).await
    }
}

impl CapacityGate {
    pub fn new(coordination: Arc<dyn CoordinationStore>, keys: KeyPrefix) -> Self {
        Self { coordination, keys }
    }

    /// Attempt to claim one of `max_parallel_jobs` slots for
    /// `(worker_id, job_name_in_worker)`. `None` means every slot is
    /// currently held elsewhere.
    pub async fn try_acquire(
        &self,
        worker_id: &str,
        job_name_in_worker: &str,
        max_parallel_jobs: u32,
        ttl: std::time::Duration,
    ) -> Result<Option<CapacitySlot>> {
        let base = self.keys.consumer_capacity(worker_id, job_name_in_worker);
        for slot in 0..max_parallel_jobs {
            let key = format!("{}:{}", base, slot);
            if self.coordination.setnx(&key, worker_id, Some(ttl)).await? {
                return Ok(Some(CapacitySlot { key, coordination: self.coordination.clone() }));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scheduler_core::coordination::InMemoryCoordinationStore;
    use std::time::Duration;

    #[tokio::test]
    async fn exhausts_slots_then_frees_on_release() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
        let gate = CapacityGate::new(store, KeyPrefix::default());

        let first = gate.try_acquire("w1", "email", 1, Duration::from_secs(60)).await.unwrap();
        assert!(first.is_some());

        let second = gate.try_acquire("w1", "email", 1, Duration::from_secs(60)).await.unwrap();
        assert!(second.is_none());

        first.unwrap().release().await.unwrap();

        let third = gate.try_acquire("w1", "email", 1, Duration::from_secs(60)).await.unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn distinct_job_names_have_independent_capacity() {
        let store: Arc<dyn CoordinationStore> = Arc::new(InMemoryCoordinationStore::new());
        let gate = CapacityGate::new(store, KeyPrefix::default());

        assert!(gate.try_acquire("w1", "email", 1, Duration::from_secs(60)).await.unwrap().is_some());
        assert!(gate.try_acquire("w1", "sms", 1, Duration::from_secs(60)).await.unwrap().is_some());
    }
}

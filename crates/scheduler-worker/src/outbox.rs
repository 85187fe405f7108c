//! Worker-local outbox: every status update, log entry, and heartbeat the
//! consumer produces is written here before publication is attempted, so
//! none of it is lost across a broker outage or a process crash. Backed
//! by `sled`, the same durable embedded store this workspace's teacher
//! used for its own local caches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use scheduler_core::bus::{JobHeartbeatMessage, LogMessage, StatusUpdateMessage, WorkerHeartbeatMessage};
use scheduler_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// One durable record. Status updates and logs queue in FIFO order per
/// correlation id (insertion-ordered keys); heartbeats are coalesced into
/// their own tree keyed by identity so only the newest unsent one survives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboxEvent {
    StatusUpdate(StatusUpdateMessage),
    Log(LogMessage),
}

/// Durable local store for the worker's outbound event stream.
///
/// `events` holds `StatusUpdate`/`Log` records keyed by a monotonic
/// counter so iteration order is FIFO; `worker_heartbeats` and
/// `job_heartbeats` are each keyed by the heartbeat's identity
/// (`workerId:instanceId`, `correlationId`) so a fresh write silently
/// overwrites the one it supersedes — the coalescing rule from the
/// outbox contract.
pub struct Outbox {
    events: sled::Tree,
    worker_heartbeats: sled::Tree,
    job_heartbeats: sled::Tree,
    next_id: AtomicU64,
}

impl Outbox {
    pub fn open(path: &str) -> Result<Arc<Self>> {
        let db = sled::open(path)?;
        let events = db.open_tree("events")?;
        let worker_heartbeats = db.open_tree("worker_heartbeats")?;
        let job_heartbeats = db.open_tree("job_heartbeats")?;

        let next_id = events.iter().keys().rev().next().transpose()?.map(|k| decode_key(&k) + 1).unwrap_or(0);

        Ok(Arc::new(Self { events, worker_heartbeats, job_heartbeats, next_id: AtomicU64::new(next_id) }))
    }

    fn enqueue(&self, event: &OutboxEvent) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let encoded = serde_json::to_vec(event)?;
        self.events.insert(encode_key(id), encoded)?;
        Ok(id)
    }

    pub fn enqueue_status_update(&self, message: StatusUpdateMessage) -> Result<u64> {
        self.enqueue(&OutboxEvent::StatusUpdate(message))
    }

    pub fn enqueue_log(&self, message: LogMessage) -> Result<u64> {
        self.enqueue(&OutboxEvent::Log(message))
    }

    pub fn set_worker_heartbeat(&self, message: WorkerHeartbeatMessage) -> Result<()> {
        let key = format!("{}:{}", message.worker_id, message.instance_id);
        self.worker_heartbeats.insert(key, serde_json::to_vec(&message)?)?;
        Ok(())
    }

    pub fn set_job_heartbeat(&self, message: JobHeartbeatMessage) -> Result<()> {
        self.job_heartbeats.insert(message.correlation_id.to_string(), serde_json::to_vec(&message)?)?;
        Ok(())
    }

    /// All queued events in FIFO order, oldest first.
    pub fn drain_events(&self) -> Result<Vec<(u64, OutboxEvent)>> {
        let mut out = Vec::new();
        for entry in self.events.iter() {
            let (key, value) = entry?;
            let event: OutboxEvent = serde_json::from_slice(&value)?;
            out.push((decode_key(&key), event));
        }
        Ok(out)
    }

    pub fn remove_event(&self, id: u64) -> Result<()> {
        self.events.remove(encode_key(id))?;
        Ok(())
    }

    pub fn drain_worker_heartbeats(&self) -> Result<Vec<(String, WorkerHeartbeatMessage)>> {
        self.drain_tree(&self.worker_heartbeats)
    }

    pub fn drain_job_heartbeats(&self) -> Result<Vec<(String, JobHeartbeatMessage)>> {
        self.drain_tree(&self.job_heartbeats)
    }

    fn drain_tree<T: serde::de::DeserializeOwned>(&self, tree: &sled::Tree) -> Result<Vec<(String, T)>> {
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec()).map_err(|err| Error::Outbox(err.to_string()))?;
            let value: T = serde_json::from_slice(&value)?;
            out.push((key, value));
        }
        Ok(out)
    }

    pub fn remove_worker_heartbeat(&self, key: &str) -> Result<()> {
        self.worker_heartbeats.remove(key)?;
        Ok(())
    }

    pub fn remove_job_heartbeat(&self, key: &str) -> Result<()> {
        self.job_heartbeats.remove(key)?;
        Ok(())
    }
}

fn encode_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_key(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use scheduler_core::model::{LogEntry, LogLevel, OccurrenceStatus};
    use uuid::Uuid;

    fn status_message() -> StatusUpdateMessage {
        StatusUpdateMessage {
            correlation_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            worker_id: "w1".to_string(),
            status: OccurrenceStatus::Completed,
            start_time: None,
            end_time: None,
            duration_ms: None,
            result: None,
            exception: None,
            message_timestamp: Utc::now(),
        }
    }

    #[test]
    fn drains_events_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().to_str().unwrap()).unwrap();

        let first = outbox.enqueue_status_update(status_message()).unwrap();
        let second = outbox.enqueue_status_update(status_message()).unwrap();

        let drained = outbox.drain_events().unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].0, first);
        assert_eq!(drained[1].0, second);
        assert!(first < second);
    }

    #[test]
    fn removing_an_event_drops_it_from_the_drain() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().to_str().unwrap()).unwrap();
        let id = outbox.enqueue_status_update(status_message()).unwrap();
        outbox.remove_event(id).unwrap();
        assert!(outbox.drain_events().unwrap().is_empty());
    }

    #[test]
    fn heartbeats_coalesce_to_the_newest_write() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().to_str().unwrap()).unwrap();
        let worker_id = "w1".to_string();
        let instance_id = "i1".to_string();

        for current_jobs in 0..3u32 {
            outbox
                .set_worker_heartbeat(WorkerHeartbeatMessage {
                    worker_id: worker_id.clone(),
                    instance_id: instance_id.clone(),
                    current_jobs,
                    timestamp: Utc::now(),
                })
                .unwrap();
        }

        let drained = outbox.drain_worker_heartbeats().unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].1.current_jobs, 2);
    }

    #[test]
    fn resumes_event_ids_past_what_was_already_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        {
            let outbox = Outbox::open(&path).unwrap();
            outbox.enqueue_status_update(status_message()).unwrap();
        }
        let outbox = Outbox::open(&path).unwrap();
        let id = outbox.enqueue_status_update(status_message()).unwrap();
        assert_eq!(id, 1);
    }

    #[test]
    fn log_events_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = Outbox::open(dir.path().to_str().unwrap()).unwrap();
        outbox
            .enqueue_log(LogMessage {
                correlation_id: Uuid::new_v4(),
                worker_id: "w1".to_string(),
                log: LogEntry { timestamp: Utc::now(), level: LogLevel::Information, message: "hi".into(), category: None, data: None },
                message_timestamp: Utc::now(),
            })
            .unwrap();
        assert_eq!(outbox.drain_events().unwrap().len(), 1);
    }
}

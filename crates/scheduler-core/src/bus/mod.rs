//! Message bus abstraction and wire schemas.
//!
//! The bus carries six logical streams over one topic exchange: dispatch
//! messages routed to workers, and status/log/heartbeat/registration
//! messages flowing back to the control plane, plus a dead-letter stream
//! for occurrences the Failed-Occurrence Handler gives up on. Field names
//! are camelCase on the wire to match the external-interfaces contract
//! regardless of this crate's own `snake_case` conventions.

pub mod amqp;
mod topology;

pub use amqp::{AmqpConfig, LapinBus};
pub use topology::{BusTopology, QueueName};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{LogEntry, OccurrenceStatus};
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub correlation_id: Uuid,
    pub job_id: Uuid,
    pub job_name: String,
    pub job_data: serde_json::Value,
    pub execute_at: DateTime<Utc>,
    pub execution_timeout_seconds: Option<i64>,
    pub zombie_timeout_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateMessage {
    pub correlation_id: Uuid,
    pub job_id: Uuid,
    pub worker_id: String,
    pub status: OccurrenceStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub result: Option<String>,
    pub exception: Option<String>,
    pub message_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    pub correlation_id: Uuid,
    pub worker_id: String,
    pub log: LogEntry,
    pub message_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHeartbeatMessage {
    pub worker_id: String,
    pub instance_id: String,
    pub current_jobs: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobHeartbeatMessage {
    pub correlation_id: Uuid,
    pub job_id: Uuid,
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationMessage {
    pub worker_id: String,
    pub instance_id: String,
    pub display_name: String,
    pub host_name: String,
    pub ip_address: String,
    pub routing_patterns: Vec<String>,
    pub job_data_definitions: serde_json::Value,
    pub job_types: Vec<String>,
    pub max_parallel_jobs: u32,
    pub version: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DlqMessage {
    pub id: Uuid,
    pub display_name: String,
    pub job_name_in_worker: String,
    pub job_data: serde_json::Value,
    pub execute_at: DateTime<Utc>,
    pub status: OccurrenceStatus,
    pub exception: Option<String>,
}

/// Cancellation signal published on the single global cancellation
/// channel, received over the coordination store rather than the bus
/// (cancellation must reach every subscribed instance immediately, not
/// wait behind queued dispatch traffic).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationSignal {
    pub correlation_id: Uuid,
    pub job_id: Uuid,
    pub occurrence_id: Uuid,
    pub reason: String,
}

/// A delivery handed to a consumer: the deserialised payload plus an ack
/// handle. Messages are acknowledged only after the outbox (worker side)
/// or the batch commit (control-plane side) has durably recorded the
/// effect, never eagerly.
pub struct Delivery<T> {
    pub payload: T,
    pub routing_key: String,
    ack: Box<dyn FnOnce(bool) -> futures::future::BoxFuture<'static, Result<()>> + Send>,
}

impl<T> Delivery<T> {
    pub fn new<F>(payload: T, routing_key: String, ack: F) -> Self
    where
        F: FnOnce(bool) -> futures::future::BoxFuture<'static, Result<()>> + Send + 'static,
    {
        Self { payload, routing_key, ack: Box::new(ack) }
    }

    /// Acknowledge successful processing.
    pub async fn ack(self) -> Result<()> {
        (self.ack)(true).await
    }

    /// Reject the message. `requeue = false` matches the "unknown job
    /// type at worker" policy: reject without requeue so the dispatcher's
    /// own retry path, not the broker, drives redelivery.
    pub async fn reject(self, requeue: bool) -> Result<()> {
        (self.ack)(requeue).await
    }
}

pub type DeliveryStream<T> = BoxStream<'static, Result<Delivery<T>>>;

/// The message-bus operations the scheduler needs: publish onto the topic
/// exchange with a routing key, and consume a named durable queue as a
/// stream of deliveries. Bound to AMQP shapes (exchange/queue/routing key)
/// because the wire topology is part of the external contract, not an
/// implementation detail this trait hides.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_dispatch(&self, routing_key: &str, message: &DispatchMessage) -> Result<()>;
    async fn publish_status_update(&self, message: &StatusUpdateMessage) -> Result<()>;
    async fn publish_log(&self, message: &LogMessage) -> Result<()>;
    async fn publish_worker_heartbeat(&self, message: &WorkerHeartbeatMessage) -> Result<()>;
    async fn publish_job_heartbeat(&self, message: &JobHeartbeatMessage) -> Result<()>;
    async fn publish_registration(&self, message: &RegistrationMessage) -> Result<()>;
    async fn publish_dlq(&self, message: &DlqMessage) -> Result<()>;

    async fn consume_dispatch(&self, routing_pattern: &str) -> Result<DeliveryStream<DispatchMessage>>;
    async fn consume_status_updates(&self) -> Result<DeliveryStream<StatusUpdateMessage>>;
    async fn consume_logs(&self) -> Result<DeliveryStream<LogMessage>>;
    async fn consume_worker_heartbeats(&self) -> Result<DeliveryStream<WorkerHeartbeatMessage>>;
    async fn consume_job_heartbeats(&self) -> Result<DeliveryStream<JobHeartbeatMessage>>;
    async fn consume_registrations(&self) -> Result<DeliveryStream<RegistrationMessage>>;
    async fn consume_failed_jobs(&self) -> Result<DeliveryStream<DlqMessage>>;
}

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{Error, Result};

use super::topology::{BusTopology, QueueName};
use super::{
    Delivery, DeliveryStream, DispatchMessage, DlqMessage, JobHeartbeatMessage, LogMessage, MessageBus,
    RegistrationMessage, StatusUpdateMessage, WorkerHeartbeatMessage,
};

/// Connection and retry settings for the AMQP-backed bus. Mirrors the
/// topology fixed in the external-interfaces contract: durable queues,
/// a topic exchange, a dead-letter exchange, 60s broker heartbeat.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    pub url: String,
    pub connection_name: String,
    pub max_connect_retries: u32,
    pub retry_delay_ms: u64,
    pub prefetch_count: u16,
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            url: "amqp://127.0.0.1:5672/%2f".to_string(),
            connection_name: "scheduler".to_string(),
            max_connect_retries: 5,
            retry_delay_ms: 500,
            prefetch_count: 50,
        }
    }
}

/// [`MessageBus`] backed by a single AMQP connection/channel pair,
/// declaring the fixed topology from [`BusTopology`] on connect. Lapin
/// does not reconnect automatically on a dropped connection the way
/// `redis::aio::ConnectionManager` does, so publish/consume retry once
/// through [`LapinBus::reconnect`] on a connection-level error.
pub struct LapinBus {
    config: AmqpConfig,
    connection: RwLock<Connection>,
    channel: RwLock<Channel>,
}

impl LapinBus {
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let connection = Self::attempt_connect(&config).await?;
        let channel = Self::open_channel(&connection, &config).await?;
        let bus = Self {
            config,
            connection: RwLock::new(connection),
            channel: RwLock::new(channel),
        };
        bus.declare_topology().await?;
        Ok(bus)
    }

    async fn attempt_connect(config: &AmqpConfig) -> Result<Connection> {
        let props = ConnectionProperties::default().with_connection_name(config.connection_name.clone().into());
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Connection::connect(&config.url, props.clone()).await {
                Ok(connection) => return Ok(connection),
                Err(err) if attempt < config.max_connect_retries => {
                    warn!(attempt, error = %err, "bus connect failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_millis(config.retry_delay_ms)).await;
                }
                Err(err) => {
                    return Err(Error::bus(format!("failed to connect to bus after {attempt} attempts: {err}")))
                }
            }
        }
    }

    async fn open_channel(connection: &Connection, config: &AmqpConfig) -> Result<Channel> {
        let channel = connection.create_channel().await.map_err(|err| Error::bus(err.to_string()))?;
        channel
            .basic_qos(config.prefetch_count, lapin::options::BasicQosOptions::default())
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        Ok(channel)
    }

    async fn declare_topology(&self) -> Result<()> {
        let channel = self.channel.read().await;

        channel
            .exchange_declare(
                BusTopology::DLX_EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;

        channel
            .exchange_declare(
                BusTopology::EXCHANGE,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;

        for queue in [
            QueueName::ScheduledJobs,
            QueueName::WorkerLogs,
            QueueName::WorkerHeartbeat,
            QueueName::WorkerRegistration,
            QueueName::JobStatusUpdates,
        ] {
            self.declare_and_bind(&channel, queue, BusTopology::EXCHANGE).await?;
        }

        let mut dlq_args = FieldTable::default();
        dlq_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(BusTopology::DLX_EXCHANGE.into()),
        );
        channel
            .queue_declare(
                QueueName::FailedJobs.as_str(),
                QueueDeclareOptions { durable: true, ..Default::default() },
                dlq_args,
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        channel
            .queue_bind(
                QueueName::FailedJobs.as_str(),
                BusTopology::DLX_EXCHANGE,
                BusTopology::DLX_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;

        info!("bus topology declared");
        Ok(())
    }

    async fn declare_and_bind(&self, channel: &Channel, queue: QueueName, exchange: &str) -> Result<()> {
        channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        channel
            .queue_bind(
                queue.as_str(),
                exchange,
                queue.binding_key(),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        Ok(())
    }

    async fn publish(&self, routing_key: &str, payload: &impl Serialize) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let channel = self.channel.read().await;
        channel
            .basic_publish(
                BusTopology::EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        Ok(())
    }

    async fn consume<T: DeserializeOwned + Send + 'static>(&self, queue: QueueName) -> Result<DeliveryStream<T>> {
        let channel = self.channel.read().await;
        let consumer = channel
            .basic_consume(
                queue.as_str(),
                &format!("{}-{}", self.config.connection_name, queue.as_str()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;

        let stream = consumer.filter_map(|delivery| async move {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => return Some(Err(Error::bus(err.to_string()))),
            };
            let payload: T = match serde_json::from_slice(&delivery.data) {
                Ok(payload) => payload,
                Err(err) => return Some(Err(Error::from(err))),
            };
            let routing_key = delivery.routing_key.to_string();
            let acker = delivery.acker.clone();
            let wrapped = Delivery::new(payload, routing_key, move |requeue| {
                Box::pin(async move {
                    if requeue {
                        acker.ack(BasicAckOptions::default()).await.map_err(|err| Error::bus(err.to_string()))
                    } else {
                        acker
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await
                            .map_err(|err| Error::bus(err.to_string()))
                    }
                })
            });
            Some(Ok(wrapped))
        });

        Ok(Box::pin(stream))
    }
}

#[async_trait]
impl MessageBus for LapinBus {
    async fn publish_dispatch(&self, routing_key: &str, message: &DispatchMessage) -> Result<()> {
        self.publish(routing_key, message).await
    }

    async fn publish_status_update(&self, message: &StatusUpdateMessage) -> Result<()> {
        self.publish("status.update", message).await
    }

    async fn publish_log(&self, message: &LogMessage) -> Result<()> {
        self.publish("log.entry", message).await
    }

    async fn publish_worker_heartbeat(&self, message: &WorkerHeartbeatMessage) -> Result<()> {
        self.publish("heartbeat.worker", message).await
    }

    async fn publish_job_heartbeat(&self, message: &JobHeartbeatMessage) -> Result<()> {
        self.publish("heartbeat.job", message).await
    }

    async fn publish_registration(&self, message: &RegistrationMessage) -> Result<()> {
        self.publish("registration.worker", message).await
    }

    async fn publish_dlq(&self, message: &DlqMessage) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let channel = self.channel.read().await;
        channel
            .basic_publish(
                BusTopology::DLX_EXCHANGE,
                BusTopology::DLX_ROUTING_KEY,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        Ok(())
    }

    async fn consume_dispatch(&self, routing_pattern: &str) -> Result<DeliveryStream<DispatchMessage>> {
        let channel = self.channel.read().await;
        let queue_name = format!("dispatch.{}", routing_pattern.replace(['.', '*'], "_"));
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        channel
            .queue_bind(
                &queue_name,
                BusTopology::EXCHANGE,
                routing_pattern,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| Error::bus(err.to_string()))?;
        drop(channel);

        let channel = self.channel.read().await;
        let consumer = channel
            .basic_consume(&queue_name, &queue_name, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .map_err(|err| Error::bus(err.to_string()))?;

        let stream = consumer.filter_map(|delivery| async move {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => return Some(Err(Error::bus(err.to_string()))),
            };
            let payload: DispatchMessage = match serde_json::from_slice(&delivery.data) {
                Ok(payload) => payload,
                Err(err) => return Some(Err(Error::from(err))),
            };
            let routing_key = delivery.routing_key.to_string();
            let acker = delivery.acker.clone();
            let wrapped = Delivery::new(payload, routing_key, move |requeue| {
                Box::pin(async move {
                    if requeue {
                        acker.ack(BasicAckOptions::default()).await.map_err(|err| Error::bus(err.to_string()))
                    } else {
                        acker
                            .nack(BasicNackOptions { requeue: false, ..Default::default() })
                            .await
                            .map_err(|err| Error::bus(err.to_string()))
                    }
                })
            });
            Some(Ok(wrapped))
        });

        Ok(Box::pin(stream))
    }

    async fn consume_status_updates(&self) -> Result<DeliveryStream<StatusUpdateMessage>> {
        self.consume(QueueName::JobStatusUpdates).await
    }

    async fn consume_logs(&self) -> Result<DeliveryStream<LogMessage>> {
        self.consume(QueueName::WorkerLogs).await
    }

    async fn consume_worker_heartbeats(&self) -> Result<DeliveryStream<WorkerHeartbeatMessage>> {
        self.consume(QueueName::WorkerHeartbeat).await
    }

    async fn consume_job_heartbeats(&self) -> Result<DeliveryStream<JobHeartbeatMessage>> {
        self.consume(QueueName::ScheduledJobs).await
    }

    async fn consume_registrations(&self) -> Result<DeliveryStream<RegistrationMessage>> {
        self.consume(QueueName::WorkerRegistration).await
    }

    async fn consume_failed_jobs(&self) -> Result<DeliveryStream<DlqMessage>> {
        self.consume(QueueName::FailedJobs).await
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
const _: fn() = || {
    assert_send_sync::<Arc<LapinBus>>();
};

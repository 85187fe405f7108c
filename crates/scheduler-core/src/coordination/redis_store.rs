use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{Client as RedisClient, Cmd};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{Error, Result};

use super::{CoordinationConfig, CoordinationStore, SubscriptionStream};

/// Observed liveness of the pooled connection, surfaced for health checks
/// and logging; reconnects happen transparently underneath regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Connected,
    Reconnecting,
    Failed,
}

/// Redis-backed [`CoordinationStore`]. Wraps a single
/// `redis::aio::ConnectionManager`, which already multiplexes and
/// reconnects transparently; the retry loop here exists for the initial
/// connect and for the rare case a command returns a connection-level
/// error the manager hasn't recovered from yet.
pub struct RedisCoordinationStore {
    client: Arc<RedisClient>,
    manager: Arc<RwLock<ConnectionManager>>,
    config: CoordinationConfig,
    state: Arc<RwLock<ConnectionState>>,
}

impl RedisCoordinationStore {
    pub async fn connect(config: CoordinationConfig) -> Result<Self> {
        let client = RedisClient::open(config.url.as_str())
            .map_err(|err| Error::coordination(format!("invalid redis url: {err}")))?;
        let manager = Self::attempt_connect(&client, &config).await?;
        Ok(Self {
            client: Arc::new(client),
            manager: Arc::new(RwLock::new(manager)),
            config,
            state: Arc::new(RwLock::new(ConnectionState::Connected)),
        })
    }

    async fn attempt_connect(client: &RedisClient, config: &CoordinationConfig) -> Result<ConnectionManager> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match tokio::time::timeout(config.connect_timeout(), client.get_connection_manager()).await {
                Ok(Ok(manager)) => return Ok(manager),
                Ok(Err(err)) if attempt < config.max_retries => {
                    warn!(attempt, error = %err, "coordination store connect failed, retrying");
                    tokio::time::sleep(config.retry_delay()).await;
                }
                Ok(Err(err)) => {
                    return Err(Error::coordination(format!(
                        "failed to connect to coordination store after {attempt} attempts: {err}"
                    )))
                }
                Err(_) if attempt < config.max_retries => {
                    warn!(attempt, "coordination store connect timed out, retrying");
                    tokio::time::sleep(config.retry_delay()).await;
                }
                Err(_) => {
                    return Err(Error::coordination(format!(
                        "coordination store connect timed out after {attempt} attempts"
                    )))
                }
            }
        }
    }

    async fn reconnect(&self) -> Result<()> {
        *self.state.write().await = ConnectionState::Reconnecting;
        let manager = Self::attempt_connect(&self.client, &self.config).await;
        match manager {
            Ok(manager) => {
                *self.manager.write().await = manager;
                *self.state.write().await = ConnectionState::Connected;
                Ok(())
            }
            Err(err) => {
                *self.state.write().await = ConnectionState::Failed;
                Err(err)
            }
        }
    }

    async fn run(&self, cmd: Cmd) -> Result<redis::Value> {
        let mut manager = self.manager.read().await.clone();
        match cmd.query_async(&mut manager).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_connection_dropped() || err.is_io_error() => {
                debug!(error = %err, "coordination store connection dropped, reconnecting");
                self.reconnect().await?;
                let mut manager = self.manager.read().await.clone();
                cmd.query_async(&mut manager)
                    .await
                    .map_err(|err| Error::coordination(err.to_string()))
            }
            Err(err) => Err(Error::coordination(err.to_string())),
        }
    }

    fn namespaced(&self, key: &str) -> String {
        if key.starts_with(self.config.key_prefix.as_str()) {
            key.to_string()
        } else {
            format!("{}{}", self.config.key_prefix, key)
        }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        self.run(redis::cmd("ZADD").arg(self.namespaced(key)).arg(score).arg(member).to_owned())
            .await?;
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64, limit: usize) -> Result<Vec<String>> {
        let value = self
            .run(
                redis::cmd("ZRANGEBYSCORE")
                    .arg(self.namespaced(key))
                    .arg(min)
                    .arg(max)
                    .arg("LIMIT")
                    .arg(0)
                    .arg(limit as i64)
                    .to_owned(),
            )
            .await?;
        redis::FromRedisValue::from_redis_value(value).map_err(|err| Error::coordination(err.to_string()))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        self.run(redis::cmd("ZREM").arg(self.namespaced(key)).arg(member).to_owned()).await?;
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let key = self.namespaced(key);
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis() as i64);
        }
        let value = self.run(cmd.to_owned()).await?;
        Ok(!matches!(value, redis::Value::Nil))
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.run(redis::cmd("DEL").arg(self.namespaced(key)).to_owned()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.run(redis::cmd("GET").arg(self.namespaced(key)).to_owned()).await?;
        redis::FromRedisValue::from_redis_value(value).map_err(|err| Error::coordination(err.to_string()))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.run(redis::cmd("SADD").arg(self.namespaced(key)).arg(member).to_owned()).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.run(redis::cmd("SREM").arg(self.namespaced(key)).arg(member).to_owned()).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let value = self.run(redis::cmd("SMEMBERS").arg(self.namespaced(key)).to_owned()).await?;
        redis::FromRedisValue::from_redis_value(value).map_err(|err| Error::coordination(err.to_string()))
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let value = self
            .run(redis::cmd("SISMEMBER").arg(self.namespaced(key)).arg(member).to_owned())
            .await?;
        redis::FromRedisValue::from_redis_value(value).map_err(|err| Error::coordination(err.to_string()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.run(
            redis::cmd("HSET")
                .arg(self.namespaced(key))
                .arg(field)
                .arg(value)
                .to_owned(),
        )
        .await?;
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(self.namespaced(key));
        for field in fields {
            cmd.arg(*field);
        }
        let value = self.run(cmd.to_owned()).await?;
        redis::FromRedisValue::from_redis_value(value).map_err(|err| Error::coordination(err.to_string()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.run(
            redis::cmd("PEXPIRE")
                .arg(self.namespaced(key))
                .arg(ttl.as_millis() as i64)
                .to_owned(),
        )
        .await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let value = self
            .run(redis::cmd("PUBLISH").arg(self.namespaced(channel)).arg(payload).to_owned())
            .await?;
        redis::FromRedisValue::from_redis_value(value).map_err(|err| Error::coordination(err.to_string()))
    }

    async fn subscribe(&self, channel: &str) -> Result<SubscriptionStream> {
        let channel = self.namespaced(channel);
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|err| Error::coordination(err.to_string()))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|err| Error::coordination(err.to_string()))?;
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(Box::pin(stream))
    }
}

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::Result;

use super::{CoordinationStore, SubscriptionStream};

/// In-process fake for [`CoordinationStore`], required so the dispatcher,
/// worker, and zombie-detector logic can be exercised in tests without a
/// live Redis. Expiry is honoured by checking a deadline on read rather
/// than by background eviction, which is enough for the semantics this
/// trait promises (a key that "hasn't expired yet" behaves identically
/// either way).
#[derive(Default)]
pub struct InMemoryCoordinationStore {
    sorted_sets: DashMap<String, Vec<(String, f64)>>,
    sets: DashMap<String, std::collections::HashSet<String>>,
    hashes: DashMap<String, std::collections::HashMap<String, String>>,
    strings: DashMap<String, String>,
    expirations: DashMap<String, std::time::Instant>,
    channels: Mutex<std::collections::HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(&self, key: &str) -> bool {
        self.expirations
            .get(key)
            .map(|deadline| std::time::Instant::now() >= *deadline)
            .unwrap_or(false)
    }

    fn clear_all(&self, key: &str) {
        self.sorted_sets.remove(key);
        self.sets.remove(key);
        self.hashes.remove(key);
        self.strings.remove(key);
        self.expirations.remove(key);
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut entry = self.sorted_sets.entry(key.to_string()).or_default();
        if let Some(existing) = entry.iter_mut().find(|(m, _)| m == member) {
            existing.1 = score;
        } else {
            entry.push((member.to_string(), score));
        }
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64, limit: usize) -> Result<Vec<String>> {
        let mut members: Vec<(String, f64)> = self
            .sorted_sets
            .get(key)
            .map(|set| set.iter().filter(|(_, score)| *score >= min && *score <= max).cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(members.into_iter().take(limit).map(|(member, _)| member).collect())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sorted_sets.get_mut(key) {
            set.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn setnx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        if self.strings.contains_key(key) && !self.is_expired(key) {
            return Ok(false);
        }
        self.strings.insert(key.to_string(), value.to_string());
        match ttl {
            Some(ttl) => {
                self.expirations.insert(key.to_string(), std::time::Instant::now() + ttl);
            }
            None => {
                self.expirations.remove(key);
            }
        }
        Ok(true)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.clear_all(key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.is_expired(key) {
            return Ok(None);
        }
        Ok(self.strings.get(key).map(|value| value.clone()))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.sets.entry(key.to_string()).or_default().insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.sets.get(key).map(|set| set.iter().cloned().collect()).unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self.sets.get(key).map(|set| set.contains(member)).unwrap_or(false))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let hash = self.hashes.get(key);
        Ok(fields
            .iter()
            .map(|field| hash.as_ref().and_then(|h| h.get(*field)).cloned())
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.expirations.insert(key.to_string(), std::time::Instant::now() + ttl);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let channels = self.channels.lock().expect("channels mutex poisoned");
        match channels.get(channel) {
            Some(sender) => Ok(sender.send(payload.to_string()).unwrap_or(0) as i64),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<SubscriptionStream> {
        let mut channels = self.channels.lock().expect("channels mutex poisoned");
        let sender = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone();
        let receiver = sender.subscribe();
        let stream = BroadcastStream::new(receiver).filter_map(|item| async move { item.ok() });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::contract_tests;
    use std::sync::Arc;

    #[tokio::test]
    async fn satisfies_coordination_store_contract() {
        contract_tests::exercise(Arc::new(InMemoryCoordinationStore::new())).await;
    }

    #[tokio::test]
    async fn setnx_respects_ttl_expiry() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.setnx("lease", "a", Some(Duration::from_millis(20))).await.unwrap());
        assert!(!store.setnx("lease", "b", None).await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.setnx("lease", "c", None).await.unwrap());
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let store = InMemoryCoordinationStore::new();
        let mut stream = store.subscribe("cancel:abc").await.unwrap();
        store.publish("cancel:abc", "cancelled").await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("timed out waiting for message")
            .expect("stream ended early");
        assert_eq!(message, "cancelled");
    }
}

//! Fan-out for the single global cancellation channel.
//!
//! The control plane (or an operator tool) publishes one
//! [`CancellationSignal`] per cancellation request on the coordination
//! store's pub/sub channel. Every worker instance subscribes to it and
//! must pick the right in-flight job out of whatever else is running;
//! this registry keeps a `watch` sender per `correlationId` so the
//! executor racing that job can be woken directly instead of scanning.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use scheduler_core::bus::CancellationSignal;
use scheduler_core::coordination::{CoordinationStore, KeyPrefix};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
pub struct CancellationRegistry {
    waiters: DashMap<Uuid, watch::Sender<bool>>,
}

impl CancellationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register interest in cancellation for `correlation_id`. The
    /// returned receiver is handed to the executor's `select!`.
    pub fn register(&self, correlation_id: Uuid) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.waiters.insert(correlation_id, tx);
        rx
    }

    /// Remove the waiter once the job reaches a terminal state, whether
    /// or not it was ever cancelled.
    pub fn clear(&self, correlation_id: &Uuid) {
        self.waiters.remove(correlation_id);
    }

    pub fn cancel(&self, correlation_id: &Uuid) {
        if let Some(sender) = self.waiters.get(correlation_id) {
            let _ = sender.send(true);
        }
    }

    /// Subscribe to the coordination store's cancellation channel and
    /// forward every signal for the lifetime of the process.
    pub fn spawn_listener(
        self: Arc<Self>,
        coordination: Arc<dyn CoordinationStore>,
        keys: KeyPrefix,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match coordination.subscribe(&keys.cancellation_channel()).await {
                    Ok(mut stream) => {
                        while let Some(payload) = stream.next().await {
                            match serde_json::from_str::<CancellationSignal>(&payload) {
                                Ok(signal) => {
                                    debug!(correlation_id = %signal.correlation_id, "received cancellation signal");
                                    self.cancel(&signal.correlation_id);
                                }
                                Err(err) => warn!(error = %err, "ignoring malformed cancellation signal"),
                            }
                        }
                        warn!("cancellation subscription ended, resubscribing");
                    }
                    Err(err) => {
                        warn!(error = %err, "failed to subscribe to cancellation channel, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_an_unregistered_id_is_a_no_op() {
        let registry = CancellationRegistry::new();
        registry.cancel(&Uuid::new_v4());
    }

    #[tokio::test]
    async fn registered_waiter_observes_cancellation() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let mut rx = registry.register(id);
        registry.cancel(&id);
        assert!(*rx.borrow_and_update());
    }

    #[tokio::test]
    async fn clearing_drops_future_cancellations_silently() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let _rx = registry.register(id);
        registry.clear(&id);
        registry.cancel(&id);
    }
}

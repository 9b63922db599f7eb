//! In-memory bus for single-node deployments and tests
//!
//! Every [`MemoryBus`] created with [`MemoryBus::new`] owns a hub of topics.
//! Each clone is a separate client of that hub, so several coordinators in
//! one process can be wired together through clones, and disconnecting one
//! client leaves the others attached.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

use super::error::BusError;
use super::messages::BusEnvelope;
use super::BusTransport;

/// Queue of one client subscribed to a topic
#[derive(Debug)]
struct Subscriber {
    client: u64,
    sender: mpsc::UnboundedSender<String>,
}

#[derive(Debug, Default)]
struct Hub {
    /// Topic → subscriber queues carrying encoded envelopes
    topics: Mutex<HashMap<String, Vec<Subscriber>>>,
    /// Every envelope published, in order
    published: Mutex<Vec<(String, BusEnvelope)>>,
    next_client: AtomicU64,
}

/// In-process bus delivering to every subscriber, the publisher included
#[derive(Debug)]
pub struct MemoryBus {
    hub: Arc<Hub>,
    client: u64,
    disconnected: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::attach(Arc::new(Hub::default()))
    }

    fn attach(hub: Arc<Hub>) -> Self {
        let client = hub.next_client.fetch_add(1, Ordering::Relaxed);
        Self {
            hub,
            client,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Envelopes published on the hub so far, with their topic
    pub fn published(&self) -> Vec<(String, BusEnvelope)> {
        self.hub
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of live subscribers on a topic, across all clients
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.hub
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|subscriber| !subscriber.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Whether this client was disconnected
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryBus {
    /// A new client on the same hub
    fn clone(&self) -> Self {
        Self::attach(Arc::clone(&self.hub))
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    async fn publish(&self, topic: &str, envelope: BusEnvelope) -> Result<(), BusError> {
        if self.is_disconnected() {
            return Err(BusError::Disconnected);
        }

        let raw = envelope.encode()?;

        self.hub
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((topic.to_string(), envelope));

        let mut topics = self
            .hub
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|subscriber| subscriber.sender.send(raw.clone()).is_ok());
        }

        tracing::trace!(topic = %topic, client = self.client, "Published bus envelope");
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusEnvelope>, BusError> {
        if self.is_disconnected() {
            return Err(BusError::Disconnected);
        }

        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<String>();
        let (tx, rx) = mpsc::unbounded_channel();

        self.hub
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                client: self.client,
                sender: raw_tx,
            });

        let topic = topic.to_string();
        tokio::spawn(async move {
            while let Some(raw) = raw_rx.recv().await {
                match BusEnvelope::decode(&raw) {
                    Ok(envelope) => {
                        if tx.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            topic = %topic,
                            error = %e,
                            "Dropping undecodable bus envelope"
                        );
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Drop this client's queues; other clients keep their subscriptions
    async fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);

        let mut topics = self
            .hub
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for subscribers in topics.values_mut() {
            subscribers.retain(|subscriber| subscriber.client != self.client);
        }
        topics.retain(|_, subscribers| !subscribers.is_empty());

        tracing::debug!(client = self.client, "Memory bus client disconnected");
    }
}

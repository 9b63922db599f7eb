//! Broadcast Coordinator
//!
//! [`Transmit`] is the public entry point: it wraps a [`ConnectionManager`],
//! fans broadcasts out to local subscribers, relays broadcasts and
//! subscription changes over an optional [`BusTransport`], and pings every
//! connection on a fixed period.
//!
//! Every envelope published on the bus carries this instance's id. The bus
//! consumer ignores envelopes it published itself, since local delivery
//! already happened on the direct call.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::bus::{BusEnvelope, BusError, BusMessage, BusTransport};
use crate::channel::{ChannelParams, PatternError};
use crate::config::TransmitConfig;
use crate::events::{EventEmitter, EventKind, ListenerHandle, TransmitEvent};
use crate::manager::{
    ChannelAuthorizer, ConnectionManager, CreateConnectionParams, ManagerError, SubscribeParams,
    UnsubscribeParams,
};
use crate::stream::{Connection, Message};

/// Channel of the keep-alive message
pub const PING_CHANNEL: &str = "$$transmit/ping";

/// Errors raised by the coordinator
#[derive(Debug, Error)]
pub enum TransmitError {
    #[error(transparent)]
    Manager(#[from] ManagerError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Failed to subscribe to the bus: {0}")]
    Bus(#[from] BusError),
}

/// Uids excluded from a local broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptUids(HashSet<String>);

impl ExceptUids {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.0.contains(uid)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ExceptUids {
    fn from(uid: &str) -> Self {
        Self(HashSet::from([uid.to_string()]))
    }
}

impl From<String> for ExceptUids {
    fn from(uid: String) -> Self {
        Self(HashSet::from([uid]))
    }
}

impl From<Vec<String>> for ExceptUids {
    fn from(uids: Vec<String>) -> Self {
        Self(uids.into_iter().collect())
    }
}

impl From<&[&str]> for ExceptUids {
    fn from(uids: &[&str]) -> Self {
        Self(uids.iter().map(|uid| uid.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ExceptUids {
    fn from(uids: [&str; N]) -> Self {
        Self(uids.iter().map(|uid| uid.to_string()).collect())
    }
}

impl From<HashSet<String>> for ExceptUids {
    fn from(uids: HashSet<String>) -> Self {
        Self(uids)
    }
}

/// Bus handle with the channel and identity used to publish
struct BusLink {
    transport: Arc<dyn BusTransport>,
    channel: String,
    origin: Uuid,
}

impl BusLink {
    /// Publish, logging failures instead of returning them
    async fn publish(&self, message: BusMessage) {
        let envelope = BusEnvelope::new(self.origin, message);
        if let Err(e) = self.transport.publish(&self.channel, envelope).await {
            tracing::warn!(bus_channel = %self.channel, error = %e, "Failed to publish on bus");
        }
    }
}

/// SSE broadcasting coordinator
pub struct Transmit<C>
where
    C: Send + Sync + 'static,
{
    manager: Arc<ConnectionManager<C>>,
    bus: Option<BusLink>,
    instance_id: Uuid,
    /// Ping and bus consumer tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<C> Transmit<C>
where
    C: Clone + Send + Sync + 'static,
{
    /// Create a coordinator
    ///
    /// With a bus, subscribes the consumer before returning so no envelope
    /// published afterwards is missed.
    pub async fn new(
        config: &TransmitConfig,
        bus: Option<Arc<dyn BusTransport>>,
    ) -> Result<Self, TransmitError> {
        let manager = Arc::new(ConnectionManager::new());
        let instance_id = Uuid::new_v4();
        let mut tasks = Vec::new();

        let bus = match bus {
            Some(transport) => {
                let channel = config.transport.channel().to_string();
                let receiver = transport.subscribe(&channel).await?;
                tasks.push(tokio::spawn(consume_bus(
                    Arc::clone(&manager),
                    instance_id,
                    receiver,
                )));

                tracing::info!(
                    bus_channel = %channel,
                    instance = %instance_id,
                    "Bus consumer started"
                );
                Some(BusLink {
                    transport,
                    channel,
                    origin: instance_id,
                })
            }
            None => None,
        };

        if let Some(period) = config.ping_interval.period() {
            tasks.push(tokio::spawn(ping_connections(Arc::clone(&manager), period)));
            tracing::debug!(period_ms = period.as_millis() as u64, "Ping task started");
        }

        Ok(Self {
            manager,
            bus,
            instance_id,
            tasks: Mutex::new(tasks),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn manager(&self) -> &Arc<ConnectionManager<C>> {
        &self.manager
    }

    /// Id tagged on every envelope this instance publishes
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn events(&self) -> &EventEmitter<C> {
        self.manager.events()
    }

    /// Register a lifecycle listener
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(TransmitEvent<C>) + Send + 'static,
    {
        self.manager.events().on(kind, listener)
    }

    /// Open a connection; see [`ConnectionManager::create_connection`]
    pub async fn create_connection(
        &self,
        params: CreateConnectionParams<C>,
    ) -> Result<Arc<Connection>, TransmitError> {
        Ok(self.manager.create_connection(params).await?)
    }

    /// Secure a channel pattern with a synchronous callback
    pub async fn authorize<F>(&self, pattern: &str, callback: F) -> Result<(), TransmitError>
    where
        F: Fn(&C, &ChannelParams) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        Ok(self.manager.authorize(pattern, callback).await?)
    }

    /// Secure a channel pattern with a [`ChannelAuthorizer`]
    pub async fn authorize_with<A>(&self, pattern: &str, authorizer: A) -> Result<(), TransmitError>
    where
        A: ChannelAuthorizer<C> + 'static,
    {
        Ok(self.manager.authorize_with(pattern, authorizer).await?)
    }

    /// Subscribe and relay the subscription to peers when allowed
    pub async fn subscribe(&self, params: SubscribeParams<C>) -> bool {
        let uid = params.uid.clone();
        let channel = params.channel.clone();

        let allowed = self.manager.subscribe(params).await;
        if allowed {
            if let Some(bus) = &self.bus {
                bus.publish(BusMessage::Subscribe { channel, uid }).await;
            }
        }

        allowed
    }

    /// Unsubscribe and relay the change to peers
    pub async fn unsubscribe(&self, params: UnsubscribeParams<C>) -> bool {
        let uid = params.uid.clone();
        let channel = params.channel.clone();

        let done = self.manager.unsubscribe(params).await;
        if let Some(bus) = &self.bus {
            bus.publish(BusMessage::Unsubscribe { channel, uid }).await;
        }

        done
    }

    /// Deliver to local subscribers of `channel`, skipping `except`
    ///
    /// Returns the number of successful writes.
    pub async fn broadcast_locally(
        &self,
        channel: &str,
        payload: &Value,
        except: &ExceptUids,
    ) -> usize {
        deliver(&self.manager, channel, payload, except).await
    }

    /// Deliver to local subscribers except the given uids; never touches the bus
    pub async fn broadcast_except(
        &self,
        channel: &str,
        payload: Value,
        except: impl Into<ExceptUids>,
    ) -> usize {
        deliver(&self.manager, channel, &payload, &except.into()).await
    }

    /// Deliver to every subscriber of `channel` across all instances
    ///
    /// A `null` payload is sent as `{}`. Returns the number of local
    /// deliveries.
    pub async fn broadcast(&self, channel: &str, payload: Value) -> usize {
        let payload = if payload.is_null() { json!({}) } else { payload };

        if let Some(bus) = &self.bus {
            bus.publish(BusMessage::Broadcast {
                channel: channel.to_string(),
                payload: payload.clone(),
            })
            .await;
        }

        let delivered = deliver(&self.manager, channel, &payload, &ExceptUids::none()).await;

        self.manager.events().emit(TransmitEvent::Broadcast {
            channel: channel.to_string(),
            payload,
        });

        delivered
    }

    /// Stop the ping and bus consumer tasks, end every live stream and
    /// disconnect the bus
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.abort_tasks();
        self.manager.close_all().await;

        if let Some(bus) = &self.bus {
            bus.transport.disconnect().await;
        }

        tracing::info!(instance = %self.instance_id, "Transmit shut down");
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl<C> Drop for Transmit<C>
where
    C: Send + Sync + 'static,
{
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

/// Write a message to every local subscriber not in `except`
///
/// A failed write is logged and the fanout continues.
async fn deliver<C>(
    manager: &ConnectionManager<C>,
    channel: &str,
    payload: &Value,
    except: &ExceptUids,
) -> usize
where
    C: Clone + Send + Sync + 'static,
{
    let subscribers = manager.find_by_channel(channel).await;
    if subscribers.is_empty() {
        return 0;
    }

    let message = Message::new(channel, payload.clone());
    let mut delivered = 0;

    for connection in subscribers {
        if except.contains(connection.uid()) {
            continue;
        }

        match connection.write(&message) {
            Ok(()) => delivered += 1,
            Err(e) => {
                tracing::debug!(
                    uid = %connection.uid(),
                    channel = %channel,
                    error = %e,
                    "Failed to write message"
                );
            }
        }
    }

    tracing::trace!(channel = %channel, subscribers = delivered, "Broadcast message");
    delivered
}

/// Apply envelopes published by other instances
async fn consume_bus<C>(
    manager: Arc<ConnectionManager<C>>,
    instance_id: Uuid,
    mut receiver: mpsc::UnboundedReceiver<BusEnvelope>,
) where
    C: Clone + Send + Sync + 'static,
{
    while let Some(envelope) = receiver.recv().await {
        if envelope.origin == instance_id {
            continue;
        }

        match envelope.message {
            BusMessage::Broadcast { channel, payload } => {
                deliver(&manager, &channel, &payload, &ExceptUids::none()).await;
            }
            BusMessage::Subscribe { channel, uid } => {
                manager.mirror_subscribe(&uid, &channel).await;
            }
            BusMessage::Unsubscribe { channel, uid } => {
                manager.mirror_unsubscribe(&uid, &channel).await;
            }
        }
    }

    tracing::debug!(instance = %instance_id, "Bus consumer stopped");
}

/// Write the keep-alive message to every connection each period
async fn ping_connections<C>(manager: Arc<ConnectionManager<C>>, period: Duration)
where
    C: Clone + Send + Sync + 'static,
{
    let Some(start) = tokio::time::Instant::now().checked_add(period) else {
        tracing::warn!(
            period_ms = period.as_millis() as u64,
            "Ping period too long, pinging disabled"
        );
        return;
    };
    let mut interval = tokio::time::interval_at(start, period);
    let ping = Message::new(PING_CHANNEL, json!({}));

    loop {
        interval.tick().await;

        for connection in manager.connections().await {
            if let Err(e) = connection.write(&ping) {
                tracing::debug!(uid = %connection.uid(), error = %e, "Failed to write ping");
            }
        }
    }
}

//! Connection Manager
//!
//! Owns the subscription registry and drives the connection lifecycle:
//! registration, authorization-checked subscriptions, and cleanup when a
//! transport closes.

use axum::http::HeaderMap;
use futures_util::FutureExt;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::RwLock;

use super::authorizer::{ChannelAuthorizer, FnAuthorizer};
use crate::channel::{ChannelParams, PatternError};
use crate::events::{EventEmitter, TransmitEvent};
use crate::registry::{RegistryError, SubscriptionRegistry};
use crate::stream::{Connection, Transport};

/// Errors raised by the connection manager
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Parameters for opening a connection
pub struct CreateConnectionParams<C> {
    /// Caller-supplied identity, unique among live connections
    pub uid: String,
    /// Write side of the client transport
    pub transport: Box<dyn Transport>,
    /// Caller context, echoed in lifecycle events
    pub context: C,
    /// Headers merged into the event-stream response headers
    pub forwarded_headers: HeaderMap,
}

impl<C> CreateConnectionParams<C> {
    pub fn new(uid: impl Into<String>, transport: Box<dyn Transport>, context: C) -> Self {
        Self {
            uid: uid.into(),
            transport,
            context,
            forwarded_headers: HeaderMap::new(),
        }
    }

    pub fn forward_headers(mut self, headers: HeaderMap) -> Self {
        self.forwarded_headers = headers;
        self
    }
}

/// Parameters for a subscribe request
#[derive(Debug, Clone)]
pub struct SubscribeParams<C> {
    pub uid: String,
    pub channel: String,
    pub context: C,
    /// Bypass the authorization check
    pub skip_authorization: bool,
}

impl<C> SubscribeParams<C> {
    pub fn new(uid: impl Into<String>, channel: impl Into<String>, context: C) -> Self {
        Self {
            uid: uid.into(),
            channel: channel.into(),
            context,
            skip_authorization: false,
        }
    }

    pub fn skip_authorization(mut self) -> Self {
        self.skip_authorization = true;
        self
    }
}

/// Parameters for an unsubscribe request
#[derive(Debug, Clone)]
pub struct UnsubscribeParams<C> {
    pub uid: String,
    pub channel: String,
    pub context: C,
}

impl<C> UnsubscribeParams<C> {
    pub fn new(uid: impl Into<String>, channel: impl Into<String>, context: C) -> Self {
        Self {
            uid: uid.into(),
            channel: channel.into(),
            context,
        }
    }
}

/// Point-in-time registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub connections: usize,
    pub channels: usize,
    pub secured_patterns: usize,
}

type PairKey = (String, String);
type PairLocks = HashMap<PairKey, Arc<tokio::sync::Mutex<()>>>;

/// Claim on the subscribe lock of one (uid, channel) pair
///
/// Dropping the lease removes the map entry once no other caller holds or
/// waits on the lock, including when the subscribe future is cancelled.
struct PairLease<'a> {
    pending: &'a Mutex<PairLocks>,
    key: PairKey,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> PairLease<'a> {
    fn acquire(pending: &'a Mutex<PairLocks>, key: PairKey) -> Self {
        let lock = {
            let mut locks = pending.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        Self { pending, key, lock }
    }
}

impl Drop for PairLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held here: nobody else is waiting
        let idle = Arc::strong_count(&self.lock) <= 2;
        let current = locks
            .get(&self.key)
            .is_some_and(|lock| Arc::ptr_eq(lock, &self.lock));
        if idle && current {
            locks.remove(&self.key);
        }
    }
}

/// Orchestrates connections and their subscriptions
pub struct ConnectionManager<C>
where
    C: Send + Sync + 'static,
{
    /// Both registry indices, behind one lock
    registry: Arc<RwLock<SubscriptionRegistry>>,
    /// Secured pattern string → authorizer
    authorizers: RwLock<HashMap<String, Arc<dyn ChannelAuthorizer<C>>>>,
    /// Serializes subscribe calls for the same uid and channel
    pending: Mutex<PairLocks>,
    /// Lifecycle events
    events: EventEmitter<C>,
}

impl<C> ConnectionManager<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_events(EventEmitter::default())
    }

    /// Create a manager that publishes lifecycle events on `events`
    pub fn with_events(events: EventEmitter<C>) -> Self {
        Self {
            registry: Arc::new(RwLock::new(SubscriptionRegistry::new())),
            authorizers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// The emitter lifecycle events are published on
    pub fn events(&self) -> &EventEmitter<C> {
        &self.events
    }

    /// Register a new connection
    ///
    /// Attaches the transport (headers and priming frame), emits `connect`,
    /// and watches the transport: once it closes the connection is
    /// unregistered and `disconnect` is emitted.
    pub async fn create_connection(
        &self,
        params: CreateConnectionParams<C>,
    ) -> Result<Arc<Connection>, ManagerError> {
        let CreateConnectionParams {
            uid,
            transport,
            context,
            forwarded_headers,
        } = params;

        let connection = Arc::new(Connection::new(uid.clone(), transport));

        {
            let mut registry = self.registry.write().await;
            registry.register(Arc::clone(&connection))?;

            // Attach before releasing the lock so the priming frame precedes
            // any message
            if let Err(e) = connection.attach(&forwarded_headers) {
                tracing::debug!(uid = %uid, error = %e, "Failed to attach stream");
            }
        }

        tracing::info!(uid = %uid, "Stream connected");
        self.events.emit(TransmitEvent::Connect {
            uid: uid.clone(),
            context: context.clone(),
        });

        let registry = Arc::clone(&self.registry);
        let events = self.events.clone();
        let watched = Arc::clone(&connection);

        tokio::spawn(async move {
            watched.closed().await;
            registry.write().await.unregister(&watched);

            tracing::info!(uid = %uid, "Stream disconnected");
            events.emit(TransmitEvent::Disconnect { uid, context });
        });

        Ok(connection)
    }

    /// Subscribe a connection to a channel
    ///
    /// Returns false when the channel is secured and the authorizer denies
    /// access or fails. The registry is only touched when the uid is live
    /// on this instance; a uid owned by a peer still gets `true` so the
    /// caller can relay the subscription.
    pub async fn subscribe(&self, params: SubscribeParams<C>) -> bool {
        let SubscribeParams {
            uid,
            channel,
            context,
            skip_authorization,
        } = params;

        let lease = PairLease::acquire(&self.pending, (uid.clone(), channel.clone()));
        let _guard = lease.lock.lock().await;

        let allowed = skip_authorization || self.verify_access(&channel, &context).await;

        if allowed {
            let local = self.registry.write().await.subscribe(&uid, &channel);
            tracing::debug!(uid = %uid, channel = %channel, local = local, "Subscribed");

            self.events.emit(TransmitEvent::Subscribe {
                uid,
                channel,
                context,
            });
        } else {
            tracing::debug!(uid = %uid, channel = %channel, "Subscription denied");
        }

        allowed
    }

    /// Unsubscribe a connection from a channel
    ///
    /// No authorization check; always succeeds, even when the subscription
    /// did not exist.
    pub async fn unsubscribe(&self, params: UnsubscribeParams<C>) -> bool {
        let UnsubscribeParams {
            uid,
            channel,
            context,
        } = params;

        let local = self.registry.write().await.unsubscribe(&uid, &channel);
        tracing::debug!(uid = %uid, channel = %channel, local = local, "Unsubscribed");

        self.events.emit(TransmitEvent::Unsubscribe {
            uid,
            channel,
            context,
        });

        true
    }

    /// Apply a subscription replicated from a peer instance
    ///
    /// Skips authorization and emits no event.
    pub async fn mirror_subscribe(&self, uid: &str, channel: &str) -> bool {
        self.registry.write().await.subscribe(uid, channel)
    }

    /// Apply an unsubscription replicated from a peer instance
    pub async fn mirror_unsubscribe(&self, uid: &str, channel: &str) -> bool {
        self.registry.write().await.unsubscribe(uid, channel)
    }

    /// Secure a channel pattern with a synchronous callback
    ///
    /// Securing the same pattern twice replaces its callback but keeps both
    /// pattern entries.
    pub async fn authorize<F>(&self, pattern: &str, callback: F) -> Result<(), PatternError>
    where
        F: Fn(&C, &ChannelParams) -> anyhow::Result<bool> + Send + Sync + 'static,
    {
        self.authorize_with(pattern, FnAuthorizer(callback)).await
    }

    /// Secure a channel pattern with an [`ChannelAuthorizer`] implementation
    pub async fn authorize_with<A>(&self, pattern: &str, authorizer: A) -> Result<(), PatternError>
    where
        A: ChannelAuthorizer<C> + 'static,
    {
        let mut registry = self.registry.write().await;
        registry.secure(pattern)?;

        self.authorizers
            .write()
            .await
            .insert(pattern.to_string(), Arc::new(authorizer));

        tracing::debug!(pattern = %pattern, "Channel secured");
        Ok(())
    }

    /// Whether `context` may subscribe to `channel`
    ///
    /// Channels matching no secured pattern are public.
    pub async fn verify_access(&self, channel: &str, context: &C) -> bool {
        let Some(secured) = self.registry.read().await.match_secured(channel) else {
            return true;
        };

        let authorizer = self.authorizers.read().await.get(&secured.channel).cloned();
        let Some(authorizer) = authorizer else {
            tracing::warn!(pattern = %secured.channel, "Secured channel has no authorizer");
            return false;
        };

        let outcome = AssertUnwindSafe(authorizer.authorize(context, &secured.params))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(allowed)) => allowed,
            Ok(Err(e)) => {
                tracing::warn!(
                    channel = %channel,
                    pattern = %secured.channel,
                    error = %e,
                    "Authorization callback failed"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    channel = %channel,
                    pattern = %secured.channel,
                    "Authorization callback panicked"
                );
                false
            }
        }
    }

    /// Connections subscribed to `channel`
    pub async fn find_by_channel(&self, channel: &str) -> Vec<Arc<Connection>> {
        self.registry.read().await.find_by_channel(channel)
    }

    /// Every live connection with a snapshot of its channels
    pub async fn all_subscribers(&self) -> Vec<(Arc<Connection>, HashSet<String>)> {
        self.registry
            .read()
            .await
            .all_subscriptions()
            .map(|(connection, channels)| (Arc::clone(connection), channels.clone()))
            .collect()
    }

    /// Every live connection
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.registry
            .read()
            .await
            .all_subscriptions()
            .map(|(connection, _)| Arc::clone(connection))
            .collect()
    }

    /// Channels a connection is subscribed to
    pub async fn channels_of(&self, uid: &str) -> Option<HashSet<String>> {
        self.registry.read().await.channels_of(uid).cloned()
    }

    /// Whether a connection with this uid is live on this instance
    pub async fn is_connected(&self, uid: &str) -> bool {
        self.registry.read().await.contains(uid)
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.stream_count()
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.registry.read().await.subscriber_count(channel)
    }

    pub async fn stats(&self) -> ManagerStats {
        let registry = self.registry.read().await;
        ManagerStats {
            connections: registry.stream_count(),
            channels: registry.channel_count(),
            secured_patterns: registry.secured_count(),
        }
    }

    /// End every live stream from the server side
    ///
    /// Each connection is unregistered by its close observer once the
    /// client side of the transport is released. Returns the number of
    /// streams closed.
    pub async fn close_all(&self) -> usize {
        let connections = self.connections().await;
        for connection in &connections {
            connection.close();
        }

        tracing::info!(streams = connections.len(), "Closed all streams");
        connections.len()
    }
}

impl<C> Default for ConnectionManager<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::stream::{ChannelTransport, TransportReceiver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    struct Ctx {
        user: String,
    }

    fn ctx() -> Ctx {
        Ctx {
            user: "romain".to_string(),
        }
    }

    async fn connect(manager: &ConnectionManager<Ctx>) -> (Arc<Connection>, TransportReceiver) {
        let (transport, rx) = ChannelTransport::new();
        let connection = manager
            .create_connection(CreateConnectionParams::new(
                Uuid::new_v4().to_string(),
                Box::new(transport),
                ctx(),
            ))
            .await
            .unwrap();
        (connection, rx)
    }

    async fn wait_for_disconnect(manager: &ConnectionManager<Ctx>, uid: &str) {
        for _ in 0..100 {
            if !manager.is_connected(uid).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection {} was not removed", uid);
    }

    #[tokio::test]
    async fn test_create_connection_emits_connect() {
        let manager = ConnectionManager::new();
        let mut events = manager.events().subscribe();

        let (connection, mut rx) = connect(&manager).await;

        assert_eq!(manager.connection_count().await, 1);
        assert_eq!(rx.drain(), ":ok\n\n");

        let event = events.try_recv().unwrap();
        assert_eq!(
            event,
            TransmitEvent::Connect {
                uid: connection.uid().to_string(),
                context: ctx()
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_uid_rejected() {
        let manager = ConnectionManager::new();
        let (connection, _rx) = connect(&manager).await;

        let (transport, mut rx) = ChannelTransport::new();
        let result = manager
            .create_connection(CreateConnectionParams::new(
                connection.uid(),
                Box::new(transport),
                ctx(),
            ))
            .await;

        assert!(matches!(
            result,
            Err(ManagerError::Registry(RegistryError::DuplicateUid(_)))
        ));
        assert_eq!(manager.connection_count().await, 1);
        // The rejected transport is never attached
        assert_eq!(rx.drain(), "");
    }

    #[tokio::test]
    async fn test_closed_transport_removes_connection() {
        let manager = ConnectionManager::new();
        let mut events = manager.events().subscribe();
        let (connection, rx) = connect(&manager).await;
        manager
            .subscribe(SubscribeParams::new(connection.uid(), "foo", ctx()))
            .await;

        drop(rx);
        wait_for_disconnect(&manager, connection.uid()).await;

        assert!(manager.find_by_channel("foo").await.is_empty());

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
                .await
                .unwrap()
                .unwrap();
            kinds.push(event.kind());
        }
        assert_eq!(
            kinds,
            vec![EventKind::Connect, EventKind::Subscribe, EventKind::Disconnect]
        );
    }

    #[tokio::test]
    async fn test_authorize_channel() {
        let manager = ConnectionManager::new();

        manager.authorize("foo", |_, _| Ok(true)).await.unwrap();
        manager.authorize("bar", |_, _| Ok(false)).await.unwrap();

        assert!(manager.verify_access("foo", &ctx()).await);
        assert!(!manager.verify_access("bar", &ctx()).await);
    }

    #[tokio::test]
    async fn test_unsecured_channel_is_public() {
        let manager = ConnectionManager::new();

        assert!(manager.verify_access("foo", &ctx()).await);
    }

    #[tokio::test]
    async fn test_authorize_invalid_pattern() {
        let manager: ConnectionManager<Ctx> = ConnectionManager::new();

        let result = manager.authorize("a//b", |_, _| Ok(true)).await;
        assert!(result.is_err());
        assert_eq!(manager.stats().await.secured_patterns, 0);
    }

    #[tokio::test]
    async fn test_failing_callback_denies() {
        let manager = ConnectionManager::new();

        manager
            .authorize("foo", |_, _| Err(anyhow::anyhow!("database unavailable")))
            .await
            .unwrap();

        assert!(!manager.verify_access("foo", &ctx()).await);
    }

    #[tokio::test]
    async fn test_panicking_callback_denies() {
        let manager = ConnectionManager::new();

        manager
            .authorize("foo", |_, _| panic!("callback exploded"))
            .await
            .unwrap();

        assert!(!manager.verify_access("foo", &ctx()).await);
    }

    #[tokio::test]
    async fn test_callback_receives_context() {
        let manager = ConnectionManager::new();

        manager
            .authorize("foo", |context: &Ctx, _| Ok(context.user == "romain"))
            .await
            .unwrap();

        assert!(manager.verify_access("foo", &ctx()).await);
        assert!(
            !manager
                .verify_access(
                    "foo",
                    &Ctx {
                        user: "other".to_string()
                    }
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_callback_receives_params() {
        let manager = ConnectionManager::new();

        manager
            .authorize("users/:id", |_, params| Ok(params["id"] == "1"))
            .await
            .unwrap();

        assert!(manager.verify_access("users/1", &ctx()).await);
        assert!(!manager.verify_access("users/2", &ctx()).await);
    }

    struct SlowAuthorizer;

    #[async_trait]
    impl ChannelAuthorizer<Ctx> for SlowAuthorizer {
        async fn authorize(&self, context: &Ctx, params: &ChannelParams) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(context.user == params["user"])
        }
    }

    #[tokio::test]
    async fn test_async_authorizer() {
        let manager = ConnectionManager::new();
        manager
            .authorize_with("inbox/:user", SlowAuthorizer)
            .await
            .unwrap();

        assert!(manager.verify_access("inbox/romain", &ctx()).await);
        assert!(!manager.verify_access("inbox/julien", &ctx()).await);
    }

    #[tokio::test]
    async fn test_reauthorize_replaces_callback_and_accumulates_patterns() {
        let manager = ConnectionManager::new();

        manager.authorize("foo", |_, _| Ok(false)).await.unwrap();
        manager.authorize("foo", |_, _| Ok(true)).await.unwrap();

        assert!(manager.verify_access("foo", &ctx()).await);
        assert_eq!(manager.stats().await.secured_patterns, 2);
    }

    #[tokio::test]
    async fn test_subscribe() {
        let manager = ConnectionManager::new();
        let (connection, _rx) = connect(&manager).await;

        assert!(
            manager
                .subscribe(SubscribeParams::new(connection.uid(), "foo", ctx()))
                .await
        );
        assert_eq!(manager.find_by_channel("foo").await.len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_uid_still_authorized() {
        let manager = ConnectionManager::new();

        assert!(
            manager
                .subscribe(SubscribeParams::new("remote-uid", "foo", ctx()))
                .await
        );
        assert!(manager.find_by_channel("foo").await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_denied() {
        let manager = ConnectionManager::new();
        let mut events = manager.events().subscribe();
        let (connection, _rx) = connect(&manager).await;
        manager.authorize("foo", |_, _| Ok(false)).await.unwrap();

        assert!(
            !manager
                .subscribe(SubscribeParams::new(connection.uid(), "foo", ctx()))
                .await
        );
        assert!(manager.find_by_channel("foo").await.is_empty());
        assert_eq!(events.try_recv().unwrap().kind(), EventKind::Connect);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_skip_authorization() {
        let manager = ConnectionManager::new();
        let (connection, _rx) = connect(&manager).await;
        manager.authorize("foo", |_, _| Ok(false)).await.unwrap();

        assert!(
            manager
                .subscribe(
                    SubscribeParams::new(connection.uid(), "foo", ctx()).skip_authorization()
                )
                .await
        );
        assert_eq!(manager.subscriber_count("foo").await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_emits_event() {
        let manager = ConnectionManager::new();
        let mut events = manager.events().subscribe();

        manager
            .subscribe(SubscribeParams::new("uid-1", "foo", ctx()))
            .await;

        assert_eq!(
            events.try_recv().unwrap(),
            TransmitEvent::Subscribe {
                uid: "uid-1".to_string(),
                channel: "foo".to_string(),
                context: ctx()
            }
        );
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let manager = ConnectionManager::new();
        let (connection, _rx) = connect(&manager).await;
        manager
            .subscribe(SubscribeParams::new(connection.uid(), "foo", ctx()))
            .await;

        assert!(
            manager
                .unsubscribe(UnsubscribeParams::new(connection.uid(), "foo", ctx()))
                .await
        );
        assert!(manager.find_by_channel("foo").await.is_empty());

        // Unsubscribing again, or an unknown uid, still reports success
        assert!(
            manager
                .unsubscribe(UnsubscribeParams::new(connection.uid(), "foo", ctx()))
                .await
        );
        assert!(
            manager
                .unsubscribe(UnsubscribeParams::new("unknown", "foo", ctx()))
                .await
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_emits_event() {
        let manager = ConnectionManager::new();
        let mut events = manager.events().subscribe();

        manager
            .unsubscribe(UnsubscribeParams::new("uid-1", "foo", ctx()))
            .await;

        assert_eq!(events.try_recv().unwrap().kind(), EventKind::Unsubscribe);
    }

    #[tokio::test]
    async fn test_mirror_operations_skip_auth_and_events() {
        let manager = ConnectionManager::new();
        let (connection, _rx) = connect(&manager).await;
        manager.authorize("foo", |_, _| Ok(false)).await.unwrap();
        let mut events = manager.events().subscribe();

        assert!(manager.mirror_subscribe(connection.uid(), "foo").await);
        assert_eq!(manager.subscriber_count("foo").await, 1);
        assert!(manager.mirror_unsubscribe(connection.uid(), "foo").await);
        assert_eq!(manager.subscriber_count("foo").await, 0);
        assert!(!manager.mirror_subscribe("unknown", "foo").await);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_all_subscribers() {
        let manager = ConnectionManager::new();
        let (first, _rx1) = connect(&manager).await;
        let (second, _rx2) = connect(&manager).await;

        manager
            .subscribe(SubscribeParams::new(first.uid(), "foo", ctx()))
            .await;
        manager
            .subscribe(SubscribeParams::new(second.uid(), "bar", ctx()))
            .await;

        let subscribers = manager.all_subscribers().await;
        assert_eq!(subscribers.len(), 2);
        assert_eq!(manager.connections().await.len(), 2);
        assert_eq!(
            manager.channels_of(first.uid()).await,
            Some(HashSet::from(["foo".to_string()]))
        );
    }

    #[tokio::test]
    async fn test_find_by_channel() {
        let manager = ConnectionManager::new();
        let (first, _rx1) = connect(&manager).await;
        let (second, _rx2) = connect(&manager).await;

        manager
            .subscribe(SubscribeParams::new(first.uid(), "foo", ctx()))
            .await;
        manager
            .subscribe(SubscribeParams::new(second.uid(), "foo", ctx()))
            .await;

        assert_eq!(manager.find_by_channel("foo").await.len(), 2);
        let stats = manager.stats().await;
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.channels, 1);
    }

    struct CountingAuthorizer {
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ChannelAuthorizer<Ctx> for CountingAuthorizer {
        async fn authorize(&self, _: &Ctx, _: &ChannelParams) -> anyhow::Result<bool> {
            let concurrent = self.in_flight.fetch_add(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(concurrent == 0)
        }
    }

    #[tokio::test]
    async fn test_concurrent_subscribes_for_same_pair_are_serialized() {
        let manager = Arc::new(ConnectionManager::new());
        let (connection, _rx) = connect(&manager).await;
        let calls = Arc::new(AtomicUsize::new(0));
        manager
            .authorize_with(
                "foo",
                CountingAuthorizer {
                    calls: Arc::clone(&calls),
                    in_flight: Arc::new(AtomicUsize::new(0)),
                },
            )
            .await
            .unwrap();

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let uid = connection.uid().to_string();
                tokio::spawn(async move {
                    manager
                        .subscribe(SubscribeParams::new(uid, "foo", ctx()))
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.subscriber_count("foo").await, 1);
        assert!(manager.pending.lock().unwrap().is_empty());
    }

    struct StalledAuthorizer;

    #[async_trait]
    impl ChannelAuthorizer<Ctx> for StalledAuthorizer {
        async fn authorize(&self, _: &Ctx, _: &ChannelParams) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_cancelled_subscribes_release_pair_locks() {
        let manager = Arc::new(ConnectionManager::new());
        manager
            .authorize_with("secret/:id", StalledAuthorizer)
            .await
            .unwrap();

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    manager
                        .subscribe(SubscribeParams::new(
                            format!("uid-{}", i),
                            format!("secret/{}", i),
                            ctx(),
                        ))
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!manager.pending.lock().unwrap().is_empty());

        for task in tasks {
            task.abort();
            assert!(task.await.unwrap_err().is_cancelled());
        }

        assert!(manager.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_keeps_lock_for_holder() {
        let manager = Arc::new(ConnectionManager::new());
        manager
            .authorize_with(
                "foo",
                CountingAuthorizer {
                    calls: Arc::new(AtomicUsize::new(0)),
                    in_flight: Arc::new(AtomicUsize::new(0)),
                },
            )
            .await
            .unwrap();

        let spawn_subscribe = || {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .subscribe(SubscribeParams::new("uid-1", "foo", ctx()))
                    .await
            })
        };
        let holder = spawn_subscribe();
        let waiter = spawn_subscribe();

        tokio::time::sleep(Duration::from_millis(2)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(manager.pending.lock().unwrap().len(), 1);

        assert!(holder.await.unwrap());
        assert!(manager.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let manager = ConnectionManager::new();
        let (first, mut rx1) = connect(&manager).await;
        let (second, mut rx2) = connect(&manager).await;
        rx1.drain();
        rx2.drain();

        assert_eq!(manager.close_all().await, 2);

        assert_eq!(rx1.recv().await, None);
        assert_eq!(rx2.recv().await, None);

        drop(rx1);
        drop(rx2);
        wait_for_disconnect(&manager, first.uid()).await;
        wait_for_disconnect(&manager, second.uid()).await;
        assert_eq!(manager.connection_count().await, 0);
    }
}

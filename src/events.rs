//! Lifecycle Events
//!
//! Connection lifecycle changes and broadcasts are published as
//! [`TransmitEvent`]s on a tokio broadcast channel. Consumers either hold a
//! receiver from [`EventEmitter::subscribe`] or register a listener for one
//! [`EventKind`] with [`EventEmitter::on`].

use serde_json::Value;
use std::fmt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A lifecycle event, carrying the caller context where one exists
#[derive(Debug, Clone, PartialEq)]
pub enum TransmitEvent<C> {
    Connect {
        uid: String,
        context: C,
    },
    Disconnect {
        uid: String,
        context: C,
    },
    Subscribe {
        uid: String,
        channel: String,
        context: C,
    },
    Unsubscribe {
        uid: String,
        channel: String,
        context: C,
    },
    Broadcast {
        channel: String,
        payload: Value,
    },
}

/// Discriminant of a [`TransmitEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Subscribe,
    Unsubscribe,
    Broadcast,
}

impl<C> TransmitEvent<C> {
    pub fn kind(&self) -> EventKind {
        match self {
            TransmitEvent::Connect { .. } => EventKind::Connect,
            TransmitEvent::Disconnect { .. } => EventKind::Disconnect,
            TransmitEvent::Subscribe { .. } => EventKind::Subscribe,
            TransmitEvent::Unsubscribe { .. } => EventKind::Unsubscribe,
            TransmitEvent::Broadcast { .. } => EventKind::Broadcast,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// Fan-out point for lifecycle events
pub struct EventEmitter<C> {
    sender: broadcast::Sender<TransmitEvent<C>>,
}

impl<C> Clone for EventEmitter<C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<C> EventEmitter<C>
where
    C: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event to every receiver
    ///
    /// Returns the number of receivers; having none is not an error.
    pub fn emit(&self, event: TransmitEvent<C>) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// A receiver for every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TransmitEvent<C>> {
        self.sender.subscribe()
    }

    /// Number of live receivers, listeners included
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `listener` for every event of the given kind
    ///
    /// The listener runs on a spawned task until its [`ListenerHandle`] is
    /// dropped, [`ListenerHandle::off`] is called, or the emitter is dropped.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerHandle
    where
        F: Fn(TransmitEvent<C>) + Send + 'static,
    {
        let mut receiver = self.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) if event.kind() == kind => listener(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            event = %kind,
                            skipped = skipped,
                            "Event listener lagged, events dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        ListenerHandle { kind, task }
    }
}

impl<C> Default for EventEmitter<C>
where
    C: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Handle to a listener registered with [`EventEmitter::on`]
///
/// Dropping the handle stops the listener.
#[must_use = "dropping the handle stops the listener"]
#[derive(Debug)]
pub struct ListenerHandle {
    kind: EventKind,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// The event kind this listener receives
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Stop the listener
    pub fn off(self) {
        drop(self);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

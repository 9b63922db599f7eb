//! Cross-instance Bus
//!
//! Replicates broadcasts and subscription changes between server instances.
//! A [`BusTransport`] carries [`BusEnvelope`]s on a named channel; the
//! coordinator subscribes one consumer to it and tags everything it
//! publishes with its own instance id.

mod error;
mod memory;
mod messages;

pub use error::BusError;
pub use memory::MemoryBus;
pub use messages::{BusEnvelope, BusMessage};

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Default bus channel shared by all instances
pub const DEFAULT_BUS_CHANNEL: &str = "transmit::broadcast";

/// Publish/subscribe transport between instances
///
/// `subscribe` must yield every envelope published on the channel by any
/// instance, the subscriber's own included. Retry policy belongs to the
/// implementation.
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn publish(&self, channel: &str, envelope: BusEnvelope) -> Result<(), BusError>;

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusEnvelope>, BusError>;

    /// Release the connection; further calls may fail
    async fn disconnect(&self);
}

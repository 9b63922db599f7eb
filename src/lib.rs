//! # Transmit
//!
//! Server-Sent Events broadcasting core: clients open a long-lived event
//! stream, subscribe it to named channels, and receive every payload
//! broadcast on those channels. Channels can be secured with parameterized
//! patterns and per-pattern authorizers, and several server instances can
//! share broadcasts and subscriptions over a bus.
//!
//! ## Modules
//!
//! - [`channel`]: Channel pattern compilation and matching
//! - [`stream`]: SSE framing and the per-client connection
//! - [`registry`]: Connections, subscriptions and secured patterns
//! - [`manager`]: Connection lifecycle and authorization
//! - [`transmit`]: Broadcast coordinator with bus relay and pings
//! - [`bus`]: Cross-instance transport and the in-memory driver
//! - [`api`]: HTTP routes with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use transmit::config::TransmitConfig;
//! use transmit::manager::{CreateConnectionParams, SubscribeParams};
//! use transmit::stream::ChannelTransport;
//! use transmit::Transmit;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transmit: Transmit<()> = Transmit::new(&TransmitConfig::default(), None).await?;
//!
//!     // Only user 42 may listen to its own inbox
//!     transmit
//!         .authorize("users/:id", |_, params| Ok(params["id"] == "42"))
//!         .await?;
//!
//!     let (transport, mut receiver) = ChannelTransport::new();
//!     transmit
//!         .create_connection(CreateConnectionParams::new("client-1", Box::new(transport), ()))
//!         .await?;
//!
//!     transmit
//!         .subscribe(SubscribeParams::new("client-1", "users/42", ()))
//!         .await;
//!     transmit.broadcast("users/42", json!({ "text": "hello" })).await;
//!
//!     print!("{}", receiver.drain());
//!
//!     transmit.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod bus;
pub mod channel;
pub mod config;
pub mod events;
pub mod manager;
pub mod registry;
pub mod stream;
pub mod transmit;

pub use api::{build_router, serve, ApiError, AppState, HttpContext};

pub use bus::{BusEnvelope, BusError, BusMessage, BusTransport, MemoryBus, DEFAULT_BUS_CHANNEL};

pub use channel::{find_match, ChannelParams, ChannelPattern, PatternError};

pub use config::{BusDriver, Config, ConfigError, PingInterval, ServerConfig, TransmitConfig};

pub use events::{EventEmitter, EventKind, ListenerHandle, TransmitEvent};

pub use manager::{
    ChannelAuthorizer, ConnectionManager, CreateConnectionParams, ManagerError, SubscribeParams,
    UnsubscribeParams,
};

pub use registry::{RegistryError, SubscriptionRegistry};

pub use stream::{ChannelTransport, Connection, Message, Transport, WriteError};

pub use transmit::{ExceptUids, Transmit, TransmitError, PING_CHANNEL};

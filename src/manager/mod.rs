//! Connection Management
//!
//! [`ConnectionManager`] owns the [`SubscriptionRegistry`](crate::registry::SubscriptionRegistry)
//! and the authorizers of secured channels. It is the only component that
//! mutates subscriptions.
//!
//! ## Lock Order
//!
//! The registry lock is always taken before the authorizer map, and no lock
//! is held while an authorizer runs.

mod authorizer;
mod connection_manager;

pub use authorizer::ChannelAuthorizer;
pub use connection_manager::{
    ConnectionManager, CreateConnectionParams, ManagerError, ManagerStats, SubscribeParams,
    UnsubscribeParams,
};

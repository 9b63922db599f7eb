//! Subscription Registry
//!
//! Tracks live connections, the channels each one is subscribed to, and the
//! channel patterns that require authorization.
//!
//! ## Indices
//!
//! - **uid → connection**: live connections, addressed by caller uid
//! - **uid → channels**: subscriptions of each connection
//! - **channel → uids**: reverse index used for fanout
//!
//! All three are mutated together; a subscription never outlives the
//! connection that owns it.

mod error;
mod store;

pub use error::RegistryError;
pub use store::{SecuredMatch, SubscriptionRegistry};

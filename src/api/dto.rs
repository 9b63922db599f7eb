//! Data Transfer Objects
//!
//! Request and response types for the HTTP endpoints.

use serde::{Deserialize, Serialize};

/// Query string of the event stream route
#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Connection uid; a fresh UUID when absent
    #[serde(default)]
    pub uid: Option<String>,
}

/// Subscribe or unsubscribe request body
#[derive(Debug, Deserialize)]
pub struct SubscriptionRequest {
    /// Uid of the event stream connection
    pub uid: String,
    /// Concrete channel name
    pub channel: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy"
    pub status: String,
    /// Open event stream connections on this instance
    pub connections: usize,
    /// Channels with at least one local subscriber
    pub channels: usize,
    /// Secured channel patterns
    pub secured_patterns: usize,
    /// Seconds since the server started
    pub uptime_seconds: u64,
    /// Server version
    pub version: String,
}

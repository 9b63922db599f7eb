//! Application State
//!
//! Shared state accessible by all HTTP handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use axum::http::HeaderMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::transmit::Transmit;

/// Caller context handed to channel authorizers and lifecycle events
#[derive(Debug, Clone, Default)]
pub struct HttpContext {
    /// Headers of the request that opened the stream or changed a subscription
    pub headers: HeaderMap,
}

impl HttpContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            headers: headers.clone(),
        }
    }

    /// Value of a header, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Broadcast coordinator
    pub transmit: Arc<Transmit<HttpContext>>,
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(transmit: Arc<Transmit<HttpContext>>, config: ServerConfig) -> Self {
        Self {
            transmit,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

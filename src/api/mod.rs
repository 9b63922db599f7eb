//! Transmit HTTP API
//!
//! HTTP glue for the broadcast core, built with Axum.
//!
//! # Endpoints
//!
//! ## Streams
//! - `GET {prefix}/events?uid=` - Open a server-sent events connection
//! - `POST {prefix}/subscribe` - Subscribe a connection to a channel
//! - `POST {prefix}/unsubscribe` - Unsubscribe a connection from a channel
//!
//! The prefix defaults to `/__transmit`.
//!
//! ## Health
//! - `GET /health/live` - Liveness probe
//! - `GET /health` - Connection and subscription counts
//!
//! # Example
//!
//! ```rust,ignore
//! use transmit::api::{serve, AppState, HttpContext};
//! use transmit::config::Config;
//! use transmit::Transmit;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default();
//!     let transmit = Arc::new(Transmit::new(&config.transmit, None).await?);
//!
//!     transmit
//!         .authorize("users/:id", |ctx: &HttpContext, params| {
//!             Ok(ctx.header("x-user-id") == Some(params["id"].as_str()))
//!         })
//!         .await?;
//!
//!     serve(AppState::new(transmit, config.server.clone())).await?;
//!     Ok(())
//! }
//! ```

pub mod dto;
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::{AppState, HttpContext};

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

/// Build the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let stream_routes = Router::new()
        .route("/events", get(routes::events::open_stream))
        .route("/subscribe", post(routes::subscriptions::subscribe))
        .route("/unsubscribe", post(routes::subscriptions::unsubscribe));

    let health_routes = Router::new()
        .route("/live", get(routes::health::liveness))
        .route("/", get(routes::health::full_health));

    let prefix = normalize_prefix(&state.config.route_prefix);
    let cors = cors_layer(&state.config.cors_origins);

    let shared_state = Arc::new(state);

    let router = match prefix {
        Some(prefix) => Router::new().nest(&prefix, stream_routes),
        None => stream_routes,
    };

    router
        .nest("/health", health_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(shared_state)
}

/// `"__transmit/"` → `Some("/__transmit")`; empty or `"/"` → `None`
fn normalize_prefix(prefix: &str) -> Option<String> {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{}", trimmed))
    }
}

/// Permissive when no origin is configured
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Start the HTTP server
///
/// On a shutdown signal the coordinator is shut down first so open event
/// streams end and the graceful shutdown can complete.
pub async fn serve(state: AppState) -> Result<(), ApiError> {
    let addr = state.config.addr();
    let transmit = Arc::clone(&state.transmit);
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Transmit listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            transmit.shutdown().await;
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

    tracing::info!("Transmit shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

//! Subscription Routes
//!
//! - POST {prefix}/subscribe - Subscribe a stream to a channel
//! - POST {prefix}/unsubscribe - Unsubscribe a stream from a channel

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::SubscriptionRequest;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::{AppState, HttpContext};
use crate::manager::{SubscribeParams, UnsubscribeParams};

/// POST {prefix}/subscribe
///
/// 204 once authorized, 401 when the channel's authorizer denies access.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubscriptionRequest>,
) -> ApiResult<StatusCode> {
    validate_request(&req)?;

    let params = SubscribeParams::new(
        req.uid,
        req.channel.clone(),
        HttpContext::from_headers(&headers),
    );

    if state.transmit.subscribe(params).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::Unauthorized(format!(
            "Access to channel {:?} denied",
            req.channel
        )))
    }
}

/// POST {prefix}/unsubscribe
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SubscriptionRequest>,
) -> ApiResult<StatusCode> {
    validate_request(&req)?;

    let params = UnsubscribeParams::new(req.uid, req.channel, HttpContext::from_headers(&headers));
    state.transmit.unsubscribe(params).await;

    Ok(StatusCode::NO_CONTENT)
}

fn validate_request(req: &SubscriptionRequest) -> ApiResult<()> {
    if req.uid.trim().is_empty() {
        return Err(ApiError::Validation("uid must not be empty".to_string()));
    }
    if req.channel.trim().is_empty() {
        return Err(ApiError::Validation("channel must not be empty".to_string()));
    }
    Ok(())
}

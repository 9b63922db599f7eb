//! Event Stream Route
//!
//! - GET {prefix}/events - Open a server-sent events connection

use axum::{
    body::Body,
    extract::{Query, State},
    http::HeaderMap,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::dto::EventsQuery;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::{AppState, HttpContext};
use crate::manager::CreateConnectionParams;
use crate::stream::ChannelTransport;

/// GET {prefix}/events
///
/// Registers a connection under `uid` (a fresh UUID when omitted) and
/// streams its messages until the client disconnects.
pub async fn open_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let uid = match query.uid {
        Some(uid) if uid.trim().is_empty() => {
            return Err(ApiError::Validation("uid must not be empty".to_string()))
        }
        Some(uid) => uid,
        None => Uuid::new_v4().to_string(),
    };

    let (transport, mut receiver) = ChannelTransport::new();
    let params = CreateConnectionParams::new(
        uid.clone(),
        Box::new(transport),
        HttpContext::from_headers(&headers),
    );

    state.transmit.create_connection(params).await?;

    let head = receiver
        .head()
        .await
        .ok_or_else(|| ApiError::Internal(format!("stream {} closed before attach", uid)))?;

    let mut response = Response::new(Body::from_stream(receiver.into_body_stream()));
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers;

    Ok(response)
}

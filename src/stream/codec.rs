//! SSE Wire Format
//!
//! Encodes broadcast messages into `text/event-stream` frames and builds the
//! response headers sent when a connection is attached.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;

/// Comment frame written once on attach.
///
/// Some clients (Safari) only fire `onopen` after the first bytes arrive.
pub const PRIMING_FRAME: &str = ":ok\n\n";

/// A message delivered to one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Channel the payload was broadcast on
    pub channel: String,
    /// Arbitrary JSON payload
    pub payload: Value,
}

impl Message {
    pub fn new(channel: impl Into<String>, payload: Value) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Encode as a complete SSE event frame
    pub fn to_frame(&self) -> String {
        let data = json!({
            "channel": self.channel,
            "payload": self.payload,
        });

        let mut frame = data_to_string(&data);
        frame.push('\n');
        frame
    }
}

/// Render a value as SSE `data:` lines
///
/// Objects, arrays and null are JSON encoded first; numbers and booleans are
/// written as their literal text; strings produce one `data:` line per line
/// of input, whatever the line ending.
pub fn data_to_string(data: &Value) -> String {
    match data {
        Value::String(text) => line_break()
            .split(text)
            .map(|line| format!("data: {}\n", line))
            .collect(),
        Value::Number(number) => format!("data: {}\n", number),
        Value::Bool(flag) => format!("data: {}\n", flag),
        other => data_to_string(&Value::String(other.to_string())),
    }
}

fn line_break() -> &'static Regex {
    static LINE_BREAK: OnceLock<Regex> = OnceLock::new();
    LINE_BREAK.get_or_init(|| Regex::new(r"\r\n|\r|\n").expect("valid line break regex"))
}

/// Response headers for an event stream
///
/// Forwarded headers are merged last and win over the defaults.
pub fn sse_headers(forwarded: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(
            "private, no-cache, no-store, must-revalidate, max-age=0, no-transform",
        ),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(HeaderName::from_static("expire"), HeaderValue::from_static("0"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    // Disables proxy buffering in nginx
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );

    headers.extend(forwarded.clone());
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_to_string_object() {
        assert_eq!(data_to_string(&json!({"a": 1})), "data: {\"a\":1}\n");
        assert_eq!(
            data_to_string(&json!({"name": "Romain Lanz"})),
            "data: {\"name\":\"Romain Lanz\"}\n"
        );
    }

    #[test]
    fn test_data_to_string_scalars() {
        assert_eq!(data_to_string(&json!(42)), "data: 42\n");
        assert_eq!(data_to_string(&json!(1.5)), "data: 1.5\n");
        assert_eq!(data_to_string(&json!(true)), "data: true\n");
        assert_eq!(data_to_string(&Value::Null), "data: null\n");
    }

    #[test]
    fn test_data_to_string_multiline() {
        assert_eq!(data_to_string(&json!("Hello world")), "data: Hello world\n");
        assert_eq!(data_to_string(&json!("l1\nl2")), "data: l1\ndata: l2\n");
        assert_eq!(
            data_to_string(&json!("a\r\nb\rc\nd")),
            "data: a\ndata: b\ndata: c\ndata: d\n"
        );
    }

    #[test]
    fn test_message_frame_keeps_field_order() {
        let message = Message::new("foo", json!({"z": 1, "a": 2}));
        assert_eq!(
            message.to_frame(),
            "data: {\"channel\":\"foo\",\"payload\":{\"z\":1,\"a\":2}}\n\n"
        );
    }

    #[test]
    fn test_default_headers() {
        let headers = sse_headers(&HeaderMap::new());

        assert_eq!(headers.len(), 6);
        assert_eq!(
            headers[header::CACHE_CONTROL],
            "private, no-cache, no-store, must-revalidate, max-age=0, no-transform"
        );
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers["expire"], "0");
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
    }

    #[test]
    fn test_forwarded_headers_merge_and_override() {
        let mut forwarded = HeaderMap::new();
        forwarded.insert("x-foo", HeaderValue::from_static("bar"));
        forwarded.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let headers = sse_headers(&forwarded);

        assert_eq!(headers.len(), 7);
        assert_eq!(headers["x-foo"], "bar");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    }
}

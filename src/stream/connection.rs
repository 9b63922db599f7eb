//! Client Connection
//!
//! A [`Connection`] pairs a caller-supplied uid with the write side of one
//! client transport.

use axum::http::{HeaderMap, StatusCode};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use super::codec::{sse_headers, Message, PRIMING_FRAME};
use super::transport::{Transport, WriteError};

/// One live client connection
pub struct Connection {
    uid: String,
    transport: Box<dyn Transport>,
    attached: AtomicBool,
}

impl Connection {
    /// Bind a uid to a transport
    pub fn new(uid: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            uid: uid.into(),
            transport,
            attached: AtomicBool::new(false),
        }
    }

    /// The caller-supplied identity of this connection
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Emit the event-stream headers and the priming frame
    ///
    /// Only the first call writes anything.
    pub fn attach(&self, forwarded_headers: &HeaderMap) -> Result<(), WriteError> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.transport
            .write_head(StatusCode::OK, sse_headers(forwarded_headers))?;
        self.transport.write(PRIMING_FRAME)
    }

    /// Serialize a message and write it to the transport
    pub fn write(&self, message: &Message) -> Result<(), WriteError> {
        self.transport.write(&message.to_frame())
    }

    /// End the stream from the server side
    ///
    /// The connection stays registered until the transport reports closed.
    pub fn close(&self) {
        self.transport.close()
    }

    /// Resolves once the client side of the transport is closed
    pub async fn closed(&self) {
        self.transport.closed().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uid", &self.uid)
            .field("attached", &self.attached.load(Ordering::Relaxed))
            .finish()
    }
}

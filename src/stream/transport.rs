//! Transport abstraction
//!
//! A [`Transport`] is the write side of one client connection. The core
//! needs an optional one-time header emission, a way to write text, a way to
//! end the stream from the server side, and a signal telling it the client
//! went away.
//!
//! [`ChannelTransport`] is the in-process implementation used by the HTTP
//! layer: chunks are pushed into an unbounded channel whose receiving half
//! becomes the response body.

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors raised when writing to a transport
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WriteError {
    /// The client side of the transport is gone
    #[error("Transport closed")]
    Closed,

    /// The transport failed for another reason
    #[error("Transport write failed: {0}")]
    Failed(String),
}

/// Write side of a client connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Emit the response status and headers
    ///
    /// Called at most once per connection. Transports that cannot emit
    /// headers keep the default no-op.
    fn write_head(&self, _status: StatusCode, _headers: HeaderMap) -> Result<(), WriteError> {
        Ok(())
    }

    /// Write raw text to the client
    fn write(&self, chunk: &str) -> Result<(), WriteError>;

    /// End the stream from the server side
    ///
    /// Text already written is still delivered; later writes fail. The
    /// default is a no-op for transports the server cannot end.
    fn close(&self) {}

    /// Resolves once the client side of the transport is closed
    async fn closed(&self);
}

/// Status and headers captured by [`ChannelTransport::write_head`]
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Item carried from a [`ChannelTransport`] to its receiver
#[derive(Debug)]
enum Chunk {
    Text(String),
    End,
}

/// Channel-backed transport
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<Chunk>,
    head: Mutex<Option<oneshot::Sender<ResponseHead>>>,
    ended: AtomicBool,
}

/// Receiving half of a [`ChannelTransport`]
///
/// Dropping it (or the body stream built from it) closes the transport.
/// The body ends once the transport is closed or dropped.
pub struct TransportReceiver {
    head: oneshot::Receiver<ResponseHead>,
    body: mpsc::UnboundedReceiver<Chunk>,
}

impl ChannelTransport {
    /// Create a transport and its receiving half
    pub fn new() -> (Self, TransportReceiver) {
        let (sender, body) = mpsc::unbounded_channel();
        let (head_tx, head) = oneshot::channel();

        let transport = Self {
            sender,
            head: Mutex::new(Some(head_tx)),
            ended: AtomicBool::new(false),
        };

        (transport, TransportReceiver { head, body })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn write_head(&self, status: StatusCode, headers: HeaderMap) -> Result<(), WriteError> {
        let sender = match self.head.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(sender) => sender
                .send(ResponseHead { status, headers })
                .map_err(|_| WriteError::Closed),
            None => Ok(()),
        }
    }

    fn write(&self, chunk: &str) -> Result<(), WriteError> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(WriteError::Closed);
        }

        self.sender
            .send(Chunk::Text(chunk.to_string()))
            .map_err(|_| WriteError::Closed)
    }

    fn close(&self) {
        if !self.ended.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(Chunk::End);
        }
    }

    async fn closed(&self) {
        self.sender.closed().await
    }
}

impl TransportReceiver {
    /// Wait for the response head
    ///
    /// Returns `None` if the transport was dropped before writing one.
    pub async fn head(&mut self) -> Option<ResponseHead> {
        (&mut self.head).await.ok()
    }

    /// Receive the next chunk, waiting if none is buffered
    ///
    /// Returns `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<String> {
        match self.body.recv().await {
            Some(Chunk::Text(text)) => Some(text),
            Some(Chunk::End) | None => None,
        }
    }

    /// Concatenate every chunk currently buffered
    pub fn drain(&mut self) -> String {
        let mut content = String::new();
        while let Ok(Chunk::Text(text)) = self.body.try_recv() {
            content.push_str(&text);
        }
        content
    }

    /// Turn the body half into a stream suitable for an HTTP response body
    ///
    /// The receiving half is dropped as soon as the stream ends, which in
    /// turn resolves [`Transport::closed`].
    pub fn into_body_stream(self) -> impl Stream<Item = Result<String, Infallible>> + Send {
        stream::unfold(self.body, |mut body| async move {
            match body.recv().await {
                Some(Chunk::Text(text)) => Some((Ok(text), body)),
                Some(Chunk::End) | None => None,
            }
        })
    }
}

//! Event Streams
//!
//! One [`Connection`] per client. Messages written to a connection are
//! encoded as Server-Sent Events and pushed into its [`Transport`].
//!
//! ## Wire format
//!
//! On attach the connection emits `200` with the event-stream headers, then
//! a `:ok` comment frame. Each message is sent as
//!
//! ```text
//! data: {"channel":"users/1","payload":{"text":"hi"}}
//!
//! ```

mod codec;
mod connection;
mod transport;

pub use codec::{data_to_string, sse_headers, Message, PRIMING_FRAME};
pub use connection::Connection;
pub use transport::{ChannelTransport, ResponseHead, Transport, TransportReceiver, WriteError};

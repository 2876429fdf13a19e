//! Transport abstraction layer for Hubwire.
//!
//! A logical Hubwire connection is carried by one of three HTTP-based
//! transports. Each of them moves bytes between the client and the
//! connection's [`DuplexPipe`], and all three are driven through the same
//! [`HttpTransport`] trait:
//!
//! - [`WebSocketsTransport`]: full duplex, two concurrent loops
//! - [`ServerSentEventsTransport`]: server-to-client event stream
//! - [`LongPollingTransport`]: one bounded read per HTTP request
//!
//! The [`pipe`] module provides the bounded, cancellable byte channel the
//! transports and the application share.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

mod error;
pub mod pipe;
mod polling;
mod sse;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use pipe::{DuplexPipe, FlushResult, PipeOptions, PipeReader, PipeWriter, ReadResult};
pub use polling::{LongPollingOptions, LongPollingTransport, PollOutcome};
pub use sse::{EVENT_STREAM_HEADERS, ServerSentEventsTransport, format_event};
#[cfg(feature = "websocket")]
pub use websocket::{SocketOutcome, WebSocketOptions, WebSocketsTransport};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio_util::sync::CancellationToken;

/// Opaque identifier for a logical connection.
///
/// Handed to the client by the negotiate endpoint and echoed back on every
/// later request as the `connectionToken` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a token string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three ways a connection can be carried over HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSockets,
    ServerSentEvents,
    LongPolling,
}

impl TransportKind {
    /// Parses the `transport` query parameter (case-insensitive).
    ///
    /// Returns `None` for names Hubwire does not support (e.g.
    /// `foreverFrame`); callers ignore those requests.
    pub fn from_query(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("websockets") {
            Some(Self::WebSockets)
        } else if value.eq_ignore_ascii_case("serverSentEvents") {
            Some(Self::ServerSentEvents)
        } else if value.eq_ignore_ascii_case("longPolling") {
            Some(Self::LongPolling)
        } else {
            None
        }
    }

    /// Returns the canonical query-string name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSockets => "websockets",
            Self::ServerSentEvents => "serverSentEvents",
            Self::LongPolling => "longPolling",
        }
    }

    /// Long polling is the only transport that re-attaches per request.
    pub fn is_request_scoped(self) -> bool {
        matches!(self, Self::LongPolling)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether frames are text (UTF-8) or arbitrary binary.
///
/// The socket transport uses this to pick between text and binary
/// WebSocket messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferFormat {
    #[default]
    Text,
    Binary,
}

/// A transfer format that can be changed after the transport started.
///
/// The wire protocol is negotiated in-band, after the socket is already
/// open, so the send loop reads the current value for every frame.
#[derive(Debug, Clone, Default)]
pub struct SharedTransferFormat(Arc<AtomicU8>);

impl SharedTransferFormat {
    pub fn new(format: TransferFormat) -> Self {
        let shared = Self::default();
        shared.set(format);
        shared
    }

    pub fn get(&self) -> TransferFormat {
        match self.0.load(Ordering::Acquire) {
            1 => TransferFormat::Binary,
            _ => TransferFormat::Text,
        }
    }

    pub fn set(&self, format: TransferFormat) {
        let raw = match format {
            TransferFormat::Text => 0,
            TransferFormat::Binary => 1,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// A transport that serves one HTTP request against a connection's pipe.
///
/// Implementations own whatever I/O object they need (a socket, a response
/// writer, nothing at all for polling) and run until the exchange is over.
/// The connection lifecycle code only ever talks to this trait.
pub trait HttpTransport: Send + Sized {
    /// What the transport reports when it finishes.
    type Outcome: Send;

    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// Runs the transport until completion, fault, or `cancel` fires.
    fn process_request(
        self,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Self::Outcome, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_display_is_raw_token() {
        let id = ConnectionId::new("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.as_str(), "abc123");
    }

    #[test]
    fn test_connection_id_hash_works_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConnectionId::new("a"), 1);
        map.insert(ConnectionId::new("b"), 2);
        assert_eq!(map[&ConnectionId::new("a")], 1);
    }

    #[test]
    fn test_transport_kind_from_query_is_case_insensitive() {
        assert_eq!(
            TransportKind::from_query("WebSockets"),
            Some(TransportKind::WebSockets)
        );
        assert_eq!(
            TransportKind::from_query("serversentevents"),
            Some(TransportKind::ServerSentEvents)
        );
        assert_eq!(
            TransportKind::from_query("LONGPOLLING"),
            Some(TransportKind::LongPolling)
        );
    }

    #[test]
    fn test_transport_kind_from_query_unknown_returns_none() {
        assert_eq!(TransportKind::from_query("foreverFrame"), None);
        assert_eq!(TransportKind::from_query(""), None);
    }

    #[test]
    fn test_shared_transfer_format_updates_are_visible_to_clones() {
        let format = SharedTransferFormat::new(TransferFormat::Text);
        let observer = format.clone();
        format.set(TransferFormat::Binary);
        assert_eq!(observer.get(), TransferFormat::Binary);
    }
}

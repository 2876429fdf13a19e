//! Unified error type for the Hubwire framework.

use hubwire_protocol::ProtocolError;
use hubwire_registry::RegistryError;
use hubwire_transport::{ConnectionId, TransportError};

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `hubwire` crate you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute on
/// each variant generates the `From` impls, so `?` converts layer errors
/// automatically.
#[derive(Debug, thiserror::Error)]
pub enum HubwireError {
    /// A transport-level error (socket, event stream, poll).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, decode, encode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registry-level error (unknown connection, transport busy).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The application side of the connection has already shut down, so
    /// the message could not be queued.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// Binding or serving the listener failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

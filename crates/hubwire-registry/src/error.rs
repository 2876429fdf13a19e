//! Error types for the registry layer.

use hubwire_transport::{ConnectionId, TransportKind};

/// Errors that can occur while looking up or attaching to a connection.
///
/// The hosting layer maps each of these to an HTTP status code, so they
/// describe *why* a request cannot proceed rather than how it failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No connection is registered under this id. It was never
    /// negotiated, or it has already been disposed.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// Another request is already running a transport for this connection.
    #[error("connection {0} already has an active transport")]
    AlreadyAttached(ConnectionId),

    /// The connection was started with a different transport kind.
    #[error("connection {id} uses {active}, cannot attach {requested}")]
    TransportMismatch {
        id: ConnectionId,
        active: TransportKind,
        requested: TransportKind,
    },

    /// The connection is shutting down or already closed.
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

//! # Hubwire
//!
//! Real-time RPC between browsers and a Rust server over whatever HTTP
//! transport the client can manage: WebSockets, Server-Sent Events, or
//! long polling.
//!
//! Applications implement [`HubDispatcher`] (method signatures plus a
//! `dispatch` callback) and the framework handles negotiation, transport
//! selection, framing, and the JSON hub protocol.
//!
//! ## Layers
//!
//! ```text
//! hubwire (this crate)   ← HTTP endpoints, hub handler, broadcast
//!     ↕
//! hubwire-registry       ← connection ids, lifecycle, transport slot
//!     ↕
//! hubwire-transport      ← pipes, WebSocket / SSE / long-polling transports
//!     ↕
//! hubwire-protocol       ← framing, hub messages, JSON protocol, cache
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hubwire::prelude::*;
//!
//! // Implement HubDispatcher for your hub, then:
//! // let server = HubwireServer::builder()
//! //     .bind("0.0.0.0:8080")
//! //     .build(MyHub::default())
//! //     .await?;
//! // server.run().await
//! ```

mod dispatcher;
mod error;
mod hub;
mod options;
mod routes;
mod server;
mod store;

pub use dispatcher::{CONNECTION_DATA_ITEM, ConnectionQuery, HttpDispatcher};
pub use error::HubwireError;
pub use hub::{ConnectionHandler, HubConnection, HubConnectionHandler, HubDispatcher};
pub use options::{EnabledTransports, HttpConnectionOptions};
pub use routes::router;
pub use server::{HubwireServer, HubwireServerBuilder, spawn_scan_loop};
pub use store::HubConnectionStore;

/// Convenient imports for hub implementations.
///
/// ```rust
/// use hubwire::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ConnectionHandler, HttpConnectionOptions, HubConnection, HubConnectionHandler,
        HubConnectionStore, HubDispatcher, HubwireError, HubwireServer, HubwireServerBuilder,
    };
    pub use hubwire_protocol::{
        CancelInvocationMessage, CompletionMessage, HubMessage, InvocationBinder,
        InvocationMessage, JsonHubProtocol, MethodTable, ParameterType, StreamItemMessage,
    };
    pub use hubwire_registry::ConnectionContext;
    pub use hubwire_transport::{ConnectionId, TransportKind};
}

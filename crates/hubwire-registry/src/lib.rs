//! Connection registry for Hubwire.
//!
//! This crate keeps track of logical connections between the negotiate
//! request that creates them and the moment they are disposed:
//!
//! 1. **Registration**: ids and pipe pairs ([`ConnectionManager`])
//! 2. **Transport exclusivity**: at most one transport request per
//!    connection at a time ([`ConnectionContext::try_attach`],
//!    [`ConnectionContext::attach_poll`])
//! 3. **Expiry**: disposing connections whose transport has been gone
//!    longer than the disconnect timeout ([`ConnectionManager::scan`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Hosting Layer (above)   ← routes HTTP requests to connections
//!     ↕
//! Registry Layer (this crate)  ← connection ids, state, transport slot
//!     ↕
//! Transport Layer (below) ← pipes and transports
//! ```

mod connection;
mod error;
mod manager;

pub use connection::{ConnectionContext, ConnectionState, TransportLease};
pub use error::RegistryError;
pub use manager::ConnectionManager;

//! Wire protocol for Hubwire.
//!
//! This crate defines how hub messages look on the wire:
//!
//! - **Framing** ([`binary_format`], [`text_format`]): where one message
//!   ends and the next begins in a byte stream.
//! - **Messages** ([`HubMessage`] and friends): the closed set of RPC
//!   messages clients and servers exchange.
//! - **Protocols** ([`HubProtocol`], [`JsonHubProtocol`]): how messages
//!   are encoded, including argument binding through an
//!   [`InvocationBinder`].
//! - **Negotiation** ([`negotiation`]): the first frame on a connection,
//!   naming the protocol to use.
//! - **Caching** ([`SerializationCache`]): serialize a broadcast once per
//!   protocol instead of once per recipient.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw bytes in a pipe) and
//! the hub (method dispatch). It knows nothing about connections; it only
//! turns bytes into messages and back.
//!
//! ```text
//! Transport (bytes) → Protocol (HubMessage) → Hub (dispatch)
//! ```

// ---------------------------------------------------------------------------
// Module declarations
// ---------------------------------------------------------------------------

pub mod binary_format;
mod binder;
mod cache;
mod error;
mod json;
mod message;
mod msgpack;
pub mod negotiation;
mod protocol;
pub mod text_format;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

pub use binder::{BindingError, InvocationBinder, MethodTable, ParameterType, bind_arguments};
pub use cache::{MAX_CACHED_PROTOCOLS, SerializationCache, SerializedMessage};
pub use error::{FormatError, ProtocolError};
pub use json::{JsonHubProtocol, JsonHubProtocolOptions, NullValues, PropertyNaming};
pub use message::{
    CancelInvocationMessage, CompletionMessage, CompletionOutcome, Headers, HubMessage,
    InvocationMessage, MessageType, StreamItemMessage,
};
pub use negotiation::NegotiationMessage;
pub use protocol::{HubProtocol, ProtocolSet};

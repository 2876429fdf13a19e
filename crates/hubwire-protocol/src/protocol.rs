//! The [`HubProtocol`] trait: one wire encoding for hub messages.
//!
//! A server can speak several protocols at once. Each connection picks one
//! during negotiation, and broadcasts serialize once per protocol in use
//! (see [`SerializationCache`](crate::SerializationCache)).
//!
//! The trait is object safe so protocols can be stored as
//! `Arc<dyn HubProtocol>` and chosen by name at runtime.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use hubwire_transport::TransferFormat;

use crate::binder::InvocationBinder;
use crate::error::ProtocolError;
use crate::message::HubMessage;

/// A wire encoding for [`HubMessage`]s, including its own framing.
pub trait HubProtocol: Send + Sync {
    /// The name clients use to request this protocol during negotiation.
    fn name(&self) -> &str;

    /// Whether the encoded frames are text or binary.
    fn transfer_format(&self) -> TransferFormat;

    /// Decodes one message from the front of `input`.
    ///
    /// Returns `Ok(None)` if `input` does not yet hold a complete frame, in
    /// which case `input` is unchanged. Once a complete frame is found it
    /// is consumed even if decoding it fails, so a bad frame never blocks
    /// the ones after it.
    fn try_parse_message(
        &self,
        input: &mut &[u8],
        binder: &dyn InvocationBinder,
    ) -> Result<Option<HubMessage>, ProtocolError>;

    /// Appends the framed encoding of `message` to `output`.
    fn write_message(
        &self,
        message: &HubMessage,
        output: &mut Vec<u8>,
    ) -> Result<(), ProtocolError>;

    /// Encodes `message` into a fresh buffer.
    fn to_bytes(&self, message: &HubMessage) -> Result<Bytes, ProtocolError> {
        let mut output = Vec::new();
        self.write_message(message, &mut output)?;
        Ok(Bytes::from(output))
    }
}

/// The protocols a server is willing to speak, looked up by name.
#[derive(Clone, Default)]
pub struct ProtocolSet {
    protocols: Vec<Arc<dyn HubProtocol>>,
}

impl ProtocolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a protocol. A later protocol with the same name replaces the
    /// earlier one.
    pub fn with(mut self, protocol: impl HubProtocol + 'static) -> Self {
        self.insert(Arc::new(protocol));
        self
    }

    pub fn insert(&mut self, protocol: Arc<dyn HubProtocol>) {
        self.protocols.retain(|p| p.name() != protocol.name());
        self.protocols.push(protocol);
    }

    /// Finds a protocol by its exact name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn HubProtocol>> {
        self.protocols.iter().find(|p| p.name() == name)
    }

    pub fn as_slice(&self) -> &[Arc<dyn HubProtocol>] {
        &self.protocols
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.protocols.iter().map(|p| p.name())
    }

    pub fn is_empty(&self) -> bool {
        self.protocols.is_empty()
    }
}

impl fmt::Debug for ProtocolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

//! Error types for the protocol layer.
//!
//! Two enums live here. [`FormatError`] covers framing: a length prefix
//! that cannot describe a valid message is fatal for the stream it came
//! from. [`ProtocolError`] covers everything above framing, and most of
//! its messages are part of the wire contract: clients compare them
//! verbatim, so the texts must not change.

use crate::binder::BindingError;

/// A frame boundary could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The length prefix is longer than five bytes or encodes a length
    /// above `i32::MAX`.
    #[error("Messages over 2GB in size are not supported.")]
    MessageTooLarge,
}

/// Errors raised while decoding or encoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame was valid JSON but did not describe a valid message.
    ///
    /// The string is the exact client-visible text, e.g.
    /// `Missing required property 'type'.`
    #[error("{0}")]
    InvalidData(String),

    /// The frame was not valid JSON at all.
    #[error("Error reading JSON.")]
    MalformedJson(#[source] serde_json::Error),

    /// Writing JSON failed.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A binding failure surfaced where there is no invocation to carry it
    /// (a completion result or stream item of the wrong type), or a caller
    /// tried to write an invocation whose arguments never bound.
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// A serialization cache restored from another server was asked for a
    /// protocol it does not hold.
    #[error(
        "This message was received from another server that did not have the requested protocol available."
    )]
    NoOriginalMessage,

    #[error(transparent)]
    Format(#[from] FormatError),
}

impl ProtocolError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    pub(crate) fn missing_property(name: &str) -> Self {
        Self::InvalidData(format!("Missing required property '{name}'."))
    }

    pub(crate) fn wrong_type(name: &str, kind: &str) -> Self {
        Self::InvalidData(format!("Expected '{name}' to be of type {kind}."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_error_message_too_large_text() {
        assert_eq!(
            FormatError::MessageTooLarge.to_string(),
            "Messages over 2GB in size are not supported."
        );
    }

    #[test]
    fn test_protocol_error_helpers_produce_wire_texts() {
        assert_eq!(
            ProtocolError::missing_property("target").to_string(),
            "Missing required property 'target'."
        );
        assert_eq!(
            ProtocolError::wrong_type("arguments", "Array").to_string(),
            "Expected 'arguments' to be of type Array."
        );
    }

    #[test]
    fn test_protocol_error_binding_is_transparent() {
        let err = ProtocolError::from(BindingError::TypeMismatch);
        assert_eq!(err.to_string(), BindingError::TypeMismatch.to_string());
    }
}

//! The in-band negotiation message.
//!
//! Before any hub message flows, the client sends one text frame naming
//! the hub protocol it wants:
//!
//! ```text
//! {"protocol":"json"}\x1e
//! ```
//!
//! This frame always uses text framing, whatever the chosen protocol's own
//! transfer format is.

use serde_json::Value;

use crate::error::ProtocolError;
use crate::json;
use crate::text_format;

const PROTOCOL: &str = "protocol";

/// The client's choice of hub protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationMessage {
    protocol: String,
}

impl NegotiationMessage {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }
}

/// Appends the framed encoding of `message` to `output`.
pub fn write_message(
    message: &NegotiationMessage,
    output: &mut Vec<u8>,
) -> Result<(), ProtocolError> {
    let mut object = serde_json::Map::new();
    object.insert(PROTOCOL.to_string(), Value::String(message.protocol.clone()));
    serde_json::to_writer(&mut *output, &object).map_err(ProtocolError::Encode)?;
    text_format::write_record_separator(output);
    Ok(())
}

/// Decodes a negotiation message from the front of `input`.
///
/// Returns `Ok(None)` without consuming anything until a whole frame has
/// arrived. Bytes after the frame are left in `input`.
pub fn try_parse_message(input: &mut &[u8]) -> Result<Option<NegotiationMessage>, ProtocolError> {
    let Some(frame) = text_format::try_slice_message(input) else {
        return Ok(None);
    };

    let value: Value = serde_json::from_slice(frame).map_err(ProtocolError::MalformedJson)?;
    let mut object = json::expect_object(value)?;

    match object.remove(PROTOCOL) {
        Some(Value::String(protocol)) => Ok(Some(NegotiationMessage { protocol })),
        Some(_) => Err(ProtocolError::wrong_type(PROTOCOL, "String")),
        None => Err(ProtocolError::missing_property(PROTOCOL)),
    }
}

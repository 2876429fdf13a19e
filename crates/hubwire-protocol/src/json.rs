//! The JSON hub protocol.
//!
//! One JSON object per message, terminated by the text record separator:
//!
//! ```text
//! {"type":1,"invocationId":"123","target":"Send","arguments":["hi"]}\x1e
//! ```
//!
//! Decoding is strict and every failure has a fixed message (see
//! [`ProtocolError::InvalidData`]). Fields are checked in a fixed order
//! (`type`, `headers`, `invocationId`, `target`, `arguments`) so the first
//! problem reported is predictable.
//!
//! Encoding writes the envelope fields in a fixed order and then reshapes
//! payload objects according to [`JsonHubProtocolOptions`].

use hubwire_transport::TransferFormat;
use serde::Deserialize;
use serde::ser::{SerializeMap, Serializer as _};
use serde_json::{Map, Value};

use crate::binder::{BindingError, InvocationBinder, bind_arguments};
use crate::error::ProtocolError;
use crate::message::{
    CancelInvocationMessage, CompletionMessage, CompletionOutcome, Headers, HubMessage,
    InvocationMessage, MessageType, StreamItemMessage,
};
use crate::protocol::HubProtocol;
use crate::text_format;

const TYPE: &str = "type";
const HEADERS: &str = "headers";
const INVOCATION_ID: &str = "invocationId";
const TARGET: &str = "target";
const ARGUMENTS: &str = "arguments";
const ITEM: &str = "item";
const RESULT: &str = "result";
const ERROR: &str = "error";

/// How property names inside payload objects are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PropertyNaming {
    /// `StringProp` and `string_prop` become `stringProp`.
    #[default]
    CamelCase,
    /// `stringProp` and `string_prop` become `StringProp`.
    PascalCase,
}

/// Whether `null` properties inside payload objects are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum NullValues {
    #[default]
    Include,
    Ignore,
}

/// Payload formatting for [`JsonHubProtocol`].
///
/// These only affect objects nested inside arguments, items and results.
/// Envelope field names are fixed, and a top-level `null` item, result or
/// argument is always written.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct JsonHubProtocolOptions {
    pub property_naming: PropertyNaming,
    pub null_values: NullValues,
}

/// The reference hub protocol, registered as `"json"`.
#[derive(Debug, Clone, Default)]
pub struct JsonHubProtocol {
    options: JsonHubProtocolOptions,
}

impl JsonHubProtocol {
    pub const NAME: &'static str = "json";

    pub fn new(options: JsonHubProtocolOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &JsonHubProtocolOptions {
        &self.options
    }

    fn parse_frame(
        &self,
        frame: &[u8],
        binder: &dyn InvocationBinder,
    ) -> Result<HubMessage, ProtocolError> {
        let value: Value = serde_json::from_slice(frame).map_err(ProtocolError::MalformedJson)?;
        let mut object = expect_object(value)?;

        let message_type = read_type(&object)?;
        let headers = read_headers(&mut object)?;

        let message = match message_type {
            MessageType::Invocation => {
                let invocation_id = optional_string(&mut object, INVOCATION_ID)?;
                let invocation = read_invocation(&mut object, invocation_id, binder)?;
                HubMessage::Invocation(invocation.with_headers(headers))
            }
            MessageType::StreamInvocation => {
                let invocation_id = required_string(&mut object, INVOCATION_ID)?;
                let invocation = read_invocation(&mut object, Some(invocation_id), binder)?;
                HubMessage::StreamInvocation(invocation.with_headers(headers))
            }
            MessageType::StreamItem => {
                let invocation_id = required_string(&mut object, INVOCATION_ID)?;
                let item = object
                    .remove(ITEM)
                    .ok_or_else(|| ProtocolError::missing_property(ITEM))?;
                let item = binder.return_type(&invocation_id).coerce(item)?;
                HubMessage::StreamItem(
                    StreamItemMessage::new(invocation_id, item).with_headers(headers),
                )
            }
            MessageType::Completion => {
                let invocation_id = required_string(&mut object, INVOCATION_ID)?;
                let error = optional_string(&mut object, ERROR)?;
                let result = object.remove(RESULT);
                let outcome = match (error, result) {
                    (Some(_), Some(_)) => {
                        return Err(ProtocolError::invalid(
                            "The 'error' and 'result' properties are mutually exclusive.",
                        ));
                    }
                    (Some(error), None) => CompletionOutcome::Error(error),
                    (None, Some(result)) => {
                        let result = binder.return_type(&invocation_id).coerce(result)?;
                        CompletionOutcome::Result(result)
                    }
                    (None, None) => CompletionOutcome::Empty,
                };
                HubMessage::Completion(
                    CompletionMessage::new(invocation_id, outcome).with_headers(headers),
                )
            }
            MessageType::CancelInvocation => {
                let invocation_id = required_string(&mut object, INVOCATION_ID)?;
                HubMessage::CancelInvocation(
                    CancelInvocationMessage::new(invocation_id).with_headers(headers),
                )
            }
            MessageType::Ping => HubMessage::Ping,
        };
        Ok(message)
    }

    fn write_json(
        &self,
        message: &HubMessage,
        output: &mut Vec<u8>,
    ) -> Result<(), serde_json::Error> {
        let mut serializer = serde_json::Serializer::new(output);
        let mut map = serializer.serialize_map(None)?;

        map.serialize_entry(TYPE, &message.message_type().code())?;
        if let Some(headers) = message.headers().filter(|h| !h.is_empty()) {
            map.serialize_entry(HEADERS, headers)?;
        }
        if let Some(invocation_id) = message.invocation_id() {
            map.serialize_entry(INVOCATION_ID, invocation_id)?;
        }

        match message {
            HubMessage::Invocation(m) | HubMessage::StreamInvocation(m) => {
                map.serialize_entry(TARGET, m.target())?;
                // Checked by the caller before any byte was written.
                let arguments: Vec<Value> = m
                    .arguments()
                    .unwrap_or_default()
                    .iter()
                    .map(|a| self.shape(a))
                    .collect();
                map.serialize_entry(ARGUMENTS, &arguments)?;
            }
            HubMessage::StreamItem(m) => {
                map.serialize_entry(ITEM, &self.shape(m.item()))?;
            }
            HubMessage::Completion(m) => match m.outcome() {
                CompletionOutcome::Error(error) => map.serialize_entry(ERROR, error)?,
                CompletionOutcome::Result(result) => {
                    map.serialize_entry(RESULT, &self.shape(result))?
                }
                CompletionOutcome::Empty => {}
            },
            HubMessage::CancelInvocation(_) | HubMessage::Ping => {}
        }

        map.end()
    }

    /// Applies the naming and null policies to a payload value.
    fn shape(&self, value: &Value) -> Value {
        match value {
            Value::Object(object) => {
                let mut shaped = Map::with_capacity(object.len());
                for (key, value) in object {
                    if value.is_null() && self.options.null_values == NullValues::Ignore {
                        continue;
                    }
                    let key = match self.options.property_naming {
                        PropertyNaming::CamelCase => to_camel_case(key),
                        PropertyNaming::PascalCase => to_pascal_case(key),
                    };
                    shaped.insert(key, self.shape(value));
                }
                Value::Object(shaped)
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.shape(v)).collect()),
            other => other.clone(),
        }
    }
}

impl HubProtocol for JsonHubProtocol {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transfer_format(&self) -> TransferFormat {
        TransferFormat::Text
    }

    fn try_parse_message(
        &self,
        input: &mut &[u8],
        binder: &dyn InvocationBinder,
    ) -> Result<Option<HubMessage>, ProtocolError> {
        let Some(frame) = text_format::try_slice_message(input) else {
            return Ok(None);
        };
        self.parse_frame(frame, binder).map(Some)
    }

    fn write_message(
        &self,
        message: &HubMessage,
        output: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        if let HubMessage::Invocation(m) | HubMessage::StreamInvocation(m) = message {
            m.arguments()?;
        }
        self.write_json(message, output).map_err(ProtocolError::Encode)?;
        text_format::write_record_separator(output);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Field readers
// ---------------------------------------------------------------------------

/// The token kind names clients expect in error messages.
/// Unwraps a top-level JSON object, or names the token found instead.
pub(crate) fn expect_object(value: Value) -> Result<Map<String, Value>, ProtocolError> {
    match value {
        Value::Object(object) => Ok(object),
        other => Err(ProtocolError::invalid(format!(
            "Unexpected JSON Token Type '{}'. Expected a JSON Object.",
            token_kind(&other)
        ))),
    }
}

fn token_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Integer",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

fn read_type(object: &Map<String, Value>) -> Result<MessageType, ProtocolError> {
    let value = object
        .get(TYPE)
        .ok_or_else(|| ProtocolError::missing_property(TYPE))?;
    let Value::Number(code) = value else {
        return Err(ProtocolError::wrong_type(TYPE, "Integer"));
    };
    if !(code.is_i64() || code.is_u64()) {
        return Err(ProtocolError::wrong_type(TYPE, "Integer"));
    }
    code.as_i64()
        .and_then(MessageType::from_code)
        .ok_or_else(|| ProtocolError::invalid(format!("Unknown message type: {code}")))
}

fn read_headers(object: &mut Map<String, Value>) -> Result<Headers, ProtocolError> {
    let Some(value) = object.remove(HEADERS) else {
        return Ok(Headers::new());
    };
    let Value::Object(entries) = value else {
        return Err(ProtocolError::wrong_type(HEADERS, "Object"));
    };

    let mut headers = Headers::new();
    for (key, value) in entries {
        let Value::String(value) = value else {
            return Err(ProtocolError::invalid(format!(
                "Expected header '{key}' to be of type String."
            )));
        };
        headers.insert(key, value);
    }
    Ok(headers)
}

fn read_invocation(
    object: &mut Map<String, Value>,
    invocation_id: Option<String>,
    binder: &dyn InvocationBinder,
) -> Result<InvocationMessage, ProtocolError> {
    let target = required_string(object, TARGET)?;
    let arguments = match object.remove(ARGUMENTS) {
        Some(Value::Array(arguments)) => arguments,
        Some(_) => return Err(ProtocolError::wrong_type(ARGUMENTS, "Array")),
        None => return Err(ProtocolError::missing_property(ARGUMENTS)),
    };

    let bound = match binder.parameter_types(&target) {
        Some(types) => bind_arguments(arguments, types),
        None => Err(BindingError::UnknownTarget(target.clone())),
    };
    Ok(match bound {
        Ok(arguments) => InvocationMessage::new(invocation_id, target, arguments),
        Err(error) => {
            tracing::debug!(method = %target, %error, "invocation arguments did not bind");
            InvocationMessage::with_binding_error(invocation_id, target, error)
        }
    })
}

fn optional_string(
    object: &mut Map<String, Value>,
    name: &str,
) -> Result<Option<String>, ProtocolError> {
    match object.remove(name) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ProtocolError::wrong_type(name, "String")),
    }
}

fn required_string(object: &mut Map<String, Value>, name: &str) -> Result<String, ProtocolError> {
    optional_string(object, name)?.ok_or_else(|| ProtocolError::missing_property(name))
}

// ---------------------------------------------------------------------------
// Property naming
// ---------------------------------------------------------------------------

/// `StringProp` → `stringProp`, `URLValue` → `urlValue`,
/// `string_prop` → `stringProp`.
fn to_camel_case(name: &str) -> String {
    if name.contains('_') {
        let pascal = to_pascal_case(name);
        return lower_leading(&pascal);
    }
    lower_leading(name)
}

/// Lowercases the leading run of capitals, keeping the last one of a run
/// that is followed by a lowercase letter (it starts the next word).
fn lower_leading(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len());
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_uppercase() {
            out.extend(chars[i..].iter());
            return out;
        }
        let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        if i > 0 && next_is_lower {
            out.extend(chars[i..].iter());
            return out;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// `stringProp` → `StringProp`, `string_prop` → `StringProp`.
fn to_pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for part in name.split('_').filter(|p| !p.is_empty()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    if out.is_empty() { name.to_string() } else { out }
}

//! The hub message model.
//!
//! Every frame exchanged after negotiation decodes to one [`HubMessage`].
//! The enum is closed: the wire `type` field selects the variant, and
//! nothing else can appear on the wire.
//!
//! | `type` | variant |
//! |---|---|
//! | 1 | [`HubMessage::Invocation`] |
//! | 2 | [`HubMessage::StreamItem`] |
//! | 3 | [`HubMessage::Completion`] |
//! | 4 | [`HubMessage::StreamInvocation`] |
//! | 5 | [`HubMessage::CancelInvocation`] |
//! | 6 | [`HubMessage::Ping`] |
//!
//! Fields are private and set only by constructors, so an invocation id
//! can never change after the message is built.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::binder::BindingError;

/// String-to-string metadata carried alongside a message.
///
/// Ordered so the encoded form is deterministic.
pub type Headers = BTreeMap<String, String>;

/// The numeric `type` discriminator used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Invocation = 1,
    StreamItem = 2,
    Completion = 3,
    StreamInvocation = 4,
    CancelInvocation = 5,
    Ping = 6,
}

impl MessageType {
    /// Maps a wire code to a message type.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Invocation),
            2 => Some(Self::StreamItem),
            3 => Some(Self::Completion),
            4 => Some(Self::StreamInvocation),
            5 => Some(Self::CancelInvocation),
            6 => Some(Self::Ping),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }
}

// ---------------------------------------------------------------------------
// Invocation
// ---------------------------------------------------------------------------

/// A call to a hub method, used by both `Invocation` and
/// `StreamInvocation`.
///
/// If the arguments could not be bound to the target's parameters, the
/// message still exists and still carries its id and target; only
/// [`arguments`](Self::arguments) reports the failure.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationMessage {
    invocation_id: Option<String>,
    target: String,
    arguments: Result<Vec<Value>, BindingError>,
    headers: Headers,
}

impl InvocationMessage {
    /// Creates an invocation. Without an id the caller expects no reply.
    pub fn new(
        invocation_id: Option<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            invocation_id,
            target: target.into(),
            arguments: Ok(arguments),
            headers: Headers::new(),
        }
    }

    /// Creates an invocation whose arguments failed to bind.
    pub fn with_binding_error(
        invocation_id: Option<String>,
        target: impl Into<String>,
        error: BindingError,
    ) -> Self {
        Self {
            invocation_id,
            target: target.into(),
            arguments: Err(error),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn invocation_id(&self) -> Option<&str> {
        self.invocation_id.as_deref()
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The bound arguments, or the failure recorded while binding them.
    pub fn arguments(&self) -> Result<&[Value], BindingError> {
        match &self.arguments {
            Ok(arguments) => Ok(arguments),
            Err(e) => Err(e.clone()),
        }
    }

    /// Consumes the message, returning the bound arguments.
    pub fn into_arguments(self) -> Result<Vec<Value>, BindingError> {
        self.arguments
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

// ---------------------------------------------------------------------------
// StreamItem
// ---------------------------------------------------------------------------

/// One element of a streaming result.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamItemMessage {
    invocation_id: String,
    item: Value,
    headers: Headers,
}

impl StreamItemMessage {
    pub fn new(invocation_id: impl Into<String>, item: Value) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            item,
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn item(&self) -> &Value {
        &self.item
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Finished without a value (void methods, finished streams).
    Empty,
    /// Finished with a value, which may be `null`.
    Result(Value),
    /// Failed with an error message.
    Error(String),
}

/// The final reply to an invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionMessage {
    invocation_id: String,
    outcome: CompletionOutcome,
    headers: Headers,
}

impl CompletionMessage {
    pub fn new(invocation_id: impl Into<String>, outcome: CompletionOutcome) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            outcome,
            headers: Headers::new(),
        }
    }

    pub fn with_result(invocation_id: impl Into<String>, result: Value) -> Self {
        Self::new(invocation_id, CompletionOutcome::Result(result))
    }

    pub fn with_error(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(invocation_id, CompletionOutcome::Error(error.into()))
    }

    pub fn empty(invocation_id: impl Into<String>) -> Self {
        Self::new(invocation_id, CompletionOutcome::Empty)
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn outcome(&self) -> &CompletionOutcome {
        &self.outcome
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CompletionOutcome::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            CompletionOutcome::Result(v) => Some(v),
            _ => None,
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

// ---------------------------------------------------------------------------
// CancelInvocation
// ---------------------------------------------------------------------------

/// Asks the other side to stop a streaming invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CancelInvocationMessage {
    invocation_id: String,
    headers: Headers,
}

impl CancelInvocationMessage {
    pub fn new(invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            headers: Headers::new(),
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

// ---------------------------------------------------------------------------
// HubMessage
// ---------------------------------------------------------------------------

/// Any message exchanged between hub client and server.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    StreamItem(StreamItemMessage),
    Completion(CompletionMessage),
    /// A streaming call. Always carries an invocation id.
    StreamInvocation(InvocationMessage),
    CancelInvocation(CancelInvocationMessage),
    /// Keep-alive. Carries nothing.
    Ping,
}

impl HubMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Invocation(_) => MessageType::Invocation,
            Self::StreamItem(_) => MessageType::StreamItem,
            Self::Completion(_) => MessageType::Completion,
            Self::StreamInvocation(_) => MessageType::StreamInvocation,
            Self::CancelInvocation(_) => MessageType::CancelInvocation,
            Self::Ping => MessageType::Ping,
        }
    }

    /// The invocation id, for the variants that have one.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::Invocation(m) | Self::StreamInvocation(m) => m.invocation_id(),
            Self::StreamItem(m) => Some(m.invocation_id()),
            Self::Completion(m) => Some(m.invocation_id()),
            Self::CancelInvocation(m) => Some(m.invocation_id()),
            Self::Ping => None,
        }
    }

    /// Headers, for the variants that carry them.
    pub fn headers(&self) -> Option<&Headers> {
        match self {
            Self::Invocation(m) | Self::StreamInvocation(m) => Some(m.headers()),
            Self::StreamItem(m) => Some(m.headers()),
            Self::Completion(m) => Some(m.headers()),
            Self::CancelInvocation(m) => Some(m.headers()),
            Self::Ping => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_type_from_code_round_trips_known_codes() {
        for code in 1..=6 {
            let ty = MessageType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(MessageType::from_code(0), None);
        assert_eq!(MessageType::from_code(9), None);
    }

    #[test]
    fn test_invocation_arguments_returns_stored_binding_error() {
        let message = InvocationMessage::with_binding_error(
            Some("42".into()),
            "foo",
            BindingError::TypeMismatch,
        );
        assert_eq!(message.invocation_id(), Some("42"));
        assert_eq!(message.target(), "foo");
        assert_eq!(message.arguments(), Err(BindingError::TypeMismatch));
        // Reading twice reports the same failure.
        assert_eq!(message.arguments(), Err(BindingError::TypeMismatch));
    }

    #[test]
    fn test_invocation_arguments_returns_bound_values() {
        let message = InvocationMessage::new(None, "Target", vec![json!(1), json!("Foo")]);
        assert_eq!(message.arguments().unwrap(), &[json!(1), json!("Foo")]);
        assert_eq!(message.invocation_id(), None);
    }

    #[test]
    fn test_completion_accessors_match_outcome() {
        let done = CompletionMessage::with_result("1", json!(true));
        assert_eq!(done.result(), Some(&json!(true)));
        assert_eq!(done.error(), None);

        let failed = CompletionMessage::with_error("2", "Whoops!");
        assert_eq!(failed.error(), Some("Whoops!"));
        assert_eq!(failed.result(), None);

        let empty = CompletionMessage::empty("3");
        assert_eq!(empty.outcome(), &CompletionOutcome::Empty);
    }

    #[test]
    fn test_hub_message_invocation_id_and_headers_per_variant() {
        let mut headers = Headers::new();
        headers.insert("Foo".into(), "Bar".into());

        let cancel = HubMessage::CancelInvocation(
            CancelInvocationMessage::new("7").with_headers(headers.clone()),
        );
        assert_eq!(cancel.invocation_id(), Some("7"));
        assert_eq!(cancel.headers(), Some(&headers));
        assert_eq!(cancel.message_type(), MessageType::CancelInvocation);

        assert_eq!(HubMessage::Ping.invocation_id(), None);
        assert_eq!(HubMessage::Ping.headers(), None);
    }
}

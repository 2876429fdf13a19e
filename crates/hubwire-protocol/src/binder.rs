//! Argument binding: converting positional JSON values to the parameter
//! types a hub method declares.
//!
//! The protocol does not know what methods exist. It asks an
//! [`InvocationBinder`] for the parameter list of each target and converts
//! the incoming values to match. A failure is *not* a decode error: it is
//! stored on the message so the caller can still answer the invocation
//! with an error completion.

use std::collections::HashMap;

use serde_json::{Number, Value};

/// Failures attached to an invocation whose arguments did not bind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("Invocation provides {provided} argument(s) but target expects {expected}.")]
    CountMismatch { provided: usize, expected: usize },

    #[error(
        "Error binding arguments. Make sure that the types of the provided values match the types of the hub method being invoked."
    )]
    TypeMismatch,

    #[error("Unknown hub method '{0}'.")]
    UnknownTarget(String),
}

/// The shape a parameter (or a return value) must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterType {
    /// Accepts any value, including `null`.
    #[default]
    Any,
    Bool,
    /// Whole numbers. Floats with no fractional part are accepted and
    /// normalised to integers.
    Integer,
    /// Any number.
    Float,
    /// A string or `null`.
    String,
    /// An array or `null`.
    Array,
    /// An object or `null`.
    Object,
}

impl ParameterType {
    /// Converts `value` to this type.
    pub fn coerce(self, value: Value) -> Result<Value, BindingError> {
        match (self, value) {
            (Self::Any, value) => Ok(value),
            (Self::Bool, value @ Value::Bool(_)) => Ok(value),
            (Self::Integer, Value::Number(n)) => integral(&n).ok_or(BindingError::TypeMismatch),
            (Self::Float, Value::Number(n)) => n
                .as_f64()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or(BindingError::TypeMismatch),
            (Self::String, value @ (Value::String(_) | Value::Null)) => Ok(value),
            (Self::Array, value @ (Value::Array(_) | Value::Null)) => Ok(value),
            (Self::Object, value @ (Value::Object(_) | Value::Null)) => Ok(value),
            _ => Err(BindingError::TypeMismatch),
        }
    }
}

fn integral(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        return Some(Value::Number(n.clone()));
    }
    let f = n.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}

/// Converts `values` positionally to `types`.
pub fn bind_arguments(
    values: Vec<Value>,
    types: &[ParameterType],
) -> Result<Vec<Value>, BindingError> {
    if values.len() != types.len() {
        return Err(BindingError::CountMismatch {
            provided: values.len(),
            expected: types.len(),
        });
    }
    values
        .into_iter()
        .zip(types)
        .map(|(value, ty)| ty.coerce(value))
        .collect()
}

/// Resolves hub method signatures for the protocol.
///
/// Implemented by whatever dispatches invocations. The protocol calls it
/// while decoding, so it must be cheap and must not block.
pub trait InvocationBinder: Send + Sync {
    /// Parameter types of `target`, or `None` if no such method exists.
    fn parameter_types(&self, target: &str) -> Option<&[ParameterType]>;

    /// Expected type of results and stream items for `invocation_id`.
    fn return_type(&self, _invocation_id: &str) -> ParameterType {
        ParameterType::Any
    }
}

/// A binder backed by a fixed table of method signatures.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Vec<ParameterType>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a method.
    pub fn with_method(
        mut self,
        target: impl Into<String>,
        parameters: impl Into<Vec<ParameterType>>,
    ) -> Self {
        self.methods.insert(target.into(), parameters.into());
        self
    }

    pub fn contains(&self, target: &str) -> bool {
        self.methods.contains_key(target)
    }
}

impl InvocationBinder for MethodTable {
    fn parameter_types(&self, target: &str) -> Option<&[ParameterType]> {
        self.methods.get(target).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_coerce_integer_accepts_whole_float() {
        assert_eq!(ParameterType::Integer.coerce(json!(2.0)), Ok(json!(2)));
        assert_eq!(ParameterType::Integer.coerce(json!(7)), Ok(json!(7)));
    }

    #[test]
    fn test_coerce_integer_rejects_fraction_string_and_null() {
        assert_eq!(
            ParameterType::Integer.coerce(json!(2.5)),
            Err(BindingError::TypeMismatch)
        );
        assert_eq!(
            ParameterType::Integer.coerce(json!("42")),
            Err(BindingError::TypeMismatch)
        );
        assert_eq!(
            ParameterType::Integer.coerce(Value::Null),
            Err(BindingError::TypeMismatch)
        );
    }

    #[test]
    fn test_coerce_float_normalises_integers() {
        assert_eq!(ParameterType::Float.coerce(json!(1)), Ok(json!(1.0)));
    }

    #[test]
    fn test_coerce_reference_types_accept_null() {
        assert_eq!(ParameterType::String.coerce(Value::Null), Ok(Value::Null));
        assert_eq!(ParameterType::Array.coerce(Value::Null), Ok(Value::Null));
        assert_eq!(ParameterType::Object.coerce(Value::Null), Ok(Value::Null));
        assert_eq!(
            ParameterType::Bool.coerce(Value::Null),
            Err(BindingError::TypeMismatch)
        );
    }

    #[test]
    fn test_bind_arguments_count_mismatch_message() {
        let err = bind_arguments(vec![], &[ParameterType::Integer, ParameterType::String])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invocation provides 0 argument(s) but target expects 2."
        );
    }

    #[test]
    fn test_bind_arguments_type_mismatch_message() {
        let err = bind_arguments(
            vec![json!("abc"), json!("xyz")],
            &[ParameterType::Integer, ParameterType::String],
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error binding arguments. Make sure that the types of the provided values match the types of the hub method being invoked."
        );
    }

    #[test]
    fn test_bind_arguments_success_preserves_order() {
        let bound = bind_arguments(
            vec![json!(1), json!("Foo"), json!(2.0)],
            &[ParameterType::Integer, ParameterType::String, ParameterType::Float],
        )
        .unwrap();
        assert_eq!(bound, vec![json!(1), json!("Foo"), json!(2.0)]);
    }

    #[test]
    fn test_method_table_resolves_registered_methods() {
        let table = MethodTable::new().with_method("Send", [ParameterType::String]);
        assert_eq!(table.parameter_types("Send"), Some(&[ParameterType::String][..]));
        assert_eq!(table.parameter_types("Missing"), None);
        assert_eq!(table.return_type("1"), ParameterType::Any);
    }
}

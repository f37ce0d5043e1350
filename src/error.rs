//! Error types for the deferred runtime

use crate::runtime::{ErrorValue, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error kinds carried by error values and rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// TypeError - wrong type for operation, or a deferred value settled with itself
    TypeError,
    /// Generic Error - user-raised failures
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::GenericError => write!(f, "Error"),
        }
    }
}

/// Errors raised by the resolution procedure, by user callbacks and by configuration
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Runtime error with a kind (TypeError, Error)
    #[error("{kind}: {message}")]
    RuntimeError { kind: ErrorKind, message: String },

    /// A value thrown by user code (executor, handler, getter or thenable)
    #[error("Uncaught {0}")]
    Thrown(Value),

    /// Invalid event loop configuration
    #[error("ConfigError: {0}")]
    ConfigError(String),
}

impl Error {
    /// Create a TypeError
    pub fn type_error(message: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind: ErrorKind::TypeError,
            message: message.into(),
        }
    }

    /// Create a generic Error
    pub fn generic(message: impl Into<String>) -> Self {
        Error::RuntimeError {
            kind: ErrorKind::GenericError,
            message: message.into(),
        }
    }

    /// Throw an arbitrary value
    pub fn throw(value: impl Into<Value>) -> Self {
        Error::Thrown(value.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::ConfigError(message.into())
    }

    /// Convert this error into the value a deferred value is rejected with.
    ///
    /// A thrown value is stored as-is; every other error becomes an error value
    /// carrying its kind and message.
    pub fn into_value(self) -> Value {
        match self {
            Error::Thrown(value) => value,
            Error::RuntimeError { kind, message } => Value::Error(ErrorValue::new(kind, message)),
            Error::ConfigError(message) => {
                Value::Error(ErrorValue::new(ErrorKind::GenericError, message))
            }
        }
    }
}

impl From<Error> for Value {
    fn from(err: Error) -> Self {
        err.into_value()
    }
}

/// Result type alias for the deferred runtime
pub type Result<T> = std::result::Result<T, Error>;

/// Standardized error message templates
pub mod messages {
    pub const SELF_RESOLUTION: &str = "Cannot settle a deferred value with itself";
    pub const CHAINING_CYCLE: &str = "Chaining cycle detected for deferred value";
    pub const CANNOT_READ_PROPERTY: &str = "Cannot read property";
    pub const NOT_A_FUNCTION: &str = "is not a function";

    /// Format a "Cannot read property 'X' of Y" error message
    pub fn cannot_read_property(prop: &str, of: &str) -> String {
        format!("{} '{}' of {}", CANNOT_READ_PROPERTY, prop, of)
    }

    /// Format a "X is not a function" error message
    pub fn not_a_function(name: &str) -> String {
        format!("'{}' {}", name, NOT_A_FUNCTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_display() {
        let err = Error::type_error(messages::SELF_RESOLUTION);
        assert_eq!(
            err.to_string(),
            "TypeError: Cannot settle a deferred value with itself"
        );
    }

    #[test]
    fn test_thrown_value_unwraps_into_reason() {
        let err = Error::throw("boom");
        assert_eq!(err.into_value(), Value::from("boom"));
    }

    #[test]
    fn test_runtime_error_becomes_error_value() {
        let reason = Error::generic("nope").into_value();
        match reason {
            Value::Error(e) => {
                assert_eq!(e.kind, ErrorKind::GenericError);
                assert_eq!(e.message, "nope");
            }
            other => panic!("Expected error value, got {:?}", other),
        }
    }

    #[test]
    fn test_message_helpers() {
        assert_eq!(
            messages::cannot_read_property("then", "undefined"),
            "Cannot read property 'then' of undefined"
        );
        assert_eq!(messages::not_a_function("then"), "'then' is not a function");
    }
}

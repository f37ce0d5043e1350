//! Runtime value model
//!
//! Payloads of deferred values are dynamic: a deferred value may be settled
//! with a number, a record, a callable, an error value or another deferred
//! value, and the resolution procedure inspects them for a `then` member.

pub mod value;

pub use value::{arg, ErrorValue, Function, NativeFn, Object, Property, Value};

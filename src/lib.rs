//! Deferred: single-threaded deferred values driven by an event loop
//!
//! A deferred value stands for a computation that eventually settles into a
//! fulfillment value or a rejection reason. Handlers registered with
//! [`Deferred::then`] always run on a later turn of the [`EventLoop`], and
//! every `then` returns a new deferred value, so results and failures flow
//! through chains of transformations.
//!
//! # Quick Start
//!
//! ```
//! use deferred::{Deferred, EventLoop, Value};
//!
//! let event_loop = EventLoop::new();
//! let timers = event_loop.clone();
//! let greeting = Deferred::new(&event_loop, move |resolver| {
//!     timers.set_timeout(50, move || resolver.resolve("hello"));
//!     Ok(())
//! })
//! .and_then(|v| Ok(Value::from(format!("{}, world", v))))
//! .catch(|_| Ok(Value::from("unreachable")));
//!
//! event_loop.run_to_completion();
//! assert_eq!(greeting.settlement(), Some(Ok(Value::from("hello, world"))));
//! ```
//!
//! # Module Overview
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`deferred`] | settlement core, resolver, resolution procedure, handler dispatch |
//! | [`event_loop`] | microtask queue, virtual-time timers, unhandled rejection reports |
//! | [`runtime`] | the dynamic [`Value`] carried by deferred values |
//! | [`demo`] | a simulated API call walked through a handler chain |
// Clippy configuration.
//
// - type_complexity: handler and native function signatures box closures
//   returning Result<Value>
// - new_without_default: Transcript and friends have explicit constructors
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

pub mod deferred;
pub mod demo;
pub mod event_loop;
pub mod prelude;
pub mod runtime;

mod error;

pub use deferred::{Callback, Deferred, DeferredState, Resolver};
pub use error::{messages, Error, ErrorKind, Result};
pub use event_loop::{
    EventLoop, EventLoopConfig, EventLoopStats, Microtask, RunResult, Scheduler, TimerId,
    UnhandledRejection,
};
pub use runtime::{ErrorValue, Function, Object, Value};

/// Deferred version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Prelude module for convenient imports
//!
//! ```
//! use deferred::prelude::*;
//!
//! let event_loop = EventLoop::new();
//! let d = Deferred::resolved(&event_loop, 1).and_then(|v| Ok(v));
//! event_loop.run_to_completion();
//! assert_eq!(d.state(), DeferredState::Fulfilled);
//! ```

// Deferred values
pub use crate::deferred::{Callback, Deferred, DeferredState, Resolver};

// Scheduling
pub use crate::event_loop::{EventLoop, EventLoopConfig, Scheduler};

// Values and errors
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::runtime::{Function, Value};

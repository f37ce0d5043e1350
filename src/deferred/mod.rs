//! Deferred value implementation
//!
//! A [`Deferred`] represents a computation that eventually settles into a
//! fulfillment value or a rejection reason. It is built from four parts:
//!
//! - the settlement core (this module): state, payload and the queue of
//!   handler records waiting for settlement
//! - the [`Resolver`]: the pair of settle callbacks handed to an executor,
//!   sharing one exactly-once guard
//! - the resolution procedure (`resolution`): self-reference rejection,
//!   `then` probing and recursive adoption of thenables
//! - the dispatcher (`dispatch`): runs handler records on a later scheduler
//!   turn and settles their downstream deferred values
//!
//! # Examples
//!
//! ```
//! use deferred::{Deferred, EventLoop, Value};
//!
//! let event_loop = EventLoop::new();
//! let doubled = Deferred::new(&event_loop, |resolver| {
//!     resolver.resolve(21);
//!     Ok(())
//! })
//! .and_then(|v| Ok(Value::Number(v.as_number().unwrap_or(0.0) * 2.0)));
//!
//! assert!(doubled.is_pending());
//! event_loop.run_to_completion();
//! assert_eq!(doubled.settlement(), Some(Ok(Value::from(42))));
//! ```

mod dispatch;
mod resolution;
mod resolver;

pub use dispatch::Callback;
pub use resolver::Resolver;

use crate::error::Result;
use crate::event_loop::Scheduler;
use crate::runtime::{arg, Function, Value};
use dispatch::HandlerRecord;
use serde::Serialize;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// ID counter for deferred value tracking in logs and rejection reports
static DEFERRED_ID: AtomicU64 = AtomicU64::new(1);

/// The state of a deferred value.
///
/// Once settled (Fulfilled or Rejected), a deferred value never changes state.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub enum DeferredState {
    /// Not yet settled
    Pending,
    /// Settled with a value
    Fulfilled,
    /// Settled with a reason
    Rejected,
}

/// Settlement core shared by every handle to one deferred value
pub(crate) struct Core {
    id: u64,
    state: DeferredState,
    /// Fulfillment value or rejection reason; set exactly once
    payload: Option<Value>,
    /// Handler records waiting for settlement, in attachment order
    queue: Vec<HandlerRecord>,
    /// Generation of the live resolver; older resolvers are ignored
    resolver_epoch: u64,
    /// Whether the live resolver has already been used
    resolver_spent: bool,
    /// Whether a handler record was ever registered against this value
    handled: bool,
}

/// A deferred value.
///
/// Handles are cheap to clone and all refer to the same settlement core.
/// Deferred values are single-threaded: they are driven by the scheduler they
/// were created on, through a handle that does not keep that scheduler alive.
#[derive(Clone)]
pub struct Deferred {
    core: Rc<RefCell<Core>>,
    scheduler: Rc<dyn Scheduler>,
}

impl Deferred {
    /// Creates a deferred value and runs `executor` synchronously with its resolver.
    ///
    /// If the executor returns an error, the error becomes the rejection reason,
    /// unless the executor already settled the value.
    pub fn new<S, F>(scheduler: &S, executor: F) -> Self
    where
        S: Scheduler + ?Sized,
        F: FnOnce(Resolver) -> Result<()>,
    {
        let deferred = Self::pending_on(scheduler.handle());
        deferred.run_executor(executor);
        deferred
    }

    /// Creates a pending deferred value together with its resolver.
    pub fn with_resolvers<S>(scheduler: &S) -> (Self, Resolver)
    where
        S: Scheduler + ?Sized,
    {
        let deferred = Self::pending_on(scheduler.handle());
        let resolver = Resolver::issue(&deferred);
        (deferred, resolver)
    }

    /// Creates a deferred value resolved with `value`.
    ///
    /// The value goes through the resolution procedure, so a thenable is adopted.
    pub fn resolved<S>(scheduler: &S, value: impl Into<Value>) -> Self
    where
        S: Scheduler + ?Sized,
    {
        let value = value.into();
        Self::new(scheduler, move |resolver| {
            resolver.resolve(value);
            Ok(())
        })
    }

    /// Creates a deferred value rejected with `reason`.
    pub fn rejected<S>(scheduler: &S, reason: impl Into<Value>) -> Self
    where
        S: Scheduler + ?Sized,
    {
        let reason = reason.into();
        Self::new(scheduler, move |resolver| {
            resolver.reject(reason);
            Ok(())
        })
    }

    pub(crate) fn pending_on(scheduler: Rc<dyn Scheduler>) -> Self {
        let id = DEFERRED_ID.fetch_add(1, Ordering::SeqCst);
        scheduler.record_creation();
        Self {
            core: Rc::new(RefCell::new(Core {
                id,
                state: DeferredState::Pending,
                payload: None,
                queue: Vec::new(),
                resolver_epoch: 0,
                resolver_spent: false,
                handled: false,
            })),
            scheduler,
        }
    }

    fn run_executor<F>(&self, executor: F)
    where
        F: FnOnce(Resolver) -> Result<()>,
    {
        let resolver = Resolver::issue(self);
        if let Err(err) = executor(resolver.clone()) {
            tracing::debug!(id = self.id(), error = %err, "executor failed");
            resolver.reject(err.into_value());
        }
    }

    /// Registers handlers and returns the downstream deferred value they feed.
    ///
    /// The returned value is always pending when this returns; handlers run on
    /// a later scheduler turn, even if this value is already settled. A missing
    /// handler passes the payload through to the downstream value unchanged.
    pub fn then(&self, on_fulfilled: Option<Callback>, on_rejected: Option<Callback>) -> Deferred {
        let downstream = Deferred::pending_on(Rc::clone(&self.scheduler));
        dispatch::handle(
            self,
            HandlerRecord {
                on_fulfilled,
                on_rejected,
                downstream: downstream.clone(),
            },
        );
        downstream
    }

    /// Registers a fulfillment handler only; rejections pass through.
    pub fn and_then<F>(&self, on_fulfilled: F) -> Deferred
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.then(Some(Callback::new(on_fulfilled)), None)
    }

    /// Registers a rejection handler only; equivalent to `then(None, Some(on_rejected))`.
    pub fn catch<F>(&self, on_rejected: F) -> Deferred
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        self.then(None, Some(Callback::new(on_rejected)))
    }

    pub fn id(&self) -> u64 {
        self.core.borrow().id
    }

    /// Current state, following adopted deferred values to their origin.
    pub fn state(&self) -> DeferredState {
        let origin = self.innermost();
        let state = origin.core.borrow().state;
        state
    }

    pub fn is_pending(&self) -> bool {
        self.state() == DeferredState::Pending
    }

    /// `Ok(value)` once fulfilled, `Err(reason)` once rejected, `None` while pending.
    pub fn settlement(&self) -> Option<std::result::Result<Value, Value>> {
        let origin = self.innermost();
        let core = origin.core.borrow();
        let payload = core.payload.clone().unwrap_or(Value::Undefined);
        match core.state {
            DeferredState::Pending => None,
            DeferredState::Fulfilled => Some(Ok(payload)),
            DeferredState::Rejected => Some(Err(payload)),
        }
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Rc::ptr_eq(&self.core, &other.core)
    }

    pub(crate) fn is_handled(&self) -> bool {
        self.core.borrow().handled
    }

    /// Follows the payload while it is itself a deferred value and the state is
    /// not rejected, returning the deferred value at the end of the chain.
    pub(crate) fn innermost(&self) -> Deferred {
        let mut current = self.clone();
        loop {
            let next = {
                let core = current.core.borrow();
                match &core.payload {
                    Some(Value::Deferred(inner)) if core.state != DeferredState::Rejected => {
                        inner.clone()
                    }
                    _ => break,
                }
            };
            current = next;
        }
        current
    }

    /// `then` as a callable member, so foreign code can treat this value as a thenable.
    pub(crate) fn then_function(&self) -> Function {
        let source = self.clone();
        Function::new("then", move |_this, args| {
            let on_fulfilled = Callback::from_value(&arg(args, 0));
            let on_rejected = Callback::from_value(&arg(args, 1));
            Ok(Value::Deferred(source.then(on_fulfilled, on_rejected)))
        })
    }

    /// `catch` as a callable member.
    pub(crate) fn catch_function(&self) -> Function {
        let source = self.clone();
        Function::new("catch", move |_this, args| {
            let on_rejected = Callback::from_value(&arg(args, 0));
            Ok(Value::Deferred(source.then(None, on_rejected)))
        })
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core.try_borrow() {
            Ok(core) => write!(f, "Deferred {{ id: {}, state: {:?} }}", core.id, core.state),
            Err(_) => write!(f, "Deferred {{ ... }}"),
        }
    }
}

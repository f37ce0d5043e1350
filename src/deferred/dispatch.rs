//! Handler registration and dispatch.

use super::{resolution, Deferred, DeferredState};
use crate::error::Result;
use crate::event_loop::Microtask;
use crate::runtime::Value;
use std::fmt;
use std::rc::Rc;

/// A handler registered with [`Deferred::then`].
///
/// Returning `Ok` fulfills the downstream deferred value (adopting a returned
/// thenable); returning `Err` rejects it.
pub struct Callback {
    callback: Box<dyn FnOnce(Value) -> Result<Value>>,
}

impl Callback {
    /// Creates a new Callback from a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce(Value) -> Result<Value> + 'static,
    {
        Self {
            callback: Box::new(f),
        }
    }

    /// Wraps a callable value; anything that is not callable yields `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let func = value.as_function()?.clone();
        Some(Self::new(move |v| func.call(&Value::Undefined, &[v])))
    }

    fn invoke(self, value: Value) -> Result<Value> {
        (self.callback)(value)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback {{ ... }}")
    }
}

/// Callbacks registered by one `then` call plus the deferred value they feed
#[derive(Debug)]
pub(crate) struct HandlerRecord {
    pub on_fulfilled: Option<Callback>,
    pub on_rejected: Option<Callback>,
    pub downstream: Deferred,
}

/// Queue `record` on the innermost deferred value reachable from `source`, or
/// schedule it if that value is already settled.
pub(crate) fn handle(source: &Deferred, record: HandlerRecord) {
    let origin = source.innermost();
    {
        let mut core = origin.core.borrow_mut();
        core.handled = true;
        if core.state == DeferredState::Pending {
            tracing::trace!(
                id = core.id,
                downstream = record.downstream.id(),
                "queued handler"
            );
            core.queue.push(record);
            return;
        }
    }

    let scheduler = Rc::clone(&origin.scheduler);
    scheduler.schedule(Microtask::new(move || dispatch(&origin, record)));
}

/// Run one handler record against its settled source.
fn dispatch(source: &Deferred, record: HandlerRecord) {
    let (state, payload) = {
        let core = source.core.borrow();
        (core.state, core.payload.clone().unwrap_or(Value::Undefined))
    };

    let HandlerRecord {
        on_fulfilled,
        on_rejected,
        downstream,
    } = record;
    tracing::trace!(id = source.id(), downstream = downstream.id(), ?state, "dispatching handler");

    let callback = match state {
        DeferredState::Fulfilled => on_fulfilled,
        DeferredState::Rejected => on_rejected,
        DeferredState::Pending => {
            return handle(
                source,
                HandlerRecord {
                    on_fulfilled,
                    on_rejected,
                    downstream,
                },
            )
        }
    };

    match callback {
        None if state == DeferredState::Fulfilled => resolution::fulfill(&downstream, payload),
        None => resolution::reject(&downstream, payload),
        Some(callback) => match callback.invoke(payload) {
            Ok(value) => resolution::fulfill(&downstream, value),
            Err(err) => {
                tracing::debug!(downstream = downstream.id(), error = %err, "handler failed");
                resolution::reject(&downstream, err.into_value())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::event_loop::EventLoop;
    use crate::runtime::Function;
    use std::cell::RefCell;

    #[test]
    fn test_callback_from_non_callable_is_none() {
        assert!(Callback::from_value(&Value::from(1)).is_none());
        assert!(Callback::from_value(&Value::Undefined).is_none());
    }

    #[test]
    fn test_callback_from_function() {
        let double = Function::new("double", |_, args| {
            Ok(Value::Number(args[0].as_number().unwrap_or(0.0) * 2.0))
        });
        let callback = Callback::from_value(&Value::Function(double)).unwrap();
        assert_eq!(callback.invoke(Value::from(4)).unwrap(), Value::from(8));
    }

    #[test]
    fn test_pending_source_queues_record() {
        let el = EventLoop::new();
        let (d, _resolver) = Deferred::with_resolvers(&el);
        let _a = d.and_then(Ok);
        let _b = d.catch(Ok);
        assert_eq!(d.core.borrow().queue.len(), 2);
        assert!(d.is_handled());
        assert!(!el.has_pending_microtasks());
    }

    #[test]
    fn test_settled_source_schedules_dispatch() {
        let el = EventLoop::new();
        let d = Deferred::resolved(&el, 1);
        let next = d.and_then(Ok);
        assert!(el.has_pending_microtasks());
        assert!(d.core.borrow().queue.is_empty());
        assert!(next.is_pending());
    }

    #[test]
    fn test_settlement_drains_queue() {
        let el = EventLoop::new();
        let (d, resolver) = Deferred::with_resolvers(&el);
        let _next = d.and_then(Ok);
        resolver.resolve(1);
        assert!(d.core.borrow().queue.is_empty());
        assert!(el.has_pending_microtasks());
    }

    #[test]
    fn test_handler_error_rejects_downstream() {
        let el = EventLoop::new();
        let next = Deferred::resolved(&el, 1).and_then(|_| Err(Error::throw("boom")));
        el.run_microtasks();
        assert_eq!(next.settlement(), Some(Err(Value::from("boom"))));
    }

    #[test]
    fn test_handler_sees_payload() {
        let el = EventLoop::new();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        Deferred::rejected(&el, "why").catch(move |reason| {
            *sink.borrow_mut() = Some(reason);
            Ok(Value::Undefined)
        });
        el.run_microtasks();
        assert_eq!(*seen.borrow(), Some(Value::from("why")));
    }
}

//! Resolution procedure: moves a deferred value out of `Pending`.

use super::{dispatch, Deferred, DeferredState, Resolver};
use crate::error::{messages, Error, Result};
use crate::runtime::{Function, Value};

/// The `then` capability found on a candidate value
enum Then {
    /// A deferred value of this kind; its state is adopted directly
    Native(Deferred),
    /// A callable `then` member of a foreign record or callable
    Foreign(Function),
}

/// Resolve `target` with `value`.
///
/// Self-resolution and adoption cycles reject with a TypeError. Thenables are
/// followed; anything else fulfills `target`.
pub(crate) fn fulfill(target: &Deferred, value: Value) {
    if let Value::Deferred(candidate) = &value {
        if candidate.ptr_eq(target) {
            return reject(target, Error::type_error(messages::SELF_RESOLUTION).into_value());
        }
    }

    match probe_then(&value) {
        Err(err) => {
            tracing::debug!(id = target.id(), error = %err, "then probe failed");
            reject(target, err.into_value())
        }
        Ok(Some(Then::Native(inner))) => adopt(target, inner),
        Ok(Some(Then::Foreign(then))) => follow_thenable(target, value, then),
        Ok(None) => settle(target, DeferredState::Fulfilled, value),
    }
}

/// Reject `target` with `reason`. Rejection reasons are never unwrapped.
pub(crate) fn reject(target: &Deferred, reason: Value) {
    settle(target, DeferredState::Rejected, reason)
}

/// Reads the `then` member of records and callables.
fn probe_then(value: &Value) -> Result<Option<Then>> {
    match value {
        Value::Deferred(inner) => Ok(Some(Then::Native(inner.clone()))),
        v if v.is_object_like() => match v.get("then")? {
            Value::Function(then) => Ok(Some(Then::Foreign(then))),
            _ => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Fulfill `target` with another deferred value of this kind.
///
/// Handlers registered on `target` are forwarded to the end of the adoption
/// chain, so `target` takes on `inner`'s eventual outcome.
fn adopt(target: &Deferred, inner: Deferred) {
    if leads_to(&inner, target) {
        return reject(target, Error::type_error(messages::CHAINING_CYCLE).into_value());
    }
    tracing::debug!(id = target.id(), adopted = inner.id(), "adopting deferred value");
    settle(target, DeferredState::Fulfilled, Value::Deferred(inner))
}

/// Whether following `from`'s adoption chain reaches `target`
fn leads_to(from: &Deferred, target: &Deferred) -> bool {
    let mut current = from.clone();
    loop {
        if current.ptr_eq(target) {
            return true;
        }
        let next = {
            let core = current.core.borrow();
            match &core.payload {
                Some(Value::Deferred(inner)) if core.state != DeferredState::Rejected => {
                    inner.clone()
                }
                _ => return false,
            }
        };
        current = next;
    }
}

/// Invoke a foreign `then` with `value` as receiver and a fresh resolver for `target`.
fn follow_thenable(target: &Deferred, value: Value, then: Function) {
    tracing::debug!(id = target.id(), then = then.name(), "following thenable");
    let resolver = Resolver::issue(target);
    let (resolve, reject) = resolver.clone().into_functions();
    if let Err(err) = then.call(&value, &[Value::Function(resolve), Value::Function(reject)]) {
        tracing::debug!(id = target.id(), error = %err, "thenable failed");
        resolver.reject(err.into_value());
    }
}

/// Record the outcome and hand every queued handler record to the dispatcher.
fn settle(target: &Deferred, state: DeferredState, payload: Value) {
    let (queue, handled) = {
        let mut core = target.core.borrow_mut();
        if core.state != DeferredState::Pending {
            tracing::trace!(id = core.id, "ignoring settle of settled deferred value");
            return;
        }
        core.state = state;
        core.payload = Some(payload);
        (std::mem::take(&mut core.queue), core.handled)
    };

    tracing::trace!(id = target.id(), ?state, handlers = queue.len(), "settled");
    target.scheduler.record_settlement(state);
    if state == DeferredState::Rejected && !handled {
        target.scheduler.track_rejection(target);
    }

    for record in queue {
        dispatch::handle(target, record);
    }
}

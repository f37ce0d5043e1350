//! Settle callbacks with a shared exactly-once guard.

use super::{resolution, Deferred};
use crate::runtime::{arg, Function, Value};

/// The settle callbacks handed to an executor or to a thenable's `then`.
///
/// `resolve` and `reject` share one guard: the first call to either wins and
/// every later call, on this resolver or any clone of it, is ignored. The guard
/// lives in the deferred value's core. Issuing a new resolver for the same
/// deferred value (when it starts following a thenable) retires older ones.
#[derive(Clone)]
pub struct Resolver {
    target: Deferred,
    epoch: u64,
}

impl Resolver {
    pub(crate) fn issue(target: &Deferred) -> Self {
        let mut core = target.core.borrow_mut();
        core.resolver_epoch += 1;
        core.resolver_spent = false;
        Self {
            target: target.clone(),
            epoch: core.resolver_epoch,
        }
    }

    /// Resolves the target with `value`, adopting it if it is a thenable.
    pub fn resolve(&self, value: impl Into<Value>) {
        if self.claim() {
            resolution::fulfill(&self.target, value.into());
        }
    }

    /// Rejects the target with `reason`, stored as-is.
    pub fn reject(&self, reason: impl Into<Value>) {
        if self.claim() {
            resolution::reject(&self.target, reason.into());
        }
    }

    /// Whether this resolver can no longer settle its target
    pub fn is_spent(&self) -> bool {
        let core = self.target.core.borrow();
        core.resolver_epoch != self.epoch || core.resolver_spent
    }

    /// Splits the resolver into `resolve` and `reject` functions sharing its guard.
    pub fn into_functions(self) -> (Function, Function) {
        let resolver = self.clone();
        let resolve = Function::new("resolve", move |_this, args| {
            resolver.resolve(arg(args, 0));
            Ok(Value::Undefined)
        });
        let reject = Function::new("reject", move |_this, args| {
            self.reject(arg(args, 0));
            Ok(Value::Undefined)
        });
        (resolve, reject)
    }

    fn claim(&self) -> bool {
        let mut core = self.target.core.borrow_mut();
        if core.resolver_epoch != self.epoch || core.resolver_spent {
            tracing::trace!(id = core.id, "ignoring settle call on spent resolver");
            return false;
        }
        core.resolver_spent = true;
        true
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("target", &self.target)
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::DeferredState;
    use crate::event_loop::EventLoop;

    #[test]
    fn test_first_call_wins() {
        let el = EventLoop::new();
        let (d, resolver) = Deferred::with_resolvers(&el);
        resolver.resolve(1);
        resolver.resolve(2);
        resolver.reject("e");
        assert_eq!(d.settlement(), Some(Ok(Value::from(1))));
        assert!(resolver.is_spent());
    }

    #[test]
    fn test_clones_share_the_guard() {
        let el = EventLoop::new();
        let (d, resolver) = Deferred::with_resolvers(&el);
        let other = resolver.clone();
        other.reject("first");
        resolver.resolve(2);
        assert_eq!(d.settlement(), Some(Err(Value::from("first"))));
    }

    #[test]
    fn test_reissued_resolver_retires_older_one() {
        let el = EventLoop::new();
        let (d, old) = Deferred::with_resolvers(&el);
        let fresh = Resolver::issue(&d);
        assert!(old.is_spent());
        assert!(!fresh.is_spent());

        old.resolve(1);
        assert_eq!(d.state(), DeferredState::Pending);
        fresh.resolve(2);
        assert_eq!(d.settlement(), Some(Ok(Value::from(2))));
    }

    #[test]
    fn test_function_pair_shares_guard() {
        let el = EventLoop::new();
        let (d, resolver) = Deferred::with_resolvers(&el);
        let (resolve, reject) = resolver.into_functions();
        reject.call(&Value::Undefined, &[Value::from("no")]).unwrap();
        resolve.call(&Value::Undefined, &[Value::from(1)]).unwrap();
        assert_eq!(d.settlement(), Some(Err(Value::from("no"))));
    }

    #[test]
    fn test_missing_argument_resolves_undefined() {
        let el = EventLoop::new();
        let (d, resolver) = Deferred::with_resolvers(&el);
        let (resolve, _) = resolver.into_functions();
        resolve.call(&Value::Undefined, &[]).unwrap();
        assert_eq!(d.settlement(), Some(Ok(Value::Undefined)));
    }
}

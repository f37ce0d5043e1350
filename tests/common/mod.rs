//! Shared test helpers for integration tests

use deferred::{Deferred, EventLoop, Function, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Ordered log of events observed by handlers
#[derive(Clone, Default)]
pub struct Recorder {
    events: Rc<RefCell<Vec<String>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.events.borrow_mut().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }
}

/// Run the loop until idle and return the settlement of `deferred`
#[allow(dead_code)]
pub fn settle(event_loop: &EventLoop, deferred: &Deferred) -> Option<Result<Value, Value>> {
    event_loop.run_to_completion();
    deferred.settlement()
}

/// Add `n` to a numeric value
#[allow(dead_code)]
pub fn add(v: &Value, n: f64) -> Value {
    Value::Number(v.as_number().unwrap_or(f64::NAN) + n)
}

/// A record whose `then` is a foreign callable running `body(this, resolve, reject)`
#[allow(dead_code)]
pub fn thenable<F>(body: F) -> Value
where
    F: Fn(&Value, &Value, &Value) -> deferred::Result<Value> + 'static,
{
    let record = Value::new_object();
    record.set_property(
        "then",
        Value::Function(Function::new("then", move |this, args| {
            let resolve = args.first().cloned().unwrap_or(Value::Undefined);
            let reject = args.get(1).cloned().unwrap_or(Value::Undefined);
            body(this, &resolve, &reject)
        })),
    );
    record
}

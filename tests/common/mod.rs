//! Shared test helpers for integration tests

use std::cell::RefCell;
use std::rc::Rc;

use promissory::{handler, Function, Promise, Runtime, Value};

/// Install a test-writer tracing subscriber (RUST_LOG controls the filter)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A runtime with tracing installed
pub fn runtime() -> Runtime {
    init_tracing();
    Runtime::new()
}

/// Values recorded by a capture handler, in call order
pub type Captured = Rc<RefCell<Vec<Value>>>;

/// A handler that records every value it is called with and returns it
pub fn capture() -> (Option<Function>, Captured) {
    let seen: Captured = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let func = handler(move |value| {
        sink.borrow_mut().push(value.clone());
        Ok(value)
    });
    (func, seen)
}

/// A promise that never settles
#[allow(dead_code)]
pub fn never(runtime: &Runtime) -> Promise {
    runtime.pending().0
}

/// Build an array value from anything convertible
#[allow(dead_code)]
pub fn array<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
    Value::array(items.into_iter().map(Into::into).collect())
}

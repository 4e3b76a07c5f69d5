//! Promise combinators
//!
//! - `Promise::resolve(value)` / `Promise::reject(reason)`
//! - `Promise::all(iterable)`: every input fulfills, in input order
//! - `Promise::all_settled(iterable)`: outcome records, never rejects
//! - `Promise::race(iterable)`: first settlement wins
//! - `Promise::any(iterable)`: first fulfillment wins, or every reason
//!
//! Every input is normalized through [`Promise::resolve`] first, so plain
//! values, foreign thenables and promises are treated alike. Results are
//! ordered by input position, never by completion order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::Promise;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::value::{Function, Value};

impl Promise {
    /// Return `value` unchanged if it is already a promise, otherwise a new
    /// promise resolved with it (adopting it if it is a thenable).
    pub fn resolve(scheduler: &Rc<dyn Scheduler>, value: Value) -> Promise {
        match value {
            Value::Promise(promise) => promise,
            other => Promise::with_executor(scheduler, move |settle| {
                settle.resolve(other);
                Ok(())
            }),
        }
    }

    /// A promise rejected with `reason`
    pub fn reject(scheduler: &Rc<dyn Scheduler>, reason: Value) -> Promise {
        Promise::with_executor(scheduler, move |settle| {
            settle.reject(reason);
            Ok(())
        })
    }

    /// Fulfills with every input's value once all fulfill; rejects with the
    /// first rejection. A non-iterable input rejects the result.
    pub fn all(scheduler: &Rc<dyn Scheduler>, iterable: &Value) -> Promise {
        Promise::with_executor(scheduler, |settle| {
            let items = iterable.iterate()?;
            let total = items.len();
            if total == 0 {
                settle.resolve(Value::array(Vec::new()));
                return Ok(());
            }

            let values = Rc::new(RefCell::new(vec![Value::Undefined; total]));
            let fulfilled = Rc::new(Cell::new(0usize));
            for (index, item) in items.into_iter().enumerate() {
                let values = values.clone();
                let fulfilled = fulfilled.clone();
                let on_complete = settle.clone();
                let on_fulfilled = Function::unary("all", move |value| {
                    values.borrow_mut()[index] = value;
                    fulfilled.set(fulfilled.get() + 1);
                    if fulfilled.get() == total {
                        let collected = values.borrow().clone();
                        on_complete.resolve(Value::array(collected));
                    }
                    Ok(Value::Undefined)
                });
                Promise::resolve(scheduler, item).then(Some(on_fulfilled), Some(settle.reject_fn()));
            }
            Ok(())
        })
    }

    /// Fulfills once every input settled, with `{status, value}` or
    /// `{status, reason}` records in input order.
    ///
    /// The input is iterated before any promise exists, so a non-iterable
    /// input is returned as an error rather than a rejection.
    pub fn all_settled(scheduler: &Rc<dyn Scheduler>, iterable: &Value) -> Result<Promise> {
        let derived = iterable
            .iterate()?
            .into_iter()
            .map(|item| {
                let on_fulfilled = Function::unary("allSettled", |value| {
                    Ok(Value::object([("status", Value::from("fulfilled")), ("value", value)]))
                });
                let on_rejected = Function::unary("allSettled", |reason| {
                    Ok(Value::object([("status", Value::from("rejected")), ("reason", reason)]))
                });
                Value::Promise(Promise::resolve(scheduler, item).then(Some(on_fulfilled), Some(on_rejected)))
            })
            .collect();
        Ok(Promise::all(scheduler, &Value::array(derived)))
    }

    /// Adopts whichever input settles first. An empty input never settles.
    pub fn race(scheduler: &Rc<dyn Scheduler>, iterable: &Value) -> Promise {
        Promise::with_executor(scheduler, |settle| {
            for item in iterable.iterate()? {
                Promise::resolve(scheduler, item)
                    .then(Some(settle.resolve_fn()), Some(settle.reject_fn()));
            }
            Ok(())
        })
    }

    /// Fulfills with the first fulfillment. Rejects with the array of every
    /// reason, in input order, once all inputs rejected; an empty input
    /// rejects right away with an empty array.
    pub fn any(scheduler: &Rc<dyn Scheduler>, iterable: &Value) -> Promise {
        Promise::with_executor(scheduler, |settle| {
            let items = iterable.iterate()?;
            let total = items.len();
            if total == 0 {
                settle.reject(Value::array(Vec::new()));
                return Ok(());
            }

            let reasons = Rc::new(RefCell::new(vec![Value::Undefined; total]));
            let rejected = Rc::new(Cell::new(0usize));
            for (index, item) in items.into_iter().enumerate() {
                let reasons = reasons.clone();
                let rejected = rejected.clone();
                let on_exhausted = settle.clone();
                let on_rejected = Function::unary("any", move |reason| {
                    reasons.borrow_mut()[index] = reason;
                    rejected.set(rejected.get() + 1);
                    if rejected.get() == total {
                        let collected = reasons.borrow().clone();
                        on_exhausted.reject(Value::array(collected));
                    }
                    Ok(Value::Undefined)
                });
                Promise::resolve(scheduler, item).then(Some(settle.resolve_fn()), Some(on_rejected));
            }
            Ok(())
        })
    }
}

//! Promise Implementation
//!
//! A promise starts pending and settles exactly once, either fulfilled with
//! a value or rejected with a reason. Reactions registered through
//! [`Promise::then`] are queued on the promise and, once it is settled,
//! handed one by one to its [`Scheduler`]; they never run synchronously.
//!
//! Resolving a promise with a thenable (anything exposing a callable `then`)
//! subscribes to it instead of fulfilling, so nested thenables unwrap until
//! a plain value or a rejection is reached.
//!
//! Promises are `Rc`-based and confined to one thread. A multi-threaded host
//! would have to guard the state/result/reaction triple as one unit.

pub mod combinators;

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;
use crate::value::{Function, Value};

/// Identifier assigned to every promise, for diagnostics
pub type PromiseId = u64;

/// ID counter for Promise tracking
static PROMISE_ID: AtomicU64 = AtomicU64::new(1);

/// Promise state enum
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseState {
    /// Promise is pending - not yet settled
    Pending,
    /// Promise is fulfilled with a value
    Fulfilled,
    /// Promise is rejected with a reason
    Rejected,
}

/// The `then` capability every awaitable value exposes.
///
/// This protocol, not the concrete type, is what the resolution procedure
/// adopts: [`Promise`], [`Value::Thenable`] and objects with a callable
/// `then` property all participate.
pub trait Thenable {
    /// Subscribe the two callbacks; an `Err` rejects the adopting promise
    fn then(&self, on_fulfilled: Value, on_rejected: Value) -> Result<Value>;
}

/// A `then` registration waiting for its promise to settle
struct Reaction {
    /// The callback to execute; `None` passes the settlement through
    handler: Option<Function>,
    /// The state this reaction fires for
    expected: PromiseState,
    /// Settles the child promise created by `then`
    downstream: ResolvingFunctions,
}

struct PromiseInner {
    state: PromiseState,
    /// The settled value (fulfillment value or rejection reason)
    result: Option<Value>,
    reactions: VecDeque<Reaction>,
    /// Whether any reaction was ever registered (for unhandled rejection tracking)
    handled: bool,
    /// Thenables whose `then` is currently being called on our behalf
    resolution_in_progress: Vec<Value>,
}

struct PromiseCell {
    id: PromiseId,
    scheduler: Rc<dyn Scheduler>,
    inner: RefCell<PromiseInner>,
}

/// Shared handle to a promise
#[derive(Clone)]
pub struct Promise {
    cell: Rc<PromiseCell>,
}

/// The `resolve`/`reject` pair bound to one promise.
///
/// Both entry points are idempotent once the promise has settled.
#[derive(Clone)]
pub struct ResolvingFunctions {
    promise: Promise,
}

/// Point-in-time view of a promise
#[derive(Debug, Clone, Serialize)]
pub struct PromiseSnapshot {
    pub id: PromiseId,
    pub state: PromiseState,
    pub result: Option<Value>,
}

/// Wrap a closure as a reaction handler
pub fn handler(func: impl Fn(Value) -> Result<Value> + 'static) -> Option<Function> {
    Some(Function::unary("handler", func))
}

impl ResolvingFunctions {
    /// The promise these functions settle
    pub fn promise(&self) -> &Promise {
        &self.promise
    }

    /// Run the resolution procedure with `value`
    pub fn resolve(&self, value: Value) {
        self.promise.resolve_with(value);
    }

    /// Reject with `reason`, verbatim
    pub fn reject(&self, reason: Value) {
        self.promise.reject_with(reason);
    }

    /// `resolve` as a callable value
    pub fn resolve_fn(&self) -> Function {
        let settle = self.clone();
        Function::unary("resolve", move |value| {
            settle.resolve(value);
            Ok(Value::Undefined)
        })
    }

    /// `reject` as a callable value
    pub fn reject_fn(&self) -> Function {
        let settle = self.clone();
        Function::unary("reject", move |reason| {
            settle.reject(reason);
            Ok(Value::Undefined)
        })
    }
}

impl Promise {
    /// Create a pending promise together with its resolving functions
    pub fn pending(scheduler: &Rc<dyn Scheduler>) -> (Promise, ResolvingFunctions) {
        let promise = Promise {
            cell: Rc::new(PromiseCell {
                id: PROMISE_ID.fetch_add(1, Ordering::Relaxed),
                scheduler: scheduler.clone(),
                inner: RefCell::new(PromiseInner {
                    state: PromiseState::Pending,
                    result: None,
                    reactions: VecDeque::new(),
                    handled: false,
                    resolution_in_progress: Vec::new(),
                }),
            }),
        };
        let settle = ResolvingFunctions {
            promise: promise.clone(),
        };
        (promise, settle)
    }

    /// Create a promise and run `executor` synchronously with its resolving
    /// functions. An `Err` from the executor rejects the promise unless it
    /// already settled.
    pub fn with_executor<F>(scheduler: &Rc<dyn Scheduler>, executor: F) -> Promise
    where
        F: FnOnce(&ResolvingFunctions) -> Result<()>,
    {
        let (promise, settle) = Self::pending(scheduler);
        if let Err(err) = executor(&settle) {
            tracing::trace!(promise = promise.id(), %err, "executor threw");
            settle.reject(err.into_reason());
        }
        promise
    }

    /// Construct from a callable executor value, called as `executor(resolve, reject)`.
    ///
    /// Fails before any promise exists if `executor` is not a function.
    pub fn new(scheduler: &Rc<dyn Scheduler>, executor: &Value) -> Result<Promise> {
        let executor = executor.as_function().ok_or_else(|| Error::NotCallable {
            found: executor.to_string(),
        })?;
        Ok(Self::with_executor(scheduler, |settle| {
            executor
                .call(&[settle.resolve_fn().into(), settle.reject_fn().into()])
                .map(drop)
        }))
    }

    pub fn id(&self) -> PromiseId {
        self.cell.id
    }

    pub fn state(&self) -> PromiseState {
        self.cell.inner.borrow().state
    }

    /// The fulfillment value or rejection reason, once settled
    pub fn result(&self) -> Option<Value> {
        self.cell.inner.borrow().result.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// Whether both handles refer to the same promise
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }

    /// The scheduler this promise (and everything derived from it) uses
    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.cell.scheduler
    }

    /// State, or `None` while the promise is being mutated
    pub(crate) fn try_state(&self) -> Option<PromiseState> {
        self.cell.inner.try_borrow().ok().map(|inner| inner.state)
    }

    pub fn snapshot(&self) -> PromiseSnapshot {
        let inner = self.cell.inner.borrow();
        PromiseSnapshot {
            id: self.cell.id,
            state: inner.state,
            result: inner.result.clone(),
        }
    }

    /// Register reactions and return the derived promise.
    ///
    /// Only the handler matching the eventual state runs, always from a
    /// scheduled task. A missing handler passes the settlement through.
    pub fn then(&self, on_fulfilled: Option<Function>, on_rejected: Option<Function>) -> Promise {
        let (child, downstream) = Promise::pending(&self.cell.scheduler);
        {
            let mut inner = self.cell.inner.borrow_mut();
            inner.handled = true;
            inner.reactions.push_back(Reaction {
                handler: on_fulfilled,
                expected: PromiseState::Fulfilled,
                downstream: downstream.clone(),
            });
            inner.reactions.push_back(Reaction {
                handler: on_rejected,
                expected: PromiseState::Rejected,
                downstream,
            });
        }
        self.drain();
        child
    }

    /// `then` with dynamic handlers; anything that is not a function counts as absent
    pub fn then_values(&self, on_fulfilled: &Value, on_rejected: &Value) -> Promise {
        self.then(on_fulfilled.as_function(), on_rejected.as_function())
    }

    /// `then(None, on_rejected)`
    pub fn catch(&self, on_rejected: Option<Function>) -> Promise {
        self.then(None, on_rejected)
    }

    /// Run `on_settled` (with no arguments) whichever way this promise settles.
    ///
    /// The derived promise keeps this promise's value or reason; only an
    /// error raised by `on_settled` replaces it.
    pub fn finally(&self, on_settled: Option<Function>) -> Promise {
        let Some(on_settled) = on_settled else {
            return self.then(None, None);
        };
        let after_fulfilled = on_settled.clone();
        let on_fulfilled = Function::unary("finally", move |value| {
            after_fulfilled.call(&[])?;
            Ok(value)
        });
        let on_rejected = Function::unary("finally", move |reason| {
            on_settled.call(&[])?;
            Err(Error::Thrown(reason))
        });
        self.then(Some(on_fulfilled), Some(on_rejected))
    }

    /// The resolution procedure
    fn resolve_with(&self, value: Value) {
        if !self.is_pending() {
            return;
        }
        if let Value::Promise(other) = &value {
            if other.ptr_eq(self) {
                self.reject_with(Error::ChainingCycle { promise: self.id() }.into_reason());
                return;
            }
        }
        match probe_thenable(&value) {
            Some(thenable) => self.adopt(value, thenable),
            None => self.settle(PromiseState::Fulfilled, value),
        }
    }

    /// Subscribe to `thenable` with this promise's own resolving functions
    fn adopt(&self, value: Value, thenable: Rc<dyn Thenable>) {
        {
            let mut inner = self.cell.inner.borrow_mut();
            if inner
                .resolution_in_progress
                .iter()
                .any(|adopting| adopting.same_identity(&value))
            {
                drop(inner);
                tracing::debug!(promise = self.id(), "thenable resolved with itself");
                self.reject_with(Error::ChainingCycle { promise: self.id() }.into_reason());
                return;
            }
            inner.resolution_in_progress.push(value.clone());
        }

        tracing::debug!(promise = self.id(), thenable = value.type_name(), "adopting thenable");
        let settle = ResolvingFunctions {
            promise: self.clone(),
        };
        let outcome = thenable.then(settle.resolve_fn().into(), settle.reject_fn().into());
        self.cell.inner.borrow_mut().resolution_in_progress.pop();

        if let Err(err) = outcome {
            self.reject_with(err.into_reason());
        }
    }

    fn reject_with(&self, reason: Value) {
        self.settle(PromiseState::Rejected, reason);
    }

    fn settle(&self, state: PromiseState, result: Value) {
        {
            let mut inner = self.cell.inner.borrow_mut();
            if inner.state != PromiseState::Pending {
                return;
            }
            inner.state = state;
            inner.result = Some(result);
        }
        tracing::trace!(promise = self.id(), ?state, "promise settled");

        if state == PromiseState::Rejected {
            self.schedule_rejection_check();
        }
        self.drain();
    }

    /// One deferred step after rejecting, report the rejection if nothing
    /// has subscribed to this promise by then.
    fn schedule_rejection_check(&self) {
        let promise = self.clone();
        self.cell.scheduler.enqueue(Box::new(move || {
            let reason = {
                let inner = promise.cell.inner.borrow();
                if inner.handled {
                    return;
                }
                inner.result.clone().unwrap_or_default()
            };
            tracing::warn!(promise = promise.id(), %reason, "unhandled promise rejection");
            promise
                .cell
                .scheduler
                .report_unhandled_rejection(promise.id(), &reason);
        }));
    }

    /// Hand every queued reaction to the scheduler, in order. No-op while pending.
    fn drain(&self) {
        loop {
            let reaction = {
                let mut inner = self.cell.inner.borrow_mut();
                if inner.state == PromiseState::Pending {
                    return;
                }
                match inner.reactions.pop_front() {
                    Some(reaction) => reaction,
                    None => return,
                }
            };
            let promise = self.clone();
            self.cell
                .scheduler
                .enqueue(Box::new(move || promise.run_reaction(reaction)));
        }
    }

    fn run_reaction(&self, reaction: Reaction) {
        let (state, result) = {
            let inner = self.cell.inner.borrow();
            (inner.state, inner.result.clone().unwrap_or_default())
        };
        if state != reaction.expected {
            return;
        }

        let Reaction {
            handler, downstream, ..
        } = reaction;
        match handler {
            None if state == PromiseState::Fulfilled => downstream.resolve(result),
            None => downstream.reject(result),
            Some(handler) => {
                tracing::trace!(promise = self.id(), handler = handler.name(), ?state, "running reaction");
                match handler.call(&[result]) {
                    Ok(value) => downstream.resolve(value),
                    Err(err) => downstream.reject(err.into_reason()),
                }
            }
        }
    }
}

/// A `then` found as an object property
struct ThenMethod(Function);

impl Thenable for ThenMethod {
    fn then(&self, on_fulfilled: Value, on_rejected: Value) -> Result<Value> {
        self.0.call(&[on_fulfilled, on_rejected])
    }
}

impl Thenable for Promise {
    fn then(&self, on_fulfilled: Value, on_rejected: Value) -> Result<Value> {
        Ok(Value::Promise(self.then_values(&on_fulfilled, &on_rejected)))
    }
}

/// Structural thenable check, used only by the resolution procedure
fn probe_thenable(value: &Value) -> Option<Rc<dyn Thenable>> {
    match value {
        Value::Promise(promise) => Some(Rc::new(promise.clone()) as Rc<dyn Thenable>),
        Value::Thenable(thenable) => Some(thenable.clone()),
        Value::Object(_) => value
            .get_property("then")
            .and_then(|then| then.as_function())
            .map(|then| Rc::new(ThenMethod(then)) as Rc<dyn Thenable>),
        _ => None,
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Promise");
        debug.field("id", &self.cell.id);
        match self.cell.inner.try_borrow() {
            Ok(inner) => debug.field("state", &inner.state).field("result", &inner.result),
            Err(_) => debug.field("state", &"<busy>"),
        };
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::value::ErrorValue;
    use std::cell::Cell;

    fn setup() -> (Rc<EventLoop>, Rc<dyn Scheduler>) {
        let event_loop = Rc::new(EventLoop::new());
        let scheduler: Rc<dyn Scheduler> = event_loop.clone();
        (event_loop, scheduler)
    }

    fn fulfilled(scheduler: &Rc<dyn Scheduler>, value: impl Into<Value>) -> Promise {
        let value = value.into();
        Promise::with_executor(scheduler, move |settle| {
            settle.resolve(value);
            Ok(())
        })
    }

    fn rejected(scheduler: &Rc<dyn Scheduler>, reason: impl Into<Value>) -> Promise {
        let reason = reason.into();
        Promise::with_executor(scheduler, move |settle| {
            settle.reject(reason);
            Ok(())
        })
    }

    fn is_type_error(value: &Option<Value>) -> bool {
        matches!(value, Some(Value::Error(ErrorValue { kind: crate::error::ErrorKind::TypeError, .. })))
    }

    #[test]
    fn test_executor_runs_synchronously() {
        let (_el, scheduler) = setup();
        let ran = Cell::new(false);
        let promise = Promise::with_executor(&scheduler, |_| {
            ran.set(true);
            Ok(())
        });
        assert!(ran.get());
        assert!(promise.is_pending());
        assert_eq!(promise.result(), None);
    }

    #[test]
    fn test_settlement_is_monotonic() {
        let (_el, scheduler) = setup();
        let (promise, settle) = Promise::pending(&scheduler);
        settle.resolve(Value::from(1));
        settle.reject(Value::from("late"));
        settle.resolve(Value::from(2));
        assert_eq!(promise.state(), PromiseState::Fulfilled);
        assert_eq!(promise.result(), Some(Value::from(1)));
    }

    #[test]
    fn test_executor_error_rejects() {
        let (el, scheduler) = setup();
        let promise = Promise::with_executor(&scheduler, |_| Err(Error::throw("bad")));
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert_eq!(promise.result(), Some(Value::from("bad")));
        el.run_to_completion();
    }

    #[test]
    fn test_executor_error_after_resolve_is_ignored() {
        let (_el, scheduler) = setup();
        let promise = Promise::with_executor(&scheduler, |settle| {
            settle.resolve(Value::from("ok"));
            Err(Error::throw("ignored"))
        });
        assert_eq!(promise.state(), PromiseState::Fulfilled);
        assert_eq!(promise.result(), Some(Value::from("ok")));
    }

    #[test]
    fn test_new_requires_callable_executor() {
        let (_el, scheduler) = setup();
        let err = Promise::new(&scheduler, &Value::from(3)).unwrap_err();
        assert!(matches!(err, Error::NotCallable { ref found } if found == "3"));
    }

    #[test]
    fn test_new_with_function_executor() {
        let (_el, scheduler) = setup();
        let executor = Function::new("executor", |args: &[Value]| {
            args[0].as_function().unwrap().call(&[Value::from(7)])
        });
        let promise = Promise::new(&scheduler, &Value::from(executor)).unwrap();
        assert_eq!(promise.result(), Some(Value::from(7)));
    }

    #[test]
    fn test_then_never_runs_synchronously() {
        let (el, scheduler) = setup();
        let promise = fulfilled(&scheduler, 5);
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        promise.then(
            handler(move |v| {
                *sink.borrow_mut() = Some(v);
                Ok(Value::Undefined)
            }),
            None,
        );
        assert_eq!(*seen.borrow(), None);
        el.run_microtasks();
        assert_eq!(*seen.borrow(), Some(Value::from(5)));
    }

    #[test]
    fn test_pass_through_without_handlers() {
        let (el, scheduler) = setup();
        let ok = fulfilled(&scheduler, 5).then(None, None);
        let err = rejected(&scheduler, "e").then(None, None);
        el.run_to_completion();
        assert_eq!(ok.snapshot().state, PromiseState::Fulfilled);
        assert_eq!(ok.result(), Some(Value::from(5)));
        assert_eq!(err.state(), PromiseState::Rejected);
        assert_eq!(err.result(), Some(Value::from("e")));
    }

    #[test]
    fn test_non_callable_handlers_are_ignored() {
        let (el, scheduler) = setup();
        let child = fulfilled(&scheduler, 9).then_values(&Value::from(1), &Value::Null);
        el.run_to_completion();
        assert_eq!(child.result(), Some(Value::from(9)));
    }

    #[test]
    fn test_handler_error_rejects_child() {
        let (el, scheduler) = setup();
        let child = fulfilled(&scheduler, 1).then(handler(|_| Err(Error::throw("thrown"))), None);
        el.run_to_completion();
        assert_eq!(child.state(), PromiseState::Rejected);
        assert_eq!(child.result(), Some(Value::from("thrown")));
    }

    #[test]
    fn test_handler_returning_promise_is_adopted() {
        let (el, scheduler) = setup();
        let (other, settle_other) = Promise::pending(&scheduler);
        let other_value = Value::from(other);
        let child = fulfilled(&scheduler, 1).then(handler(move |_| Ok(other_value.clone())), None);

        el.run_to_completion();
        assert!(child.is_pending());

        settle_other.reject(Value::from("y"));
        el.run_to_completion();
        assert_eq!(child.state(), PromiseState::Rejected);
        assert_eq!(child.result(), Some(Value::from("y")));
    }

    #[test]
    fn test_resolving_with_itself_is_a_type_error() {
        let (el, scheduler) = setup();
        let (promise, settle) = Promise::pending(&scheduler);
        settle.resolve(Value::from(promise.clone()));
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert!(is_type_error(&promise.result()));
        el.run_to_completion();
    }

    #[test]
    fn test_handler_returning_own_child_is_a_cycle() {
        let (el, scheduler) = setup();
        let slot: Rc<RefCell<Option<Promise>>> = Rc::new(RefCell::new(None));
        let lookup = slot.clone();
        let child = fulfilled(&scheduler, 1).then(
            handler(move |_| Ok(lookup.borrow().clone().map(Value::from).unwrap_or_default())),
            None,
        );
        *slot.borrow_mut() = Some(child.clone());
        el.run_to_completion();
        assert_eq!(child.state(), PromiseState::Rejected);
        assert!(is_type_error(&child.result()));
        slot.borrow_mut().take();
    }

    #[test]
    fn test_object_thenable_is_adopted() {
        let (el, scheduler) = setup();
        let thenable = Value::new_object();
        thenable.set_property(
            "then",
            Value::from(Function::new("then", |args: &[Value]| {
                args[0].as_function().unwrap().call(&[Value::from(42)])
            })),
        );
        let (promise, settle) = Promise::pending(&scheduler);
        settle.resolve(thenable);
        assert_eq!(promise.result(), Some(Value::from(42)));
        el.run_to_completion();
    }

    #[test]
    fn test_nested_thenables_unwrap() {
        let (el, scheduler) = setup();
        let inner = fulfilled(&scheduler, "deep");
        let outer = fulfilled(&scheduler, Value::from(inner));
        el.run_to_completion();
        assert_eq!(outer.result(), Some(Value::from("deep")));
    }

    #[test]
    fn test_reentrant_self_thenable_is_a_type_error() {
        let (el, scheduler) = setup();
        let thenable = Value::new_object();
        let itself = thenable.clone();
        thenable.set_property(
            "then",
            Value::from(Function::new("then", move |args: &[Value]| {
                args[0].as_function().unwrap().call(&[itself.clone()])
            })),
        );
        let (promise, settle) = Promise::pending(&scheduler);
        settle.resolve(thenable.clone());
        assert_eq!(promise.state(), PromiseState::Rejected);
        assert!(is_type_error(&promise.result()));
        el.run_to_completion();
        // break the object -> closure -> object cycle
        thenable.set_property("then", Value::Undefined);
    }

    #[test]
    fn test_failing_then_rejects() {
        let (el, scheduler) = setup();
        let thenable = Value::object([(
            "then",
            Value::from(Function::new("then", |_: &[Value]| Err(Error::throw("then failed")))),
        )]);
        let (promise, settle) = Promise::pending(&scheduler);
        settle.resolve(thenable);
        assert_eq!(promise.result(), Some(Value::from("then failed")));
        el.run_to_completion();
    }

    struct Ready(Value);

    impl Thenable for Ready {
        fn then(&self, on_fulfilled: Value, _on_rejected: Value) -> Result<Value> {
            on_fulfilled.as_function().unwrap().call(&[self.0.clone()])
        }
    }

    #[test]
    fn test_rust_thenable_is_adopted() {
        let (_el, scheduler) = setup();
        let promise = fulfilled(&scheduler, Value::thenable(Ready(Value::from("rust"))));
        assert_eq!(promise.result(), Some(Value::from("rust")));
    }

    #[test]
    fn test_reactions_fire_in_registration_order() {
        let (el, scheduler) = setup();
        let (promise, settle) = Promise::pending(&scheduler);
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            promise.then(
                handler(move |_| {
                    log.borrow_mut().push(i);
                    Ok(Value::Undefined)
                }),
                None,
            );
        }
        settle.resolve(Value::Null);
        el.run_to_completion();
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_each_reaction_runs_once() {
        let (el, scheduler) = setup();
        let (promise, settle) = Promise::pending(&scheduler);
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        promise.then(
            handler(move |v| {
                counter.set(counter.get() + 1);
                Ok(v)
            }),
            None,
        );
        settle.resolve(Value::from(1));
        el.run_to_completion();
        promise.then(None, None);
        el.run_to_completion();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_catch_recovers() {
        let (el, scheduler) = setup();
        let recovered = rejected(&scheduler, "oops").catch(handler(|reason| {
            Ok(Value::from(format!("recovered from {}", reason)))
        }));
        el.run_to_completion();
        assert_eq!(recovered.result(), Some(Value::from("recovered from oops")));
    }

    #[test]
    fn test_finally_keeps_settlement() {
        let (el, scheduler) = setup();
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let on_settled = Function::new("cleanup", move |args: &[Value]| {
            assert!(args.is_empty());
            counter.set(counter.get() + 1);
            Ok(Value::from("ignored"))
        });

        let ok = fulfilled(&scheduler, 1).finally(Some(on_settled.clone()));
        let err = rejected(&scheduler, "r").finally(Some(on_settled));
        err.catch(handler(Ok));
        el.run_to_completion();

        assert_eq!(calls.get(), 2);
        assert_eq!(ok.result(), Some(Value::from(1)));
        assert_eq!(err.state(), PromiseState::Rejected);
        assert_eq!(err.result(), Some(Value::from("r")));
    }

    #[test]
    fn test_finally_error_replaces_value() {
        let (el, scheduler) = setup();
        let failing = Function::new("cleanup", |_: &[Value]| Err(Error::throw("cleanup failed")));
        let child = fulfilled(&scheduler, 1).finally(Some(failing));
        el.run_to_completion();
        assert_eq!(child.result(), Some(Value::from("cleanup failed")));
    }

    #[test]
    fn test_unhandled_rejection_is_reported() {
        let (el, scheduler) = setup();
        let promise = rejected(&scheduler, "lost");
        assert!(el.drain_unhandled_rejections().is_empty());
        el.run_to_completion();
        assert_eq!(
            el.drain_unhandled_rejections(),
            vec![(promise.id(), Value::from("lost"))]
        );
    }

    #[test]
    fn test_rejection_caught_in_same_turn_is_not_reported() {
        let (el, scheduler) = setup();
        let promise = rejected(&scheduler, "caught");
        promise.catch(handler(Ok));
        el.run_to_completion();
        assert!(el.drain_unhandled_rejections().is_empty());
    }

    #[test]
    fn test_promise_rejected_with_itself_formats_without_recursing() {
        let (el, scheduler) = setup();
        let (promise, settle) = Promise::pending(&scheduler);
        settle.reject(Value::from(promise.clone()));
        el.run_to_completion();

        let debug = format!("{:?}", promise);
        assert!(debug.contains("Rejected"));

        let json = serde_json::to_value(promise.snapshot()).unwrap();
        assert_eq!(json["state"], "rejected");
        assert_eq!(json["result"]["id"], promise.id());
        assert_eq!(json["result"]["state"], "rejected");
        assert!(json["result"].get("result").is_none());

        // the promise owns itself through its reason
        settle.promise().cell.inner.borrow_mut().result = None;
    }

    #[test]
    fn test_snapshot_serializes() {
        let (_el, scheduler) = setup();
        let promise = fulfilled(&scheduler, "done");
        let json = serde_json::to_value(promise.snapshot()).unwrap();
        assert_eq!(json["state"], "fulfilled");
        assert_eq!(json["result"], "done");
    }
}

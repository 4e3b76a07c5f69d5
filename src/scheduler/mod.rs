//! Scheduler Abstraction
//!
//! Promises never run their reactions synchronously. Every reaction is
//! handed to a [`Scheduler`] as an independent task; the scheduler is chosen
//! once when promises are created and inherited by every derived promise.
//!
//! Contract for [`Scheduler::enqueue`]: run `task` after the current
//! synchronous execution completes, before any lower-priority or
//! timer-driven work, and in FIFO order relative to earlier `enqueue` calls.

use crate::promise::PromiseId;
use crate::value::Value;

/// A deferred unit of work
pub type Task = Box<dyn FnOnce()>;

/// FIFO deferred-task queue consumed by promises
pub trait Scheduler {
    /// Defer `task` past the current synchronous call stack
    fn enqueue(&self, task: Task);

    /// Called when a rejected promise had no reaction registered one deferred
    /// step after it settled. Purely diagnostic; the default ignores it.
    fn report_unhandled_rejection(&self, _promise: PromiseId, _reason: &Value) {}
}

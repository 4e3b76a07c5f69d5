//! Runtime environment for promissory
//!
//! [`Runtime`] owns one [`EventLoop`] and injects it as the scheduler of
//! every promise it creates, so the scheduling policy is chosen once at
//! startup. It also exposes the loop's virtual-time timers, which is how
//! delayed settlement is expressed.

pub mod config;

pub use config::RuntimeConfig;

use std::path::Path;
use std::rc::Rc;

use crate::error::Result;
use crate::event_loop::{EventLoop, RunResult, TimerId};
use crate::promise::{Promise, PromiseId, ResolvingFunctions};
use crate::scheduler::Scheduler;
use crate::value::Value;

/// The promissory runtime
pub struct Runtime {
    event_loop: Rc<EventLoop>,
    scheduler: Rc<dyn Scheduler>,
    config: RuntimeConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a new runtime with the default configuration
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime from an explicit configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let event_loop = Rc::new(EventLoop::new());
        event_loop.set_microtask_budget(config.microtask_budget);
        event_loop.set_track_unhandled_rejections(config.track_unhandled_rejections);
        let scheduler: Rc<dyn Scheduler> = event_loop.clone();
        tracing::debug!(
            microtask_budget = config.microtask_budget,
            track_unhandled_rejections = config.track_unhandled_rejections,
            "runtime created"
        );
        Self {
            event_loop,
            scheduler,
            config,
        }
    }

    /// Create a runtime from a JSON configuration file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        Ok(Self::with_config(RuntimeConfig::from_file(path)?))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.scheduler
    }

    /// `new Promise(executor)` with a dynamic executor value
    pub fn promise(&self, executor: &Value) -> Result<Promise> {
        Promise::new(&self.scheduler, executor)
    }

    /// `new Promise(executor)` with a Rust executor
    pub fn promise_with<F>(&self, executor: F) -> Promise
    where
        F: FnOnce(&ResolvingFunctions) -> Result<()>,
    {
        Promise::with_executor(&self.scheduler, executor)
    }

    /// A pending promise plus the functions that settle it
    pub fn pending(&self) -> (Promise, ResolvingFunctions) {
        Promise::pending(&self.scheduler)
    }

    pub fn resolve(&self, value: impl Into<Value>) -> Promise {
        Promise::resolve(&self.scheduler, value.into())
    }

    pub fn reject(&self, reason: impl Into<Value>) -> Promise {
        Promise::reject(&self.scheduler, reason.into())
    }

    pub fn all(&self, iterable: impl Into<Value>) -> Promise {
        Promise::all(&self.scheduler, &iterable.into())
    }

    pub fn all_settled(&self, iterable: impl Into<Value>) -> Result<Promise> {
        Promise::all_settled(&self.scheduler, &iterable.into())
    }

    pub fn race(&self, iterable: impl Into<Value>) -> Promise {
        Promise::race(&self.scheduler, &iterable.into())
    }

    pub fn any(&self, iterable: impl Into<Value>) -> Promise {
        Promise::any(&self.scheduler, &iterable.into())
    }

    /// A promise resolved with `value` once `ms` virtual milliseconds pass
    pub fn delay(&self, ms: u64, value: impl Into<Value>) -> Promise {
        let value = value.into();
        let (promise, settle) = self.pending();
        self.event_loop
            .set_timeout(ms, Box::new(move || settle.resolve(value)));
        promise
    }

    /// A promise rejected with `reason` once `ms` virtual milliseconds pass
    pub fn delay_reject(&self, ms: u64, reason: impl Into<Value>) -> Promise {
        let reason = reason.into();
        let (promise, settle) = self.pending();
        self.event_loop
            .set_timeout(ms, Box::new(move || settle.reject(reason)));
        promise
    }

    /// Run `callback` after `ms` virtual milliseconds
    pub fn set_timeout(&self, ms: u64, callback: impl FnOnce() + 'static) -> TimerId {
        self.event_loop.set_timeout(ms, Box::new(callback))
    }

    /// Run the event loop until no work remains
    pub fn run(&self) -> RunResult {
        self.event_loop.run_to_completion()
    }

    /// Drain pending microtasks without firing timers
    pub fn run_microtasks(&self) -> usize {
        self.event_loop.run_microtasks()
    }

    /// Advance virtual time, firing the timers that fall due
    pub fn advance_time(&self, ms: u64) {
        self.event_loop.advance_time(ms);
    }

    /// Get and clear the unhandled rejections recorded so far
    pub fn unhandled_rejections(&self) -> Vec<(PromiseId, Value)> {
        self.event_loop.drain_unhandled_rejections()
    }
}

impl Drop for Runtime {
    /// Queued tasks hold promises, which hold the event loop; discarding
    /// the pending work breaks that cycle.
    fn drop(&mut self) {
        if self.event_loop.has_pending_work() {
            tracing::debug!(
                microtasks = self.event_loop.pending_microtasks(),
                "runtime dropped with pending work"
            );
        }
        self.event_loop.clear();
    }
}

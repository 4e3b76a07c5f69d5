//! Event Loop Implementation
//!
//! The default [`Scheduler`]: a FIFO microtask queue for promise reactions
//! plus a macrotask queue of timers driven by virtual time. One tick drains
//! the microtask queue (up to a budget), then fires at most one timer.
//!
//! All methods take `&self` so tasks may enqueue more work while the loop is
//! draining; no internal borrow is held while a task runs.

use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Instant;

use crate::promise::PromiseId;
use crate::scheduler::{Scheduler, Task};
use crate::value::Value;

/// Identifier returned by [`EventLoop::set_timeout`]
pub type TimerId = u64;

/// Default maximum microtasks drained per tick (starvation protection)
pub const DEFAULT_MICROTASK_BUDGET: usize = 10_000;

/// A timer waiting for virtual time to reach `fire_at`
struct Macrotask {
    id: TimerId,
    fire_at: u64,
    callback: Task,
}

/// Result of running the event loop to completion via `run_to_completion()`
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    /// Total number of microtasks that were dequeued and processed
    pub microtasks_processed: usize,
    /// Total number of macrotasks that were dequeued and processed
    pub macrotasks_processed: usize,
    /// Number of full event loop iterations (each iteration = drain microtasks + one macrotask)
    pub iterations: usize,
    /// The virtual time when the event loop finished
    pub final_time: u64,
}

/// Runtime statistics for the event loop
#[derive(Clone, Debug, Default, Serialize)]
pub struct EventLoopStats {
    /// Total microtasks processed across all ticks
    pub total_microtasks: u64,
    /// Total macrotasks processed across all ticks
    pub total_macrotasks: u64,
    /// Total number of event loop ticks
    pub total_ticks: u64,
    /// Maximum microtasks drained in a single tick
    pub max_microtasks_per_tick: u64,
    /// Drains cut short by the microtask budget
    pub budget_exhaustions: u64,
    /// Longest tick duration in milliseconds (wall-clock)
    pub longest_tick_ms: u64,
    /// Unhandled rejections reported by promises
    pub unhandled_rejections: u64,
}

struct LoopState {
    /// Microtask queue (high priority - runs between macrotasks)
    microtask_queue: VecDeque<Task>,
    /// Macrotask queue (timers)
    macrotask_queue: Vec<Macrotask>,
    /// Current virtual time in milliseconds
    virtual_time: u64,
    next_timer_id: TimerId,
    /// Reported unhandled rejections, oldest first
    unhandled_rejections: Vec<(PromiseId, Value)>,
    track_unhandled_rejections: bool,
    max_microtasks_per_tick: usize,
    stats: EventLoopStats,
}

/// The event loop manages task queues and execution order
pub struct EventLoop {
    state: RefCell<LoopState>,
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLoop {
    /// Create a new event loop
    pub fn new() -> Self {
        Self {
            state: RefCell::new(LoopState {
                microtask_queue: VecDeque::new(),
                macrotask_queue: Vec::new(),
                virtual_time: 0,
                next_timer_id: 1,
                unhandled_rejections: Vec::new(),
                track_unhandled_rejections: true,
                max_microtasks_per_tick: DEFAULT_MICROTASK_BUDGET,
                stats: EventLoopStats::default(),
            }),
        }
    }

    /// Get current virtual time
    pub fn current_time(&self) -> u64 {
        self.state.borrow().virtual_time
    }

    /// Enqueue a microtask
    pub fn enqueue_microtask(&self, task: Task) {
        self.state.borrow_mut().microtask_queue.push_back(task);
    }

    /// Schedule `callback` to run once virtual time has advanced by `delay` ms
    pub fn set_timeout(&self, delay: u64, callback: Task) -> TimerId {
        let mut state = self.state.borrow_mut();
        let id = state.next_timer_id;
        state.next_timer_id += 1;
        let fire_at = state.virtual_time.saturating_add(delay);
        state.macrotask_queue.push(Macrotask {
            id,
            fire_at,
            callback,
        });
        tracing::trace!(timer = id, fire_at, "timer scheduled");
        id
    }

    /// Check if there are pending microtasks
    pub fn has_pending_microtasks(&self) -> bool {
        !self.state.borrow().microtask_queue.is_empty()
    }

    /// Check if there are pending macrotasks
    pub fn has_pending_macrotasks(&self) -> bool {
        !self.state.borrow().macrotask_queue.is_empty()
    }

    /// Check if the event loop has any pending work
    pub fn has_pending_work(&self) -> bool {
        self.has_pending_microtasks() || self.has_pending_macrotasks()
    }

    /// Number of queued microtasks
    pub fn pending_microtasks(&self) -> usize {
        self.state.borrow().microtask_queue.len()
    }

    fn pop_microtask(&self) -> Option<Task> {
        self.state.borrow_mut().microtask_queue.pop_front()
    }

    /// Drain microtasks up to the budget limit, including microtasks queued
    /// by the ones being drained. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let budget = self.state.borrow().max_microtasks_per_tick;
        let mut count: usize = 0;

        while count < budget {
            match self.pop_microtask() {
                Some(task) => {
                    task();
                    count += 1;
                }
                None => break,
            }
        }

        let mut state = self.state.borrow_mut();
        state.stats.total_microtasks += count as u64;
        if (count as u64) > state.stats.max_microtasks_per_tick {
            state.stats.max_microtasks_per_tick = count as u64;
        }
        if !state.microtask_queue.is_empty() {
            state.stats.budget_exhaustions += 1;
            tracing::warn!(
                budget,
                remaining = state.microtask_queue.len(),
                "microtask budget exhausted, deferring the rest to the next tick"
            );
        }
        count
    }

    /// Remove the earliest timer due at or before `deadline` (ties in
    /// scheduling order) and move virtual time forward to its fire time.
    fn take_next_macrotask(&self, deadline: Option<u64>) -> Option<Macrotask> {
        let mut state = self.state.borrow_mut();
        let next_idx = state
            .macrotask_queue
            .iter()
            .enumerate()
            .filter(|(_, t)| deadline.map_or(true, |d| t.fire_at <= d))
            .min_by_key(|(_, t)| t.fire_at)
            .map(|(i, _)| i)?;

        let task = state.macrotask_queue.remove(next_idx);
        if task.fire_at > state.virtual_time {
            state.virtual_time = task.fire_at;
        }
        Some(task)
    }

    fn run_macrotask(&self, task: Macrotask) {
        tracing::trace!(timer = task.id, time = task.fire_at, "timer fired");
        (task.callback)();
        self.state.borrow_mut().stats.total_macrotasks += 1;
    }

    /// Fire the next timer, advancing virtual time if needed.
    /// Returns false when no timer is scheduled.
    pub fn run_next_macrotask(&self) -> bool {
        match self.take_next_macrotask(None) {
            Some(task) => {
                self.run_macrotask(task);
                true
            }
            None => false,
        }
    }

    /// Run the event loop to completion following the standard algorithm:
    ///   1. Drain all microtasks
    ///   2. If a macrotask is scheduled, advance time to it and execute it
    ///   3. Repeat from step 1
    ///   4. Stop when no microtasks and no macrotasks remain
    ///
    /// A promise that never settles does not keep the loop alive.
    pub fn run_to_completion(&self) -> RunResult {
        let mut result = RunResult::default();

        loop {
            let tick_start = Instant::now();

            result.microtasks_processed += self.run_microtasks();

            let macrotask = if self.has_pending_microtasks() {
                None
            } else {
                self.take_next_macrotask(None)
            };
            let fired = macrotask.is_some();
            if let Some(task) = macrotask {
                self.run_macrotask(task);
                result.macrotasks_processed += 1;
            }

            {
                let mut state = self.state.borrow_mut();
                state.stats.total_ticks += 1;
                let tick_elapsed = tick_start.elapsed().as_millis() as u64;
                if tick_elapsed > state.stats.longest_tick_ms {
                    state.stats.longest_tick_ms = tick_elapsed;
                }
            }

            if !fired && !self.has_pending_microtasks() {
                break;
            }
            result.iterations += 1;
        }

        result.final_time = self.current_time();
        result
    }

    /// Advance virtual time by `ms`, firing every timer that falls due in the
    /// window and draining microtasks between them.
    pub fn advance_time(&self, ms: u64) {
        let target = self.current_time().saturating_add(ms);
        loop {
            self.run_microtasks();
            match self.take_next_macrotask(Some(target)) {
                Some(task) => self.run_macrotask(task),
                None => break,
            }
        }
        let mut state = self.state.borrow_mut();
        if target > state.virtual_time {
            state.virtual_time = target;
        }
    }

    /// Get and clear the recorded unhandled rejections
    pub fn drain_unhandled_rejections(&self) -> Vec<(PromiseId, Value)> {
        std::mem::take(&mut self.state.borrow_mut().unhandled_rejections)
    }

    /// Choose whether reported unhandled rejections are recorded
    pub fn set_track_unhandled_rejections(&self, track: bool) {
        self.state.borrow_mut().track_unhandled_rejections = track;
    }

    /// Set the maximum number of microtasks to drain per tick (starvation protection).
    pub fn set_microtask_budget(&self, limit: usize) {
        self.state.borrow_mut().max_microtasks_per_tick = limit.max(1);
    }

    /// Get the current microtask budget limit.
    pub fn microtask_budget(&self) -> usize {
        self.state.borrow().max_microtasks_per_tick
    }

    /// Get a snapshot of the current event loop statistics.
    pub fn stats(&self) -> EventLoopStats {
        self.state.borrow().stats.clone()
    }

    /// Reset all event loop statistics to zero.
    pub fn reset_stats(&self) {
        self.state.borrow_mut().stats = EventLoopStats::default();
    }

    /// Clear all pending work
    pub fn clear(&self) {
        // Queued tasks own promises; drop them after the borrow is released.
        let (microtasks, macrotasks, rejections) = {
            let mut state = self.state.borrow_mut();
            (
                std::mem::take(&mut state.microtask_queue),
                std::mem::take(&mut state.macrotask_queue),
                std::mem::take(&mut state.unhandled_rejections),
            )
        };
        drop(microtasks);
        drop(macrotasks);
        drop(rejections);
    }
}

impl Scheduler for EventLoop {
    fn enqueue(&self, task: Task) {
        self.enqueue_microtask(task);
    }

    fn report_unhandled_rejection(&self, promise: PromiseId, reason: &Value) {
        let mut state = self.state.borrow_mut();
        state.stats.unhandled_rejections += 1;
        if state.track_unhandled_rejections {
            state.unhandled_rejections.push((promise, reason.clone()));
        }
    }
}

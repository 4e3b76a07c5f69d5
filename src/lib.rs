//! Promissory: deferred computations for single-threaded Rust hosts
//!
//! A [`Promise`] represents a value that will be available later. It starts
//! pending and settles exactly once, either fulfilled with a value or rejected
//! with a reason. Handlers registered with [`Promise::then`] always run
//! asynchronously, on the [`Scheduler`] the promise was created with, in
//! registration order.
//!
//! # Quick Start
//!
//! ```
//! use promissory::{handler, Runtime, Value};
//!
//! let runtime = Runtime::new();
//! let doubled = runtime
//!     .delay(10, 21)
//!     .then(handler(|v| Ok(Value::from(v.as_number().unwrap_or(0.0) * 2.0))), None);
//!
//! runtime.run();
//! assert_eq!(doubled.result(), Some(Value::from(42)));
//! ```
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`value`] | Dynamic values handed to and returned by handlers |
//! | [`promise`] | State machine, resolution procedure, then/catch/finally, combinators |
//! | [`scheduler`] | The seam between promises and whatever runs their reactions |
//! | [`event_loop`] | Default scheduler: microtask queue plus virtual-time timers |
//! | [`runtime`] | Facade tying one event loop to the promises it drives |
#![allow(clippy::type_complexity)]
#![allow(clippy::should_implement_trait)]

pub mod event_loop;
pub mod promise;
pub mod runtime;
pub mod scheduler;
pub mod value;

mod error;

pub use error::{Error, ErrorKind, Result};
pub use event_loop::{EventLoop, EventLoopStats, RunResult, TimerId};
pub use promise::{handler, Promise, PromiseId, PromiseSnapshot, PromiseState, ResolvingFunctions, Thenable};
pub use runtime::{Runtime, RuntimeConfig};
pub use scheduler::{Scheduler, Task};
pub use value::{ErrorValue, Function, Object, Value};

/// Promissory version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

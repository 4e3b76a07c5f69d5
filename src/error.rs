//! Error types for promissory
//!
//! Once a promise exists every failure becomes data: a rejection reason stored
//! in the promise. The variants here are the faults that can still surface
//! directly to a caller, plus [`Error::Thrown`], which is how executors and
//! reaction handlers "throw" a reason into the promise machinery.

use std::fmt;
use thiserror::Error;

use crate::promise::PromiseId;
use crate::value::{ErrorValue, Value};

/// Main error type for promissory
#[derive(Error, Debug)]
pub enum Error {
    /// The executor handed to a promise constructor is not callable
    #[error("TypeError: Promise resolver {found} is not a function")]
    NotCallable { found: String },

    /// A combinator was given something it cannot iterate
    #[error("TypeError: {found} is not iterable")]
    NotIterable { found: String },

    /// A promise was resolved with itself, directly or through a re-entrant thenable
    #[error("TypeError: Chaining cycle detected for promise #{promise}")]
    ChainingCycle { promise: PromiseId },

    /// A value thrown by an executor, a handler or a thenable's `then`
    #[error("Uncaught {0}")]
    Thrown(Value),

    /// Invalid runtime configuration
    #[error("ConfigError: {0}")]
    Config(String),

    /// IO error
    #[error("IOError: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// Error kinds carried by [`ErrorValue`] rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TypeError - wrong type for operation
    TypeError,
    /// Generic Error
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::GenericError => write!(f, "Error"),
        }
    }
}

impl Error {
    /// Throw an arbitrary value as a rejection reason
    pub fn throw(reason: impl Into<Value>) -> Self {
        Error::Thrown(reason.into())
    }

    /// The error kind this fault maps to when it becomes a rejection reason
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotCallable { .. } | Error::NotIterable { .. } | Error::ChainingCycle { .. } => {
                ErrorKind::TypeError
            }
            _ => ErrorKind::GenericError,
        }
    }

    /// Convert into the value a promise rejects with.
    ///
    /// Thrown values pass through verbatim; every other variant becomes an
    /// [`ErrorValue`] of the matching kind.
    pub fn into_reason(self) -> Value {
        let kind = self.kind();
        let message = match self {
            Error::Thrown(value) => return value,
            Error::NotCallable { found } => format!("Promise resolver {} is not a function", found),
            Error::NotIterable { found } => format!("{} is not iterable", found),
            Error::ChainingCycle { promise } => {
                format!("Chaining cycle detected for promise #{}", promise)
            }
            Error::Config(message) => message,
            Error::Io { source } => source.to_string(),
        };
        Value::Error(ErrorValue::new(kind, message))
    }
}

/// Result type for promissory operations
pub type Result<T> = std::result::Result<T, Error>;

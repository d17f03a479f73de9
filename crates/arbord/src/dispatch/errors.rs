//! Error types for request dispatch failures.
//!
//! Every variant reaches the caller as a `false` reply. The variants exist so
//! logs and tests can tell the failure modes apart.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::registry::RouteNotFound;

/// Errors surfaced while queueing or running a request.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No handler is registered for the path.
    #[error(transparent)]
    RouteNotFound(#[from] RouteNotFound),

    /// The body did not match the handler's declared kind.
    #[error("cannot decode body for '{path}': {message}")]
    Decode { path: String, message: String },

    /// The handler returned an error.
    #[error("handler for '{path}' failed: {message}")]
    HandlerFailed { path: String, message: String },

    /// The handler panicked.
    #[error("handler for '{path}' panicked")]
    HandlerPanicked { path: String },

    /// The handler produced a value outside its reply contract.
    #[error("handler for '{path}' returned no usable result")]
    BadHandlerResult { path: String },

    /// The handler asked the process to stop.
    #[error("handler for '{path}' terminated the service")]
    Terminated { path: String },

    /// The caller's deadline passed before the handler finished.
    #[error("request did not complete within {deadline:?}")]
    Timeout { deadline: Duration },

    /// The consumer is no longer accepting requests.
    #[error("request queue is closed")]
    QueueClosed,

    /// The consumer thread could not be started.
    #[error("failed to start dispatch consumer: {0}")]
    Spawn(#[source] io::Error),

    /// The consumer was still busy when the shutdown budget ran out.
    #[error("dispatch consumer did not drain within {timeout:?}")]
    DrainTimeout { timeout: Duration },

    /// The consumer thread panicked outside a handler.
    #[error("dispatch consumer panicked")]
    ConsumerPanic,
}

impl DispatchError {
    /// Creates a decode error.
    pub fn decode(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a handler failure.
    pub fn handler_failed(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a handler panic error.
    pub fn handler_panicked(path: impl Into<String>) -> Self {
        Self::HandlerPanicked { path: path.into() }
    }

    /// Creates a bad result error.
    pub fn bad_handler_result(path: impl Into<String>) -> Self {
        Self::BadHandlerResult { path: path.into() }
    }

    /// Creates a termination marker.
    pub fn terminated(path: impl Into<String>) -> Self {
        Self::Terminated { path: path.into() }
    }
}

//! Route table mapping exact request paths to typed handlers.
//!
//! Each handler declares its kind when it is registered. The kind decides how
//! the dispatcher decodes the request body before the call:
//!
//! - [`HandlerKind::Unary`] and [`HandlerKind::Streaming`] receive the body
//!   as a JSON object,
//! - [`HandlerKind::UploadUnary`] receives a decoded multipart upload,
//! - [`HandlerKind::Interactive`] ignores the body.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::children::ChildError;
use crate::context::ServiceContext;
use crate::dispatch::Headers;
use crate::state::StateError;

/// Result returned by every handler.
pub type HandlerResult = Result<HandlerOutcome, HandlerError>;

type UnaryFn = Box<dyn Fn(&mut ServiceContext, &Headers, Value) -> HandlerResult + Send>;
type UploadFn = Box<dyn Fn(&mut ServiceContext, &Headers, Upload) -> HandlerResult + Send>;
type InteractiveFn = Box<dyn Fn(&mut ServiceContext) -> HandlerResult + Send>;

/// Value produced by a successful handler call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Any JSON value. Strings are written to the wire unquoted.
    Json(Value),
    /// Binary download.
    Download {
        /// File contents.
        data: Vec<u8>,
        /// Suggested file name.
        filename: String,
    },
}

impl Reply {
    /// Serialises `value` into a JSON reply.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Serialise`] when `value` cannot be represented.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }
}

impl From<bool> for Reply {
    fn from(value: bool) -> Self {
        Self::Json(Value::Bool(value))
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Self::Json(Value::String(value))
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Self::Json(Value::String(value.to_owned()))
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// What the dispatcher does after a handler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Deliver the reply and keep serving.
    Continue(Reply),
    /// Stop the whole service process.
    Terminate,
}

impl HandlerOutcome {
    /// Wraps anything convertible into a [`Reply`].
    pub fn reply(value: impl Into<Reply>) -> Self {
        Self::Continue(value.into())
    }
}

/// File and form fields decoded from a multipart body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Upload {
    /// File contents, empty when no file part was sent.
    pub data: Vec<u8>,
    /// File name of the file part, empty when none was sent.
    pub filename: String,
    /// Remaining form fields.
    pub args: BTreeMap<String, String>,
}

impl Upload {
    /// True when a file part was present.
    #[must_use]
    pub fn has_file(&self) -> bool {
        !self.filename.is_empty()
    }
}

/// Errors a handler reports. The caller only ever sees `false`.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The request arguments were unusable.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        /// Description of the problem.
        message: String,
    },
    /// A state write was rejected.
    #[error(transparent)]
    State(#[from] StateError),
    /// A child lifecycle operation failed.
    #[error(transparent)]
    Child(#[from] ChildError),
    /// A reply could not be serialised.
    #[error("failed to serialise reply: {0}")]
    Serialise(#[from] serde_json::Error),
    /// Filesystem access failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl HandlerError {
    /// Creates an invalid arguments error.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            message: message.into(),
        }
    }
}

/// Decoding contract of a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Headers plus a JSON object body.
    Unary,
    /// Headers plus a multipart upload.
    UploadUnary,
    /// Polled at a fixed interval with a JSON object body.
    Streaming,
    /// Session entry point taking no arguments.
    Interactive,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unary => "unary",
            Self::UploadUnary => "upload_unary",
            Self::Streaming => "streaming",
            Self::Interactive => "interactive",
        };
        f.write_str(name)
    }
}

/// A registered handler.
pub enum Handler {
    /// See [`HandlerKind::Unary`].
    Unary(UnaryFn),
    /// See [`HandlerKind::UploadUnary`].
    UploadUnary(UploadFn),
    /// See [`HandlerKind::Streaming`].
    Streaming {
        /// Produces the next event, or `false` to end the stream.
        poll: UnaryFn,
        /// Delay between polls.
        interval: Duration,
    },
    /// See [`HandlerKind::Interactive`].
    Interactive(InteractiveFn),
}

impl Handler {
    /// Decoding contract of this handler.
    #[must_use]
    pub const fn kind(&self) -> HandlerKind {
        match self {
            Self::Unary(_) => HandlerKind::Unary,
            Self::UploadUnary(_) => HandlerKind::UploadUnary,
            Self::Streaming { .. } => HandlerKind::Streaming,
            Self::Interactive(_) => HandlerKind::Interactive,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Handler").field(&self.kind()).finish()
    }
}

/// Lookup miss.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no handler registered for '{path}'")]
pub struct RouteNotFound {
    /// Requested path.
    pub path: String,
}

/// Routes registered for one application.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    routes: HashMap<String, Handler>,
}

impl HandlerRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a JSON handler.
    pub fn unary<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut ServiceContext, &Headers, Value) -> HandlerResult + Send + 'static,
    {
        self.insert(path, Handler::Unary(Box::new(handler)))
    }

    /// Registers a multipart upload handler.
    pub fn upload<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut ServiceContext, &Headers, Upload) -> HandlerResult + Send + 'static,
    {
        self.insert(path, Handler::UploadUnary(Box::new(handler)))
    }

    /// Registers a handler polled every `interval` for server-sent events.
    pub fn streaming<F>(&mut self, path: &str, interval: Duration, poll: F) -> &mut Self
    where
        F: Fn(&mut ServiceContext, &Headers, Value) -> HandlerResult + Send + 'static,
    {
        self.insert(
            path,
            Handler::Streaming {
                poll: Box::new(poll),
                interval,
            },
        )
    }

    /// Registers a session entry point.
    pub fn interactive<F>(&mut self, path: &str, handler: F) -> &mut Self
    where
        F: Fn(&mut ServiceContext) -> HandlerResult + Send + 'static,
    {
        self.insert(path, Handler::Interactive(Box::new(handler)))
    }

    fn insert(&mut self, path: &str, handler: Handler) -> &mut Self {
        if let Some(previous) = self.routes.insert(path.to_owned(), handler) {
            tracing::debug!(
                target: crate::dispatch::DISPATCH_TARGET,
                path,
                replaced = %previous.kind(),
                "route re-registered"
            );
        }
        self
    }

    /// Exact-match lookup.
    ///
    /// # Errors
    ///
    /// Returns [`RouteNotFound`] when nothing is registered under `path`.
    pub fn lookup(&self, path: &str) -> Result<&Handler, RouteNotFound> {
        self.routes.get(path).ok_or_else(|| RouteNotFound {
            path: path.to_owned(),
        })
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Read-only view of the registered routes for the transport.
    #[must_use]
    pub fn route_table(&self) -> RouteTable {
        let routes = self
            .routes
            .iter()
            .map(|(path, handler)| {
                let interval = match handler {
                    Handler::Streaming { interval, .. } => Some(*interval),
                    _ => None,
                };
                let info = RouteInfo {
                    kind: handler.kind(),
                    interval,
                };
                (path.clone(), info)
            })
            .collect();
        RouteTable { routes }
    }
}

/// Kind and poll interval of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    /// Decoding contract.
    pub kind: HandlerKind,
    /// Poll interval of streaming routes.
    pub interval: Option<Duration>,
}

/// Snapshot of the registry shared with connection threads.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteInfo>,
}

impl RouteTable {
    /// Route information for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<RouteInfo> {
        self.routes.get(path).copied()
    }
}

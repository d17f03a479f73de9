//! Serialised request dispatch.
//!
//! Connection threads never touch service state. They normalise each request
//! into an [`InboundRequest`] and hand it to the [`Dispatcher`], which queues
//! it in a bounded FIFO. A single consumer thread owns the
//! [`HandlerRegistry`](crate::registry::HandlerRegistry) and the
//! [`ServiceContext`](crate::context::ServiceContext) and runs one handler at
//! a time in arrival order, so handlers observe every earlier mutation and
//! never overlap.
//!
//! ## Admission and deadlines
//!
//! [`Dispatcher::submit`] blocks while the queue is full. Each caller then
//! waits on its own [`Completion`] with a deadline. When the deadline passes
//! the caller gets [`DispatchError::Timeout`], but the handler is not
//! cancelled: it still runs and its state changes still land. The consumer
//! drops the late result without error.
//!
//! ## Failure mapping
//!
//! Unknown routes, undecodable bodies, handler errors and panics, and bad
//! results all come back as [`DispatchError`] values; the transport renders
//! every one of them as `false`. A handler returning
//! [`HandlerOutcome::Terminate`](crate::registry::HandlerOutcome::Terminate)
//! stops the consumer and triggers the process stop token.

mod consumer;
mod decode;
mod errors;
pub mod multipart;
mod queue;
mod request;

pub use self::errors::DispatchError;
pub use self::queue::{Completion, ConsumerHandle, Dispatcher, DispatcherSettings};
pub use self::request::{Headers, InboundRequest};

pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

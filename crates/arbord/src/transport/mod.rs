//! HTTP front end of a service.
//!
//! The listener accepts requests on a background thread and hands each one
//! to a [`RequestHandler`] on its own thread. The gateway handler serves the
//! fixed administrative routes itself and forwards everything else to the
//! dispatcher as `(path, headers, body)`.

mod errors;
mod gateway;
mod listener;
mod render;
mod stream;

pub use self::errors::ListenerError;
pub(crate) use self::gateway::HttpGateway;
pub(crate) use self::listener::{HttpListener, ListenerHandle, RequestHandler};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

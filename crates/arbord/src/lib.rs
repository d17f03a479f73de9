//! Service process of an Arbor tree.
//!
//! Every node of a tree runs this crate. A node serves HTTP requests, but
//! never handles two of them at once: the transport turns each request into
//! an [`InboundRequest`] and the [`Dispatcher`] runs handlers strictly one at
//! a time, in arrival order, against the node's [`ServiceContext`]. The
//! context owns the published [`StateStore`], the [`TopologyRegistry`] of
//! ancestors and children, and the [`ChildProcessManager`] that spawns new
//! nodes from uploaded application artifacts.
//!
//! ## Spawning children
//!
//! A child is another process running this binary with a positional launch
//! contract (see [`arbor_config::LaunchArgs`]). The parent validates the
//! request, installs the artifact under `apps/`, launches the child and, for
//! applications that ship self-tests, checks the child over HTTP before it is
//! registered. Any failure rolls the install back and leaves the topology
//! untouched.
//!
//! ## Runtime files
//!
//! Each node writes `run/<name>.lock`, `run/<name>.pid` and
//! `run/<name>.health` under its working directory and logs to
//! `logs/<name>.log`. Health reporting hooks emit structured telemetry for
//! every lifecycle step.

pub mod apps;
mod bootstrap;
pub mod children;
mod client;
mod context;
pub mod dispatch;
mod health;
mod process;
mod registry;
mod state;
mod telemetry;
mod topology;
mod transport;

pub use apps::{AppCatalog, AppEntry, SelfTest};
pub use bootstrap::{
    ArgsConfigLoader, BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader,
    bootstrap_with,
};
pub use children::{ChildDeps, ChildError, ChildProcessManager, DeleteOutcome, SpawnRequest};
pub use client::{ClientError, ClientReply, ServiceClient};
pub use context::ServiceContext;
pub use dispatch::{DispatchError, Dispatcher, DispatcherSettings, Headers, InboundRequest};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownSignal, StopReason, StopToken, run_service};
pub use registry::{
    Handler, HandlerError, HandlerKind, HandlerOutcome, HandlerRegistry, HandlerResult, Reply,
    RouteInfo, RouteNotFound, RouteTable, Upload,
};
pub use state::{CHILDREN_KEY, StateError, StateStore};
pub use telemetry::{TelemetryError, TelemetryHandle, TelemetryTarget};
pub use topology::{ChildRecord, ChildSelector, TopologyRegistry};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;

use std::time::Duration;

mod errors;
mod files;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use launch::run_service;
pub use shutdown::{ShutdownError, ShutdownSignal, StopReason, StopToken};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
/// Time the consumer gets to finish accepted requests once stopping starts.
pub(crate) const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

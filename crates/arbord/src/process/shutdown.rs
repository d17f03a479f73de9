use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{debug, info};

use super::PROCESS_TARGET;

/// Why the service is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The process received a termination signal.
    Signal(i32),
    /// A handler returned `Terminate`.
    Terminated,
    /// A client called `DELETE /stop`.
    StopRoute,
    /// The request queue was closed.
    QueueClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::Terminated => f.write_str("handler requested termination"),
            Self::StopRoute => f.write_str("stop requested over HTTP"),
            Self::QueueClosed => f.write_str("request queue closed"),
        }
    }
}

/// Shared one-shot stop flag. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    inner: Arc<(Mutex<Option<StopReason>>, Condvar)>,
}

impl StopToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` unless a reason is already set and wakes waiters.
    ///
    /// Returns `true` when this call triggered the token.
    pub fn trigger(&self, reason: StopReason) -> bool {
        let (slot, signal) = &*self.inner;
        let mut current = lock(slot);
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        signal.notify_all();
        true
    }

    /// Reason recorded so far.
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        *lock(&self.inner.0)
    }

    /// True once triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Blocks until the token is triggered.
    #[must_use]
    pub fn wait(&self) -> StopReason {
        let (slot, signal) = &*self.inner;
        let mut current = lock(slot);
        loop {
            if let Some(reason) = *current {
                return reason;
            }
            current = signal
                .wait(current)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks up to `timeout` for the token to be triggered.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StopReason> {
        let deadline = Instant::now() + timeout;
        let (slot, signal) = &*self.inner;
        let mut current = lock(slot);
        loop {
            if let Some(reason) = *current {
                return Some(reason);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            current = signal
                .wait_timeout(current, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed, either because an external
    /// notification arrived or because `token` was triggered in-process.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the notification source cannot be set
    /// up.
    fn wait(&self, token: &StopToken) -> Result<StopReason, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal forwarding thread could not be started.
    #[error("failed to start signal thread: {source}")]
    Thread {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self, token: &StopToken) -> Result<StopReason, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let forwarder = token.clone();
        let thread = thread::Builder::new()
            .name(String::from("arbord-signals"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(target: PROCESS_TARGET, signal, "shutdown signal received");
                    forwarder.trigger(StopReason::Signal(signal));
                }
            })
            .map_err(|source| ShutdownError::Thread { source })?;
        let reason = token.wait();
        handle.close();
        if thread.join().is_err() {
            debug!(target: PROCESS_TARGET, "signal thread panicked");
        }
        Ok(reason)
    }
}

//! Shutdown signal driven by the test instead of the OS.

use std::sync::{Arc, Condvar, Mutex};

use signal_hook::consts::signal::SIGTERM;

use crate::process::{ShutdownError, ShutdownSignal, StopReason, StopToken};

/// Completes when the test triggers it or the service stops itself.
#[derive(Debug, Clone, Default)]
pub struct TestShutdownSignal {
    inner: Arc<(Mutex<Option<StopToken>>, Condvar)>,
}

impl TestShutdownSignal {
    /// Stops the service as if it had received `SIGTERM`.
    pub fn trigger(&self) {
        let (slot, ready) = &*self.inner;
        let mut token = slot.lock().expect("shutdown mutex poisoned");
        while token.is_none() {
            token = ready.wait(token).expect("shutdown mutex poisoned");
        }
        if let Some(token) = token.as_ref() {
            token.trigger(StopReason::Signal(SIGTERM));
        }
    }
}

impl ShutdownSignal for TestShutdownSignal {
    fn wait(&self, token: &StopToken) -> Result<StopReason, ShutdownError> {
        {
            let (slot, ready) = &*self.inner;
            *slot.lock().expect("shutdown mutex poisoned") = Some(token.clone());
            ready.notify_all();
        }
        Ok(token.wait())
    }
}

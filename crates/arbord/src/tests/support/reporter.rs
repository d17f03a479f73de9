//! Test double for [`HealthReporter`] that records lifecycle events.

use std::sync::Mutex;

use arbor_config::Config;

use crate::children::ChildError;
use crate::health::HealthReporter;
use crate::process::{LaunchError, StopReason};
use crate::topology::ChildRecord;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    ServiceStarting,
    ServiceReady,
    ServiceFailed(String),
    ServiceStopping(StopReason),
    ChildSpawning { name: String, port: u16 },
    ChildRegistered(String),
    ChildRejected { name: String, message: String },
    ChildRemoved { name: String, process_missing: bool },
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn service_starting(&self, _config: &Config) {
        self.record(HealthEvent::ServiceStarting);
    }

    fn service_ready(&self, _config: &Config) {
        self.record(HealthEvent::ServiceReady);
    }

    fn service_failed(&self, error: &LaunchError) {
        self.record(HealthEvent::ServiceFailed(error.to_string()));
    }

    fn service_stopping(&self, reason: StopReason) {
        self.record(HealthEvent::ServiceStopping(reason));
    }

    fn child_spawning(&self, name: &str, port: u16) {
        self.record(HealthEvent::ChildSpawning {
            name: name.to_owned(),
            port,
        });
    }

    fn child_registered(&self, record: &ChildRecord) {
        self.record(HealthEvent::ChildRegistered(record.name.clone()));
    }

    fn child_rejected(&self, name: &str, error: &ChildError) {
        self.record(HealthEvent::ChildRejected {
            name: name.to_owned(),
            message: error.to_string(),
        });
    }

    fn child_removed(&self, record: &ChildRecord, process_missing: bool) {
        self.record(HealthEvent::ChildRemoved {
            name: record.name.clone(),
            process_missing,
        });
    }
}

//! Structured health reporting for service and child lifecycle events.

use std::sync::Arc;

use arbor_config::Config;

use crate::children::ChildError;
use crate::process::{LaunchError, StopReason};
use crate::topology::ChildRecord;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before the listener is bound.
    fn service_starting(&self, config: &Config);

    /// Invoked once requests are being served.
    fn service_ready(&self, config: &Config);

    /// Invoked when startup or supervision fails.
    fn service_failed(&self, error: &LaunchError);

    /// Invoked when shutdown begins.
    fn service_stopping(&self, reason: StopReason);

    /// Invoked before a child process is launched.
    fn child_spawning(&self, name: &str, port: u16);

    /// Invoked after a child joins the topology.
    fn child_registered(&self, record: &ChildRecord);

    /// Invoked when a spawn request is refused or rolled back.
    fn child_rejected(&self, name: &str, error: &ChildError);

    /// Invoked after a child leaves the topology.
    fn child_removed(&self, record: &ChildRecord, process_missing: bool);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn service_starting(&self, config: &Config) {
        (**self).service_starting(config);
    }

    fn service_ready(&self, config: &Config) {
        (**self).service_ready(config);
    }

    fn service_failed(&self, error: &LaunchError) {
        (**self).service_failed(error);
    }

    fn service_stopping(&self, reason: StopReason) {
        (**self).service_stopping(reason);
    }

    fn child_spawning(&self, name: &str, port: u16) {
        (**self).child_spawning(name, port);
    }

    fn child_registered(&self, record: &ChildRecord) {
        (**self).child_registered(record);
    }

    fn child_rejected(&self, name: &str, error: &ChildError) {
        (**self).child_rejected(name, error);
    }

    fn child_removed(&self, record: &ChildRecord, process_missing: bool) {
        (**self).child_removed(record, process_missing);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn service_starting(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_starting",
            name = %config.name,
            app = %config.app,
            address = %config.address(),
            "starting service"
        );
    }

    fn service_ready(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_ready",
            name = %config.name,
            address = %config.address(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "service ready"
        );
    }

    fn service_failed(&self, error: &LaunchError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "service_failed",
            error = %error,
            "service failed"
        );
    }

    fn service_stopping(&self, reason: StopReason) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopping",
            reason = %reason,
            "service stopping"
        );
    }

    fn child_spawning(&self, name: &str, port: u16) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "child_spawning",
            child = name,
            port,
            "launching child"
        );
    }

    fn child_registered(&self, record: &ChildRecord) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "child_registered",
            child = %record.name,
            app = %record.app,
            pid = record.pid,
            address = %record.address,
            "child registered"
        );
    }

    fn child_rejected(&self, name: &str, error: &ChildError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "child_rejected",
            child = name,
            error = %error,
            "child rejected"
        );
    }

    fn child_removed(&self, record: &ChildRecord, process_missing: bool) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "child_removed",
            child = %record.name,
            pid = record.pid,
            process_missing,
            "child removed"
        );
    }
}

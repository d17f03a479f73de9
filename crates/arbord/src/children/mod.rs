//! Spawning and deleting child services.
//!
//! A spawn installs the uploaded artifact, starts a service process for the
//! application it names, optionally runs the application's self-tests
//! against it, and only then registers the child. Any failure after the
//! artifact landed rolls the install back, so the topology and the apps
//! directory are left as they were.

mod artifact;
mod errors;
mod launcher;
mod probe;

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arbor_config::defaults::{MAX_CHILD_PORT, MIN_CHILD_PORT, ROOT_APP};
use arbor_config::{Config, LaunchArgs, RuntimePaths, Severity};
use camino::Utf8PathBuf;
use tracing::warn;

pub use self::artifact::{ArtifactKind, InstalledArtifact};
pub use self::errors::ChildError;
pub use self::launcher::{ProcessLauncher, SystemLauncher, Termination, resolve_direct_child};
#[cfg(test)]
pub(crate) use self::probe::MockPortProbe;
pub use self::probe::{PortProbe, TcpPortProbe};

use crate::apps::{AppCatalog, AppEntry};
use crate::client::ServiceClient;
use crate::health::HealthReporter;
use crate::registry::Upload;
use crate::topology::{ChildRecord, ChildSelector, TopologyRegistry};

pub(crate) const CHILDREN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::children");

/// Delay between launching a child and probing it when self-tests run.
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_secs(1);

/// Arguments of a spawn request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Unique name of the new child.
    pub name: String,
    /// Port the child binds.
    pub port: u16,
    /// Log severity of the child.
    pub severity: Severity,
    /// Serve the child over TLS using the parent's certificate.
    pub secure: bool,
    /// Uploaded artifact; only the file part is used.
    pub artifact: Upload,
}

/// What a delete did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// The record that was removed.
    pub record: ChildRecord,
    /// True when the process had already exited.
    pub process_missing: bool,
    /// Artifact path deleted alongside the child.
    pub artifacts_removed: Option<Utf8PathBuf>,
}

/// Collaborators of the child manager.
pub struct ChildDeps {
    /// Starts and stops processes.
    pub launcher: Box<dyn ProcessLauncher>,
    /// Detects ports that are already bound.
    pub probe: Box<dyn PortProbe>,
    /// Receives lifecycle events.
    pub reporter: Arc<dyn HealthReporter>,
    /// Delay before self-tests run against a new child.
    pub startup_grace: Duration,
}

impl ChildDeps {
    /// Production collaborators for a service configured by `config`.
    ///
    /// # Errors
    ///
    /// Returns the IO error raised while locating the current executable.
    pub fn system(config: &Config, reporter: Arc<dyn HealthReporter>) -> std::io::Result<Self> {
        Ok(Self {
            launcher: Box::new(SystemLauncher::from_env()?),
            probe: Box::new(TcpPortProbe::for_host(config.host.as_str())),
            reporter,
            startup_grace: DEFAULT_STARTUP_GRACE,
        })
    }
}

/// Owns the lifecycle of this service's children.
pub struct ChildProcessManager {
    config: Config,
    paths: RuntimePaths,
    catalog: Arc<AppCatalog>,
    launcher: Box<dyn ProcessLauncher>,
    probe: Box<dyn PortProbe>,
    reporter: Arc<dyn HealthReporter>,
    startup_grace: Duration,
}

impl fmt::Debug for ChildProcessManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildProcessManager")
            .field("parent", &self.config.name)
            .field("apps_dir", &self.paths.apps_dir())
            .field("startup_grace", &self.startup_grace)
            .finish_non_exhaustive()
    }
}

impl ChildProcessManager {
    /// Creates a manager spawning children of the service configured by
    /// `config`.
    #[must_use]
    pub fn new(config: &Config, catalog: Arc<AppCatalog>, deps: ChildDeps) -> Self {
        let ChildDeps {
            launcher,
            probe,
            reporter,
            startup_grace,
        } = deps;
        Self {
            config: config.clone(),
            paths: RuntimePaths::from_config(config),
            catalog,
            launcher,
            probe,
            reporter,
            startup_grace,
        }
    }

    /// Validates, installs, launches and registers a new child.
    ///
    /// # Errors
    ///
    /// Returns [`ChildError`]; the topology is unchanged on every error.
    pub fn spawn_child(
        &mut self,
        topology: &mut TopologyRegistry,
        request: &SpawnRequest,
    ) -> Result<ChildRecord, ChildError> {
        let result = self.try_spawn(topology, request);
        match &result {
            Ok(record) => self.reporter.child_registered(record),
            Err(error) => self.reporter.child_rejected(&request.name, error),
        }
        result
    }

    /// Stops the selected child, removes its artifacts and unregisters it.
    ///
    /// # Errors
    ///
    /// Returns [`ChildError::NotFound`] when nothing matches the selector and
    /// [`ChildError::Signal`] when the process cannot be signalled.
    pub fn delete_child(
        &mut self,
        topology: &mut TopologyRegistry,
        selector: &ChildSelector,
    ) -> Result<DeleteOutcome, ChildError> {
        let record = topology
            .resolve(selector)
            .cloned()
            .ok_or_else(|| ChildError::not_found(selector))?;
        let process_missing = self.launcher.terminate(record.pid)? == Termination::AlreadyGone;
        if process_missing {
            warn!(
                target: CHILDREN_TARGET,
                name = %record.name,
                pid = record.pid,
                "child process was already gone"
            );
        }
        let artifacts_removed = self.remove_artifacts(topology, &record);
        topology.remove(&record.name);
        self.reporter.child_removed(&record, process_missing);
        Ok(DeleteOutcome {
            record,
            process_missing,
            artifacts_removed,
        })
    }

    fn try_spawn(
        &mut self,
        topology: &mut TopologyRegistry,
        request: &SpawnRequest,
    ) -> Result<ChildRecord, ChildError> {
        self.validate(topology, request)?;
        let installed = artifact::install(
            self.paths.apps_dir(),
            &request.artifact.filename,
            &request.artifact.data,
        )?;
        let catalog = Arc::clone(&self.catalog);
        let Some(entry) = catalog.get(&installed.app) else {
            self.discard(topology, &installed);
            return Err(ChildError::NoQualifyingClass { app: installed.app });
        };
        match self.launch_checked(entry, request) {
            Ok(record) => {
                topology.register(record.clone());
                Ok(record)
            }
            Err(error) => {
                self.discard(topology, &installed);
                Err(error)
            }
        }
    }

    fn validate(&self, topology: &TopologyRegistry, request: &SpawnRequest) -> Result<(), ChildError> {
        let name = request.name.as_str();
        if name.is_empty() || name.chars().any(char::is_whitespace) {
            return Err(ChildError::validation(format!(
                "child name '{name}' must be non-empty and contain no whitespace"
            )));
        }
        if name.starts_with('-') {
            return Err(ChildError::validation(format!(
                "child name '{name}' would be read as an option"
            )));
        }
        let port = request.port;
        if port <= MIN_CHILD_PORT || port >= MAX_CHILD_PORT {
            return Err(ChildError::validation(format!(
                "port {port} is outside {MIN_CHILD_PORT}..{MAX_CHILD_PORT}"
            )));
        }
        if topology.port_taken(port) || self.probe.is_listening(port) {
            return Err(ChildError::validation(format!("port {port} is already bound")));
        }
        if topology.find_by_name(name).is_some() {
            return Err(ChildError::validation(format!("a child named '{name}' already exists")));
        }
        if !request.artifact.has_file() {
            return Err(ChildError::validation("no artifact was uploaded"));
        }
        if request.secure && self.config.tls.is_none() {
            return Err(ChildError::validation(
                "a secure child needs a parent serving over TLS",
            ));
        }
        Ok(())
    }

    fn launch_checked(
        &mut self,
        entry: &AppEntry,
        request: &SpawnRequest,
    ) -> Result<ChildRecord, ChildError> {
        let version = artifact::read_version(self.paths.apps_dir(), entry.id)
            .unwrap_or_else(|| entry.version.to_owned());
        let args = self.child_args(entry, request, &version);
        let address = args
            .clone()
            .into_config()
            .map(|config| config.address())
            .map_err(|error| ChildError::validation(error.to_string()))?;
        self.reporter.child_spawning(&request.name, request.port);
        let pid = self.launcher.launch(&args)?;
        if !entry.self_tests.is_empty() {
            if let Err(reason) = self.health_check(entry, request.port, &address) {
                self.stop_quietly(pid);
                return Err(ChildError::HealthCheckFailed {
                    name: request.name.clone(),
                    reason,
                });
            }
        }
        Ok(ChildRecord {
            name: request.name.clone(),
            app: entry.id.to_owned(),
            handler_class: entry.qualified_class(),
            version,
            pid,
            address,
        })
    }

    fn child_args(&self, entry: &AppEntry, request: &SpawnRequest, version: &str) -> LaunchArgs {
        let parent = &self.config;
        let ancestry = parent.ancestry.extended(&parent.name, &parent.address());
        let tls = parent.tls.as_ref().filter(|_| request.secure);
        LaunchArgs {
            name: request.name.clone(),
            app: entry.id.to_owned(),
            host: parent.host.clone(),
            port: request.port,
            severity: request.severity,
            ancestry: ancestry.to_string(),
            version: version.to_owned(),
            security: tls.is_some(),
            certfile: tls.map(|files| files.certfile.clone()),
            keyfile: tls.map(|files| files.keyfile.clone()),
            log_format: parent.log_format,
            queue_capacity: parent.queue_capacity,
            request_deadline_ms: u64::try_from(parent.request_deadline.as_millis())
                .unwrap_or(u64::MAX),
            work_dir: parent.work_dir.clone(),
        }
    }

    fn health_check(&self, entry: &AppEntry, port: u16, address: &str) -> Result<(), String> {
        thread::sleep(self.startup_grace);
        if !self.probe.is_listening(port) {
            return Err(format!("nothing listens on port {port}"));
        }
        let client = ServiceClient::new(address)
            .map_err(|error| error.to_string())?
            .without_tls_verification();
        for test in entry.self_tests {
            (test.run)(&client).map_err(|reason| format!("self-test '{}': {reason}", test.name))?;
        }
        Ok(())
    }

    fn stop_quietly(&mut self, pid: u32) {
        if let Err(error) = self.launcher.terminate(pid) {
            warn!(target: CHILDREN_TARGET, pid, %error, "failed to stop rejected child");
        }
    }

    fn discard(&self, topology: &TopologyRegistry, installed: &InstalledArtifact) {
        if topology.app_in_use(&installed.app, "") {
            return;
        }
        if let Err(error) = installed.remove() {
            warn!(
                target: CHILDREN_TARGET,
                app = %installed.app,
                %error,
                "failed to roll back artifact"
            );
        }
    }

    fn remove_artifacts(&self, topology: &TopologyRegistry, record: &ChildRecord) -> Option<Utf8PathBuf> {
        if record.app == ROOT_APP || topology.app_in_use(&record.app, &record.name) {
            return None;
        }
        artifact::remove_app(self.paths.apps_dir(), &record.app).unwrap_or_else(|error| {
            warn!(
                target: CHILDREN_TARGET,
                app = %record.app,
                %error,
                "failed to remove child artifacts"
            );
            None
        })
    }
}

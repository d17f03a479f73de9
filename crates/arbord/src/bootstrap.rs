//! Service bootstrap: configuration, runtime directories and telemetry.

use arbor_config::{Config, ConfigError, LaunchArgs, RuntimePaths, RuntimePathsError};
use thiserror::Error;

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle, TelemetryTarget};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the service configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the configuration is invalid.
    fn load(&self) -> Result<Config, ConfigError>;
}

/// Loader validating parsed command-line arguments.
#[derive(Debug, Clone)]
pub struct ArgsConfigLoader {
    args: LaunchArgs,
}

impl ArgsConfigLoader {
    /// Wraps parsed arguments.
    #[must_use]
    pub const fn new(args: LaunchArgs) -> Self {
        Self { args }
    }
}

impl ConfigLoader for ArgsConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        self.args.clone().into_config()
    }
}

/// Loader returning a fixed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: ConfigError,
    },
    /// The runtime directories could not be created.
    #[error("failed to prepare runtime directories: {source}")]
    RuntimePaths {
        /// Underlying filesystem error.
        #[source]
        source: RuntimePathsError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Result of a successful bootstrap.
#[derive(Debug)]
pub struct Bootstrapped {
    config: Config,
    paths: RuntimePaths,
    telemetry: TelemetryHandle,
}

impl Bootstrapped {
    /// The validated configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Runtime directory layout.
    #[must_use]
    pub const fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }
}

/// Loads configuration, prepares `apps/`, `logs/` and `run/`, and installs
/// telemetry writing to the service log file.
///
/// # Errors
///
/// Returns [`BootstrapError`] describing the first failing step.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: &dyn HealthReporter,
) -> Result<Bootstrapped, BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let paths = RuntimePaths::from_config(&config);
    paths
        .prepare()
        .map_err(|source| BootstrapError::RuntimePaths { source })?;
    let telemetry = telemetry::initialise(&config, &TelemetryTarget::File(paths.log_path()))
        .map_err(|source| BootstrapError::Telemetry { source })?;
    reporter.service_starting(&config);
    Ok(Bootstrapped {
        config,
        paths,
        telemetry,
    })
}

//! Immutable service configuration.

use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Serialize, Serializer};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::ancestry::{Ancestry, AncestryError};
use crate::defaults::{
    DEFAULT_HOST, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_DEADLINE, DEFAULT_VERSION, ROOT_APP,
};
use crate::logging::LogFormat;
use crate::severity::Severity;

/// Default port for a root service started without arguments in tests.
const DEFAULT_PORT: u16 = 8000;

/// URL scheme a service is reachable under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

/// Certificate and key used when serving over TLS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TlsFiles {
    /// PEM encoded certificate chain.
    pub certfile: Utf8PathBuf,
    /// PEM encoded private key.
    pub keyfile: Utf8PathBuf,
}

/// Configuration of one service process, fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Unique name of the service within its tree.
    pub name: String,
    /// Application identifier installed in this process.
    pub app: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Log severity threshold.
    pub severity: Severity,
    /// Chain of ancestors, oldest first.
    pub ancestry: Ancestry,
    /// Application version.
    pub version: String,
    /// TLS material when the service is started with `--security`.
    pub tls: Option<TlsFiles>,
    /// Output format of the service log.
    pub log_format: LogFormat,
    /// Capacity of the request queue.
    pub queue_capacity: usize,
    /// Deadline a caller waits for its request.
    #[serde(rename = "request_deadline_ms", serialize_with = "as_millis")]
    pub request_deadline: Duration,
    /// Directory holding `apps/`, `logs/` and `run/`.
    pub work_dir: Utf8PathBuf,
}

impl Config {
    /// Scheme implied by the TLS settings.
    #[must_use]
    pub const fn scheme(&self) -> Scheme {
        if self.tls.is_some() {
            Scheme::Https
        } else {
            Scheme::Http
        }
    }

    /// Base address peers use to reach this service.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}://{}:{}", self.scheme(), self.host, self.port)
    }

    /// Filter directive derived from the severity.
    #[must_use]
    pub const fn log_filter(&self) -> &'static str {
        self.severity.log_filter()
    }

    /// Configured log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// True when this process is the root of its tree.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.ancestry.is_empty()
    }

    /// Checks invariants the argument parser cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the name is empty or contains whitespace,
    /// or when the queue capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidName {
                name: self.name.clone(),
            });
        }
        if self.app.is_empty() || self.app.chars().any(char::is_whitespace) {
            return Err(ConfigError::InvalidApp {
                app: self.app.clone(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: String::from("arbor"),
            app: String::from(ROOT_APP),
            host: String::from(DEFAULT_HOST),
            port: DEFAULT_PORT,
            severity: Severity::default(),
            ancestry: Ancestry::root(),
            version: String::from(DEFAULT_VERSION),
            tls: None,
            log_format: LogFormat::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_deadline: DEFAULT_REQUEST_DEADLINE,
            work_dir: Utf8PathBuf::from("."),
        }
    }
}

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}

/// Errors raised while turning launch arguments into a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The service name was empty or contained whitespace.
    #[error("service name '{name}' must be non-empty and contain no whitespace")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// The application identifier was empty or contained whitespace.
    #[error("application '{app}' must be non-empty and contain no whitespace")]
    InvalidApp {
        /// Rejected identifier.
        app: String,
    },
    /// The ancestry argument did not decode.
    #[error("invalid ancestry argument: {source}")]
    Ancestry {
        /// Underlying decode error.
        #[source]
        source: AncestryError,
    },
    /// `--security` was given without both TLS files.
    #[error("--security requires both --certfile and --keyfile")]
    MissingTlsFiles,
    /// The request queue would never admit a request.
    #[error("queue capacity must be at least one")]
    ZeroQueueCapacity,
}

impl From<AncestryError> for ConfigError {
    fn from(source: AncestryError) -> Self {
        Self::Ancestry { source }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn address_follows_tls_setting() {
        let mut config = Config {
            host: String::from("localhost"),
            port: 8100,
            ..Config::default()
        };
        assert_eq!(config.address(), "http://localhost:8100");
        config.tls = Some(TlsFiles {
            certfile: Utf8PathBuf::from("cert.pem"),
            keyfile: Utf8PathBuf::from("key.pem"),
        });
        assert_eq!(config.address(), "https://localhost:8100");
    }

    #[rstest]
    #[case("")]
    #[case("two words")]
    #[case("tab\tname")]
    fn rejects_names_with_blanks(#[case] name: &str) {
        let config = Config {
            name: name.to_owned(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidName { .. })
        ));
    }

    #[test]
    fn default_is_a_valid_root() {
        let config = Config::default();
        config.validate().expect("default config should validate");
        assert!(config.is_root());
    }
}

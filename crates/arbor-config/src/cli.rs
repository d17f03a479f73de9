//! Command-line launch contract.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use clap::Parser;

use crate::ancestry::Ancestry;
use crate::config::{Config, ConfigError, TlsFiles};
use crate::defaults::{
    DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_DEADLINE_MS, DEFAULT_VERSION, WORK_DIR_ENV,
};
use crate::logging::LogFormat;
use crate::severity::Severity;

/// Arguments every service process is started with.
///
/// Parents build the argument vector for their children with
/// [`LaunchArgs::to_args`], so the two directions stay in step.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "arbord", version, about = "Arbor service process")]
pub struct LaunchArgs {
    /// Unique service name.
    pub name: String,
    /// Application identifier to install.
    pub app: String,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Log severity (debug, info, warning, error, critical).
    #[arg(default_value_t = Severity::Debug)]
    pub severity: Severity,
    /// JSON array of `[name, address]` ancestors, oldest first.
    #[arg(default_value = "[]")]
    pub ancestry: String,
    /// Application version.
    #[arg(id = "vsn", long = "vsn", default_value = DEFAULT_VERSION)]
    pub version: String,
    /// Serve over TLS.
    #[arg(long)]
    pub security: bool,
    /// Certificate chain used with `--security`.
    #[arg(long)]
    pub certfile: Option<Utf8PathBuf>,
    /// Private key used with `--security`.
    #[arg(long)]
    pub keyfile: Option<Utf8PathBuf>,
    /// Log output format.
    #[arg(long, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
    /// Capacity of the request queue.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,
    /// Deadline a caller waits for its request, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_REQUEST_DEADLINE_MS)]
    pub request_deadline_ms: u64,
    /// Directory holding `apps/`, `logs/` and `run/`.
    #[arg(long, env = WORK_DIR_ENV, default_value = ".")]
    pub work_dir: Utf8PathBuf,
}

impl LaunchArgs {
    /// Parses arguments from an iterator, typically `std::env::args_os()`.
    ///
    /// # Errors
    ///
    /// Returns the `clap` error describing the offending argument.
    pub fn parse_from_iter<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(args)
    }

    /// Validates the arguments into a [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the ancestry does not decode, the TLS
    /// files are incomplete, or the resulting configuration is invalid.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let ancestry: Ancestry = self.ancestry.parse()?;
        let tls = if self.security {
            match (self.certfile, self.keyfile) {
                (Some(certfile), Some(keyfile)) => Some(TlsFiles { certfile, keyfile }),
                _ => return Err(ConfigError::MissingTlsFiles),
            }
        } else {
            None
        };
        let config = Config {
            name: self.name,
            app: self.app,
            host: self.host,
            port: self.port,
            severity: self.severity,
            ancestry,
            version: self.version,
            tls,
            log_format: self.log_format,
            queue_capacity: self.queue_capacity,
            request_deadline: std::time::Duration::from_millis(self.request_deadline_ms),
            work_dir: self.work_dir,
        };
        config.validate()?;
        Ok(config)
    }

    /// Renders the arguments back into an argument vector.
    ///
    /// The program name is not included.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.name.clone(),
            self.app.clone(),
            self.host.clone(),
            self.port.to_string(),
            self.severity.to_string(),
            self.ancestry.clone(),
            format!("--vsn={}", self.version),
            format!("--log-format={}", self.log_format),
            format!("--queue-capacity={}", self.queue_capacity),
            format!("--request-deadline-ms={}", self.request_deadline_ms),
            format!("--work-dir={}", self.work_dir),
        ];
        if self.security {
            args.push(String::from("--security"));
        }
        if let Some(certfile) = &self.certfile {
            args.push(format!("--certfile={certfile}"));
        }
        if let Some(keyfile) = &self.keyfile {
            args.push(format!("--keyfile={keyfile}"));
        }
        args
    }
}

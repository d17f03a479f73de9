//! Error surface of child lifecycle operations.

use std::io;

use camino::Utf8PathBuf;
use nix::errno::Errno;
use thiserror::Error;

use crate::topology::ChildSelector;

/// Errors raised while spawning or deleting children.
///
/// Every failure leaves the topology as it was before the call.
#[derive(Debug, Error)]
pub enum ChildError {
    /// The request was rejected before anything was touched.
    #[error("invalid child request: {message}")]
    Validation { message: String },

    /// The artifact names no registered application.
    #[error("no registered application qualifies for '{app}'")]
    NoQualifyingClass { app: String },

    /// The process could not be started or its pid not resolved.
    #[error("failed to spawn child '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The child started but failed its self-tests.
    #[error("child '{name}' failed its health check: {reason}")]
    HealthCheckFailed { name: String, reason: String },

    /// No child matches the selector.
    #[error("no child matches {selector}")]
    NotFound { selector: String },

    /// Signalling the process failed for a reason other than it being gone.
    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: Errno,
    },

    /// Writing or removing an artifact failed.
    #[error("artifact IO failed for '{path}': {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    /// The uploaded archive could not be read.
    #[error("unreadable archive: {source}")]
    Archive {
        #[source]
        source: zip::result::ZipError,
    },
}

impl ChildError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a spawn failure.
    pub fn spawn_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-found error for `selector`.
    #[must_use]
    pub fn not_found(selector: &ChildSelector) -> Self {
        Self::NotFound {
            selector: selector.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<zip::result::ZipError> for ChildError {
    fn from(source: zip::result::ZipError) -> Self {
        Self::Archive { source }
    }
}

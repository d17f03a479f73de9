//! Error types for the HTTP listener.

use std::error::Error as StdError;
use std::io;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced while binding or running the HTTP listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind HTTP listener at {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("failed to read TLS file '{path}': {source}")]
    TlsFile {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start listener thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("listener thread panicked")]
    ThreadPanic,
}

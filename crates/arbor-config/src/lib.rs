//! Launch configuration shared by arbor service processes.
//!
//! Every service in a tree is started by the same binary with the same
//! positional launch contract: a name, the application identifier, the bind
//! host and port, a log severity, and the JSON encoded ancestry chain. This
//! crate parses that contract, validates it into an immutable [`Config`], and
//! derives the on-disk layout ([`RuntimePaths`]) that parents and children
//! agree on.

mod ancestry;
mod cli;
mod config;
pub mod defaults;
mod logging;
mod runtime;
mod severity;

pub use ancestry::{Ancestor, Ancestry, AncestryError};
pub use cli::LaunchArgs;
pub use config::{Config, ConfigError, Scheme, TlsFiles};
pub use logging::{LogFormat, LogFormatParseError};
pub use runtime::{RuntimePaths, RuntimePathsError};
pub use severity::{Severity, SeverityParseError};

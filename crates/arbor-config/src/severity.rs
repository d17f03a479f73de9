//! Log severities accepted by the launch contract.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Severity threshold for a service log.
///
/// The names follow the levels operators pass on the command line. `Warning`
/// and `Critical` have no direct `tracing` level and map onto `warn` and
/// `error` respectively.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    Deserialize,
    Serialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    EnumString,
    Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Severity {
    /// Everything, including request tracing.
    #[default]
    Debug,
    /// Lifecycle events.
    Info,
    /// Recoverable problems.
    #[strum(to_string = "warning", serialize = "warn")]
    Warning,
    /// Failed operations.
    Error,
    /// Failures that stop the service.
    Critical,
}

impl Severity {
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub const fn log_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

/// Errors encountered while parsing a [`Severity`] from text.
pub type SeverityParseError = strum::ParseError;

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("debug", Severity::Debug)]
    #[case("INFO", Severity::Info)]
    #[case("warn", Severity::Warning)]
    #[case("warning", Severity::Warning)]
    #[case("critical", Severity::Critical)]
    fn parses_operator_spellings(#[case] text: &str, #[case] expected: Severity) {
        assert_eq!(Severity::from_str(text).expect("parse severity"), expected);
    }

    #[test]
    fn critical_maps_onto_error_filter() {
        assert_eq!(Severity::Critical.log_filter(), "error");
        assert_eq!(Severity::Warning.to_string(), "warning");
    }

    #[test]
    fn rejects_unknown_levels() {
        assert!(Severity::from_str("verbose").is_err());
    }
}

//! Ancestry chain carried from the root service down to each child.
//!
//! On the wire the chain is a JSON array of `[name, address]` pairs, oldest
//! ancestor first. The root service has an empty chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single `(name, address)` entry in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Ancestor {
    /// Service name of the ancestor.
    pub name: String,
    /// Base address the ancestor listens on.
    pub address: String,
}

impl Ancestor {
    /// Builds an ancestor entry.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

impl From<(String, String)> for Ancestor {
    fn from((name, address): (String, String)) -> Self {
        Self { name, address }
    }
}

impl From<Ancestor> for (String, String) {
    fn from(ancestor: Ancestor) -> Self {
        (ancestor.name, ancestor.address)
    }
}

/// Ordered ancestors from the root to the immediate parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ancestry(Vec<Ancestor>);

impl Ancestry {
    /// Chain of the root service.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Chain handed to a child of the service `name` listening on `address`.
    #[must_use]
    pub fn extended(&self, name: &str, address: &str) -> Self {
        let mut ancestors = self.0.clone();
        ancestors.push(Ancestor::new(name, address));
        Self(ancestors)
    }

    /// Immediate parent, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Ancestor> {
        self.0.last()
    }

    /// Iterates from the root towards the parent.
    pub fn iter(&self) -> impl Iterator<Item = &Ancestor> {
        self.0.iter()
    }

    /// Number of ancestors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the root service.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Ancestor> for Ancestry {
    fn from_iter<I: IntoIterator<Item = Ancestor>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Errors raised while decoding an ancestry chain.
#[derive(Debug, Error)]
pub enum AncestryError {
    /// The text was not a JSON array of `[name, address]` pairs.
    #[error("ancestry must be a JSON array of [name, address] pairs: {source}")]
    Malformed {
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl FromStr for Ancestry {
    type Err = AncestryError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Self::root());
        }
        serde_json::from_str(trimmed).map_err(|source| AncestryError::Malformed { source })
    }
}

/// Writes the compact wire form.
impl fmt::Display for Ancestry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

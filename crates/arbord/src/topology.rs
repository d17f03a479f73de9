//! Ancestry and live children of one service.

use std::fmt;

use arbor_config::Ancestry;
use serde::{Deserialize, Serialize};
use url::Url;

/// Metadata of one supervised child service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRecord {
    /// Unique service name.
    pub name: String,
    /// Application identifier installed in the child.
    pub app: String,
    /// Qualified handler class, `apps.<app>.<Class>`.
    pub handler_class: String,
    /// Application version.
    pub version: String,
    /// Resolved OS process id of the service.
    pub pid: u32,
    /// Base address of the child.
    pub address: String,
}

impl ChildRecord {
    /// Port parsed from the child's address.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        Url::parse(&self.address).ok()?.port_or_known_default()
    }
}

/// Selects a child by name, falling back to pid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildSelector {
    /// Service name; takes precedence when it resolves.
    pub name: Option<String>,
    /// Process id.
    pub pid: Option<u32>,
}

impl ChildSelector {
    /// Selects by name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            pid: None,
        }
    }

    /// Selects by process id.
    #[must_use]
    pub const fn by_pid(pid: u32) -> Self {
        Self {
            name: None,
            pid: Some(pid),
        }
    }
}

impl fmt::Display for ChildSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.name, self.pid) {
            (Some(name), Some(pid)) => write!(f, "name '{name}' or pid {pid}"),
            (Some(name), None) => write!(f, "name '{name}'"),
            (None, Some(pid)) => write!(f, "pid {pid}"),
            (None, None) => f.write_str("an empty selector"),
        }
    }
}

/// Ancestry chain plus the ordered live children.
///
/// Lookups are linear scans; a service supervises tens of children at most.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyRegistry {
    ancestry: Ancestry,
    children: Vec<ChildRecord>,
}

impl TopologyRegistry {
    /// Builds a registry with no children.
    #[must_use]
    pub const fn new(ancestry: Ancestry) -> Self {
        Self {
            ancestry,
            children: Vec::new(),
        }
    }

    /// Ancestors of this service, oldest first.
    #[must_use]
    pub const fn ancestry(&self) -> &Ancestry {
        &self.ancestry
    }

    /// Live children in registration order.
    #[must_use]
    pub fn children(&self) -> &[ChildRecord] {
        &self.children
    }

    /// Child named `name`.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<&ChildRecord> {
        self.children.iter().find(|child| child.name == name)
    }

    /// Child running as `pid`.
    #[must_use]
    pub fn find_by_pid(&self, pid: u32) -> Option<&ChildRecord> {
        self.children.iter().find(|child| child.pid == pid)
    }

    /// True when a registered child listens on `port`.
    #[must_use]
    pub fn port_taken(&self, port: u16) -> bool {
        self.children.iter().any(|child| child.port() == Some(port))
    }

    /// True when any child other than `except` runs `app`.
    #[must_use]
    pub fn app_in_use(&self, app: &str, except: &str) -> bool {
        self.children
            .iter()
            .any(|child| child.app == app && child.name != except)
    }

    /// Resolves a selector, trying the name before the pid.
    #[must_use]
    pub fn resolve(&self, selector: &ChildSelector) -> Option<&ChildRecord> {
        selector
            .name
            .as_deref()
            .and_then(|name| self.find_by_name(name))
            .or_else(|| selector.pid.and_then(|pid| self.find_by_pid(pid)))
    }

    pub(crate) fn register(&mut self, record: ChildRecord) {
        self.children.push(record);
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<ChildRecord> {
        let index = self.children.iter().position(|child| child.name == name)?;
        Some(self.children.remove(index))
    }
}

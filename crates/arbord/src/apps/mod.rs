//! Applications this binary can run, registered explicitly.
//!
//! A service process is started with an application identifier. The catalog
//! maps that identifier to the routes the application installs and the
//! self-tests a parent runs against a freshly spawned instance.

mod branch;
mod spawner;

use std::collections::BTreeMap;
use std::fmt;

use arbor_config::defaults::ROOT_APP;

use crate::client::ServiceClient;
use crate::registry::HandlerRegistry;

/// A check run by a parent against a newly spawned child.
#[derive(Clone, Copy)]
pub struct SelfTest {
    /// Short label used in failure reports.
    pub name: &'static str,
    /// The check itself.
    pub run: fn(&ServiceClient) -> Result<(), String>,
}

impl fmt::Debug for SelfTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfTest").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Registration record of one application.
#[derive(Clone, Copy)]
pub struct AppEntry {
    /// Application identifier, also the artifact name.
    pub id: &'static str,
    /// Handler class name.
    pub handler_class: &'static str,
    /// Version reported when the artifact declares none.
    pub version: &'static str,
    /// Registers the application's routes.
    pub install: fn(&mut HandlerRegistry),
    /// Checks a parent runs after spawning the application.
    pub self_tests: &'static [SelfTest],
}

impl AppEntry {
    /// Qualified identifier, `apps.<app>.<Class>`.
    #[must_use]
    pub fn qualified_class(&self) -> String {
        format!("apps.{}.{}", self.id, self.handler_class)
    }
}

impl fmt::Debug for AppEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppEntry")
            .field("id", &self.id)
            .field("handler_class", &self.handler_class)
            .field("version", &self.version)
            .field("self_tests", &self.self_tests)
            .finish_non_exhaustive()
    }
}

/// Table of known applications keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct AppCatalog {
    entries: BTreeMap<&'static str, AppEntry>,
}

impl AppCatalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The applications shipped with this binary.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with(spawner::ENTRY).with(branch::ENTRY)
    }

    /// Adds `entry`, replacing any entry with the same identifier.
    #[must_use]
    pub fn with(mut self, entry: AppEntry) -> Self {
        self.entries.insert(entry.id, entry);
        self
    }

    /// Entry registered as `app`.
    #[must_use]
    pub fn get(&self, app: &str) -> Option<&AppEntry> {
        self.entries.get(app)
    }

    /// The protected root application.
    #[must_use]
    pub fn root(&self) -> Option<&AppEntry> {
        self.get(ROOT_APP)
    }

    /// Registered identifiers in order.
    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }
}

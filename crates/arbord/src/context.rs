//! Mutable service context owned by the dispatch consumer.

use std::sync::Arc;

use arbor_config::{Config, RuntimePaths};

use crate::apps::AppCatalog;
use crate::children::{ChildDeps, ChildError, ChildProcessManager, DeleteOutcome, SpawnRequest};
use crate::state::{CHILDREN_KEY, StateStore};
use crate::topology::{ChildRecord, ChildSelector, TopologyRegistry};

/// Everything a handler may read or change.
///
/// Exactly one instance exists per service and only the dispatch consumer
/// holds it, so handlers never observe concurrent mutation.
#[derive(Debug)]
pub struct ServiceContext {
    config: Config,
    paths: RuntimePaths,
    state: StateStore,
    topology: TopologyRegistry,
    children: ChildProcessManager,
    catalog: Arc<AppCatalog>,
}

impl ServiceContext {
    /// Builds the context of the service configured by `config`.
    #[must_use]
    pub fn new(config: Config, catalog: Arc<AppCatalog>, deps: ChildDeps) -> Self {
        let paths = RuntimePaths::from_config(&config);
        let topology = TopologyRegistry::new(config.ancestry.clone());
        let children = ChildProcessManager::new(&config, Arc::clone(&catalog), deps);
        let mut context = Self {
            config,
            paths,
            state: StateStore::new(),
            topology,
            children,
            catalog,
        };
        context.sync_children();
        context
    }

    /// Configuration of this service.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Filesystem layout of this service.
    #[must_use]
    pub const fn paths(&self) -> &RuntimePaths {
        &self.paths
    }

    /// Published state.
    #[must_use]
    pub const fn state(&self) -> &StateStore {
        &self.state
    }

    /// Published state, writable.
    pub const fn state_mut(&mut self) -> &mut StateStore {
        &mut self.state
    }

    /// Ancestry and live children.
    #[must_use]
    pub const fn topology(&self) -> &TopologyRegistry {
        &self.topology
    }

    /// Applications this binary can run.
    #[must_use]
    pub fn catalog(&self) -> &AppCatalog {
        &self.catalog
    }

    /// Spawns a child and republishes the children list.
    ///
    /// # Errors
    ///
    /// Returns [`ChildError`] when the spawn is refused or rolled back.
    pub fn spawn_child(&mut self, request: &SpawnRequest) -> Result<ChildRecord, ChildError> {
        let record = self.children.spawn_child(&mut self.topology, request)?;
        self.sync_children();
        Ok(record)
    }

    /// Deletes a child and republishes the children list.
    ///
    /// # Errors
    ///
    /// Returns [`ChildError`] when no child matches or signalling fails.
    pub fn delete_child(&mut self, selector: &ChildSelector) -> Result<DeleteOutcome, ChildError> {
        let outcome = self.children.delete_child(&mut self.topology, selector)?;
        self.sync_children();
        Ok(outcome)
    }

    fn sync_children(&mut self) {
        let children = self
            .topology
            .children()
            .iter()
            .map(|child| serde_json::to_value(child).unwrap_or_default())
            .collect();
        self.state
            .put_reserved(CHILDREN_KEY, serde_json::Value::Array(children));
    }
}

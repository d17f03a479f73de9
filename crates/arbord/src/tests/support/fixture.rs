//! Service context built over a temporary working directory.

use std::sync::Arc;

use arbor_config::{Config, RuntimePaths};
use camino::Utf8PathBuf;
use tempfile::TempDir;

use crate::apps::{AppCatalog, AppEntry};
use crate::children::{ChildDeps, MockPortProbe, PortProbe};
use crate::context::ServiceContext;
use crate::registry::{HandlerOutcome, HandlerRegistry};

use super::{FakeLauncher, RecordingHealthReporter};

/// Application without self-tests, so spawning it needs no live child.
const LEAF: AppEntry = AppEntry {
    id: "leaf",
    handler_class: "Leaf",
    version: "0.3.1",
    install: install_leaf,
    self_tests: &[],
};

fn install_leaf(registry: &mut HandlerRegistry) {
    registry.unary("/leaf", |_, _, _| Ok(HandlerOutcome::reply("leaf")));
}

/// Builtin applications plus `leaf`.
fn leaf_catalog() -> AppCatalog {
    AppCatalog::builtin().with(LEAF)
}

/// A root service configuration rooted in its own temporary directory.
pub struct ServiceFixture {
    _dir: TempDir,
    pub config: Config,
    pub launcher: FakeLauncher,
    pub reporter: Arc<RecordingHealthReporter>,
    pub catalog: Arc<AppCatalog>,
}

impl ServiceFixture {
    pub fn new() -> Self {
        Self::with_launcher(FakeLauncher::default())
    }

    pub fn with_launcher(launcher: FakeLauncher) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let work_dir =
            Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("temp dir is UTF-8");
        let config = Config {
            name: String::from("root"),
            port: 0,
            work_dir,
            ..Config::default()
        };
        RuntimePaths::from_config(&config)
            .prepare()
            .expect("prepare runtime dirs");
        Self {
            _dir: dir,
            config,
            launcher,
            reporter: Arc::new(RecordingHealthReporter::default()),
            catalog: Arc::new(leaf_catalog()),
        }
    }

    pub fn paths(&self) -> RuntimePaths {
        RuntimePaths::from_config(&self.config)
    }

    /// Child collaborators sharing this fixture's launcher and reporter.
    pub fn deps(&self, probe: impl PortProbe + 'static) -> ChildDeps {
        ChildDeps {
            launcher: Box::new(self.launcher.clone()),
            probe: Box::new(probe),
            reporter: self.reporter.clone(),
            startup_grace: std::time::Duration::ZERO,
        }
    }

    /// Context whose probe never sees a listening port.
    pub fn context(&self) -> ServiceContext {
        self.context_with(idle_probe())
    }

    pub fn context_with(&self, probe: impl PortProbe + 'static) -> ServiceContext {
        ServiceContext::new(
            self.config.clone(),
            Arc::clone(&self.catalog),
            self.deps(probe),
        )
    }
}

/// Probe answering `false` for every port.
pub fn idle_probe() -> MockPortProbe {
    let mut probe = MockPortProbe::new();
    probe.expect_is_listening().return_const(false);
    probe
}

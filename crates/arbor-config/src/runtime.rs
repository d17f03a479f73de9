//! Derives the on-disk layout shared by every service in a tree.
//!
//! A tree shares one working directory. Installed applications live under
//! `apps/`, each service logs to `logs/<name>.log`, and the lock, pid and
//! health snapshot of each service live under `run/`. Parents rely on the
//! same layout to remove the artifacts of a deleted child.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::Config;
use crate::defaults::{APPS_DIR, LOGS_DIR, RUN_DIR};

/// Canonical paths for the artifacts of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    work_dir: Utf8PathBuf,
    apps_dir: Utf8PathBuf,
    logs_dir: Utf8PathBuf,
    run_dir: Utf8PathBuf,
    name: String,
    app: String,
}

impl RuntimePaths {
    /// Derives paths for the service described by `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.work_dir, &config.name, &config.app)
    }

    /// Derives paths for a named service inside `work_dir`.
    #[must_use]
    pub fn new(work_dir: &Utf8Path, name: &str, app: &str) -> Self {
        Self {
            apps_dir: work_dir.join(APPS_DIR),
            logs_dir: work_dir.join(LOGS_DIR),
            run_dir: work_dir.join(RUN_DIR),
            work_dir: work_dir.to_path_buf(),
            name: name.to_owned(),
            app: app.to_owned(),
        }
    }

    /// Creates the `apps/`, `logs/` and `run/` directories.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimePathsError::Directory`] when a directory cannot be
    /// created.
    pub fn prepare(&self) -> Result<(), RuntimePathsError> {
        for dir in [&self.apps_dir, &self.logs_dir, &self.run_dir] {
            fs::create_dir_all(dir).map_err(|source| RuntimePathsError::Directory {
                path: dir.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Working directory of the tree.
    #[must_use]
    pub fn work_dir(&self) -> &Utf8Path {
        &self.work_dir
    }

    /// Directory holding installed applications.
    #[must_use]
    pub fn apps_dir(&self) -> &Utf8Path {
        &self.apps_dir
    }

    /// Package directory of an application.
    #[must_use]
    pub fn app_dir(&self, app: &str) -> Utf8PathBuf {
        self.apps_dir.join(app)
    }

    /// Single-file source of an application.
    #[must_use]
    pub fn app_file(&self, app: &str) -> Utf8PathBuf {
        self.apps_dir.join(format!("{app}.rs"))
    }

    /// Static resources served under `/resources/` by this service.
    #[must_use]
    pub fn resources_dir(&self) -> Utf8PathBuf {
        self.app_dir(&self.app).join("resources")
    }

    /// Log file of this service.
    #[must_use]
    pub fn log_path(&self) -> Utf8PathBuf {
        self.log_path_for(&self.name)
    }

    /// Log file of any service in the tree.
    #[must_use]
    pub fn log_path_for(&self, name: &str) -> Utf8PathBuf {
        self.logs_dir.join(format!("{name}.log"))
    }

    /// Lock file guarding a single instance of this service.
    #[must_use]
    pub fn lock_path(&self) -> Utf8PathBuf {
        self.run_dir.join(format!("{}.lock", self.name))
    }

    /// PID file of this service.
    #[must_use]
    pub fn pid_path(&self) -> Utf8PathBuf {
        self.run_dir.join(format!("{}.pid", self.name))
    }

    /// Health snapshot of this service.
    #[must_use]
    pub fn health_path(&self) -> Utf8PathBuf {
        self.run_dir.join(format!("{}.health", self.name))
    }
}

/// Errors raised while preparing runtime directories.
#[derive(Debug, Error)]
pub enum RuntimePathsError {
    /// Creating a directory failed.
    #[error("failed to prepare directory '{path}': {source}")]
    Directory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

//! Installs uploaded application artifacts under `apps/`.
//!
//! Two shapes are accepted: a single `<app>.rs` source file, or a `.zip`
//! archive whose package is identified by a top-level `<app>/lib.rs` entry.

use std::fs;
use std::io::Cursor;

use arbor_config::defaults::ROOT_APP;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use zip::ZipArchive;

use super::ChildError;

const PACKAGE_MARKER: &str = "lib.rs";
const VERSION_FILE: &str = "VERSION";

/// Layout of an installed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `apps/<app>.rs`.
    SourceFile,
    /// `apps/<app>/`.
    Package,
}

/// An artifact placed under the apps directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledArtifact {
    /// Application identifier derived from the artifact.
    pub app: String,
    /// Shape of the install.
    pub kind: ArtifactKind,
    /// File or directory that was written.
    pub path: Utf8PathBuf,
}

impl InstalledArtifact {
    /// Deletes what [`install`] wrote.
    pub(crate) fn remove(&self) -> Result<(), ChildError> {
        let result = match self.kind {
            ArtifactKind::SourceFile => fs::remove_file(&self.path),
            ArtifactKind::Package => fs::remove_dir_all(&self.path),
        };
        result.map_err(|source| ChildError::io(self.path.clone(), source))
    }
}

/// Writes `data` under `apps_dir` according to the shape of `filename`.
///
/// # Errors
///
/// Returns [`ChildError::Validation`] for unsupported or reserved artifacts,
/// [`ChildError::Archive`] for unreadable archives and [`ChildError::Io`]
/// when writing fails.
pub(crate) fn install(
    apps_dir: &Utf8Path,
    filename: &str,
    data: &[u8],
) -> Result<InstalledArtifact, ChildError> {
    let basename = Utf8Path::new(filename)
        .file_name()
        .ok_or_else(|| ChildError::validation(format!("'{filename}' is not a file name")))?;
    let artifact = Utf8Path::new(basename);
    match artifact.extension() {
        Some("rs") => {
            let app = artifact.file_stem().unwrap_or_default();
            check_app_name(app)?;
            let path = apps_dir.join(basename);
            fs::write(&path, data).map_err(|source| ChildError::io(path.clone(), source))?;
            Ok(InstalledArtifact {
                app: app.to_owned(),
                kind: ArtifactKind::SourceFile,
                path,
            })
        }
        Some("zip") => install_archive(apps_dir, data),
        _ => Err(ChildError::validation(format!(
            "unsupported artifact '{basename}'; expected a .rs file or a .zip archive"
        ))),
    }
}

fn install_archive(apps_dir: &Utf8Path, data: &[u8]) -> Result<InstalledArtifact, ChildError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let app = archive
        .file_names()
        .find_map(package_of)
        .map(str::to_owned)
        .ok_or_else(|| {
            ChildError::validation(format!("archive has no <package>/{PACKAGE_MARKER} entry"))
        })?;
    check_app_name(&app)?;
    if let Some(stray) = archive
        .file_names()
        .find(|entry| !inside_package(entry, &app))
    {
        return Err(ChildError::validation(format!(
            "archive entry '{stray}' lies outside package '{app}'"
        )));
    }
    archive.extract(apps_dir)?;
    Ok(InstalledArtifact {
        path: apps_dir.join(&app),
        app,
        kind: ArtifactKind::Package,
    })
}

fn package_of(entry: &str) -> Option<&str> {
    let (package, file) = entry.split_once('/')?;
    (file == PACKAGE_MARKER && !package.is_empty()).then_some(package)
}

/// True when `entry` is `<app>/...` with only plain path segments.
fn inside_package(entry: &str, app: &str) -> bool {
    let mut components = Utf8Path::new(entry).components();
    components.next() == Some(Utf8Component::Normal(app))
        && components.all(|component| matches!(component, Utf8Component::Normal(_)))
        && !entry.contains('\\')
}

fn check_app_name(app: &str) -> Result<(), ChildError> {
    let valid = !app.is_empty()
        && app
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ChildError::validation(format!(
            "'{app}' is not a valid application name"
        )));
    }
    if app.contains("__") || app == ROOT_APP {
        return Err(ChildError::validation(format!(
            "application name '{app}' is reserved"
        )));
    }
    Ok(())
}

/// Version declared by an installed package, if any.
pub(crate) fn read_version(apps_dir: &Utf8Path, app: &str) -> Option<String> {
    let text = fs::read_to_string(apps_dir.join(app).join(VERSION_FILE)).ok()?;
    let version = text.trim();
    (!version.is_empty()).then(|| version.to_owned())
}

/// Removes the installed files of `app`; the package directory wins over a
/// source file of the same name.
pub(crate) fn remove_app(apps_dir: &Utf8Path, app: &str) -> Result<Option<Utf8PathBuf>, ChildError> {
    let package = apps_dir.join(app);
    if package.is_dir() {
        fs::remove_dir_all(&package).map_err(|source| ChildError::io(package.clone(), source))?;
        return Ok(Some(package));
    }
    let source_file = apps_dir.join(format!("{app}.rs"));
    if source_file.is_file() {
        fs::remove_file(&source_file)
            .map_err(|source| ChildError::io(source_file.clone(), source))?;
        return Ok(Some(source_file));
    }
    Ok(None)
}

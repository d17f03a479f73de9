use std::io::{self, Write};

use camino::Utf8Path;
use tempfile::Builder;

/// Owner-only mode of every runtime file.
#[cfg(unix)]
const RUNTIME_FILE_MODE: u32 = 0o600;

/// Replaces `path` with `contents` through a rename in the same directory.
pub(super) fn atomic_write(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let Some(run_dir) = path.parent() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("runtime file '{path}' has no parent directory"),
        ));
    };
    let mut staging = runtime_file_builder(path.file_name().unwrap_or("arbord"))
        .tempfile_in(run_dir)?;
    staging.write_all(contents)?;
    staging.as_file().sync_all()?;
    staging
        .persist(path)
        .map(drop)
        .map_err(|failure| failure.error)
}

fn runtime_file_builder(stem: &str) -> Builder<'_, 'static> {
    let mut builder = Builder::new();
    builder.prefix(stem).suffix(".tmp");
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(RUNTIME_FILE_MODE));
    }
    builder
}

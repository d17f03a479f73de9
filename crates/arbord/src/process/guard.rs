use std::fs::{self, File, OpenOptions};
use std::io;
use std::time::{SystemTime, UNIX_EPOCH};

use arbor_config::RuntimePaths;
use camino::{Utf8Path, Utf8PathBuf};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::files::atomic_write;

/// Exclusive claim on a service name's runtime files.
///
/// The lock, pid and health files are removed when the guard drops.
#[derive(Debug)]
pub(crate) struct ProcessGuard {
    lock: Utf8PathBuf,
    pid_file: Utf8PathBuf,
    health: Utf8PathBuf,
    _lock_file: File,
    pid: Option<u32>,
}

impl ProcessGuard {
    pub(crate) fn acquire(paths: &RuntimePaths) -> Result<Self, LaunchError> {
        let lock = paths.lock_path();
        let pid_file = paths.pid_path();
        let lock_file = acquire_lock(&lock, &pid_file)?;
        Ok(Self {
            lock,
            pid_file,
            health: paths.health_path(),
            _lock_file: lock_file,
            pid: None,
        })
    }

    pub(crate) fn write_pid(&mut self, pid: u32) -> Result<(), LaunchError> {
        atomic_write(&self.pid_file, format!("{pid}\n").as_bytes()).map_err(|source| {
            LaunchError::PidWrite {
                path: self.pid_file.clone(),
                source,
            }
        })?;
        self.pid = Some(pid);
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %self.pid_file,
            "pid file written"
        );
        Ok(())
    }

    pub(crate) fn write_health(&self, status: HealthState) -> Result<(), LaunchError> {
        let pid = self.pid.ok_or(LaunchError::MissingPid)?;
        let snapshot = HealthSnapshot::new(status, pid)?;
        let mut payload = serde_json::to_vec(&snapshot)?;
        payload.push(b'\n');
        atomic_write(&self.health, &payload).map_err(|source| LaunchError::HealthWrite {
            path: self.health.clone(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            status = snapshot.status,
            file = %self.health,
            "health snapshot updated"
        );
        Ok(())
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for (path, label) in [
            (&self.health, "health"),
            (&self.pid_file, "pid"),
            (&self.lock, "lock"),
        ] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %path,
                        kind = label,
                        error = %error,
                        "failed to remove runtime file"
                    );
                }
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealthState {
    Starting,
    Ready,
    Stopping,
}

impl HealthState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthSnapshot {
    status: &'static str,
    pid: u32,
    timestamp: u64,
}

impl HealthSnapshot {
    fn new(state: HealthState, pid: u32) -> Result<Self, LaunchError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|source| LaunchError::Clock { source })?
            .as_secs();
        Ok(Self {
            status: state.as_str(),
            pid,
            timestamp,
        })
    }
}

fn acquire_lock(lock: &Utf8Path, pid_file: &Utf8Path) -> Result<File, LaunchError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(lock) {
        Ok(file) => {
            info!(target: PROCESS_TARGET, file = %lock, "acquired service lock");
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
            handle_existing_lock(lock, pid_file)
        }
        Err(source) => Err(LaunchError::LockCreate {
            path: lock.to_owned(),
            source,
        }),
    }
}

fn handle_existing_lock(lock: &Utf8Path, pid_file: &Utf8Path) -> Result<File, LaunchError> {
    match read_pid(pid_file) {
        Some(pid) if process_alive(pid)? => {
            info!(
                target: PROCESS_TARGET,
                pid,
                "refusing to start: service with this name is alive"
            );
            return Err(LaunchError::AlreadyRunning { pid });
        }
        Some(pid) => {
            warn!(
                target: PROCESS_TARGET,
                pid,
                "previous service not detected; cleaning stale files"
            );
        }
        None => {
            return Err(LaunchError::StartupInProgress {
                lock: lock.to_owned(),
                pid: pid_file.to_owned(),
            });
        }
    }
    remove_file(lock)?;
    remove_file(pid_file)?;
    acquire_lock(lock, pid_file)
}

fn read_pid(path: &Utf8Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()?
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|pid| *pid != 0)
}

fn remove_file(path: &Utf8Path) -> Result<(), LaunchError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(LaunchError::Cleanup {
            path: path.to_owned(),
            source,
        }),
    }
}

fn process_alive(pid: u32) -> Result<bool, LaunchError> {
    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(LaunchError::CheckProcess { pid, source }),
    }
}

//! Starts and signals child service processes.

use std::collections::HashMap;
use std::env;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use arbor_config::LaunchArgs;
use arbor_config::defaults::LAUNCH_WRAPPER_ENV;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use super::{CHILDREN_TARGET, ChildError};

/// Time a fresh process gets before it is checked for an early exit.
const DEFAULT_SETTLE: Duration = Duration::from_millis(500);

/// Result of asking a process to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process received `SIGTERM`.
    Signalled,
    /// No such process existed any more.
    AlreadyGone,
}

/// Starts service processes and stops them again.
pub trait ProcessLauncher: Send {
    /// Starts a service with `args` and returns its resolved pid.
    ///
    /// # Errors
    ///
    /// Returns [`ChildError::SpawnFailed`] when the process cannot be started,
    /// exits during startup, or its pid cannot be resolved.
    fn launch(&mut self, args: &LaunchArgs) -> Result<u32, ChildError>;

    /// Sends a termination request to `pid`.
    ///
    /// # Errors
    ///
    /// Returns [`ChildError::Signal`] when signalling fails for a reason
    /// other than the process being gone.
    fn terminate(&mut self, pid: u32) -> Result<Termination, ChildError>;
}

/// Launches children by re-executing a service binary.
///
/// When a wrapper command is configured (for example `sudo -n`), the pid
/// recorded for the child is that of the wrapper's direct descendant.
#[derive(Debug)]
pub struct SystemLauncher {
    program: PathBuf,
    wrapper: Vec<String>,
    settle: Duration,
    spawned: HashMap<u32, Child>,
}

impl SystemLauncher {
    /// Launches `program` directly.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            wrapper: Vec::new(),
            settle: DEFAULT_SETTLE,
            spawned: HashMap::new(),
        }
    }

    /// Launches the running executable, wrapped by the command in
    /// `ARBOR_LAUNCH_WRAPPER` when set.
    ///
    /// # Errors
    ///
    /// Returns the IO error raised while locating the current executable.
    pub fn from_env() -> io::Result<Self> {
        let wrapper = env::var(LAUNCH_WRAPPER_ENV)
            .map(|value| value.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();
        Ok(Self::new(env::current_exe()?).with_wrapper(wrapper))
    }

    /// Prefixes every launch with `wrapper`.
    #[must_use]
    pub fn with_wrapper(mut self, wrapper: Vec<String>) -> Self {
        self.wrapper = wrapper;
        self
    }

    /// Overrides the startup settle delay.
    #[must_use]
    pub const fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    fn command(&self, args: &LaunchArgs) -> Command {
        let mut command = match self.wrapper.split_first() {
            Some((wrapper, wrapper_args)) => {
                let mut command = Command::new(wrapper);
                command.args(wrapper_args).arg(&self.program);
                command
            }
            None => Command::new(&self.program),
        };
        command
            .args(args.to_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }
}

impl ProcessLauncher for SystemLauncher {
    fn launch(&mut self, args: &LaunchArgs) -> Result<u32, ChildError> {
        let mut child = self
            .command(args)
            .spawn()
            .map_err(|error| ChildError::spawn_failed(&args.name, error.to_string()))?;
        thread::sleep(self.settle);
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => {
                return Err(ChildError::spawn_failed(
                    &args.name,
                    format!("process exited during startup ({status})"),
                ));
            }
            Err(error) => {
                kill_and_reap(child);
                return Err(ChildError::spawn_failed(&args.name, error.to_string()));
            }
        }
        let spawned = child.id();
        let pid = if self.wrapper.is_empty() {
            spawned
        } else if let Some(pid) = resolve_direct_child(spawned) {
            pid
        } else {
            kill_and_reap(child);
            return Err(ChildError::spawn_failed(
                &args.name,
                format!("wrapper process {spawned} has no child"),
            ));
        };
        info!(
            target: CHILDREN_TARGET,
            name = %args.name,
            pid,
            spawned,
            "child process started"
        );
        self.spawned.insert(pid, child);
        Ok(pid)
    }

    fn terminate(&mut self, pid: u32) -> Result<Termination, ChildError> {
        let raw = i32::try_from(pid).map_err(|_| ChildError::Signal {
            pid,
            source: Errno::EINVAL,
        })?;
        let termination = match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Termination::Signalled,
            Err(Errno::ESRCH) => Termination::AlreadyGone,
            Err(source) => return Err(ChildError::Signal { pid, source }),
        };
        debug!(target: CHILDREN_TARGET, pid, ?termination, "termination requested");
        if let Some(child) = self.spawned.remove(&pid) {
            reap_in_background(child);
        }
        Ok(termination)
    }
}

/// Smallest pid whose parent is `parent`, ignoring threads.
#[must_use]
pub fn resolve_direct_child(parent: u32) -> Option<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    let parent = SysPid::from_u32(parent);
    system
        .processes()
        .iter()
        .filter(|(_, process)| process.parent() == Some(parent) && process.thread_kind().is_none())
        .map(|(pid, _)| pid.as_u32())
        .min()
}

fn kill_and_reap(mut child: Child) {
    if let Err(error) = child.kill() {
        warn!(target: CHILDREN_TARGET, pid = child.id(), %error, "failed to kill child");
    }
    if let Err(error) = child.wait() {
        warn!(target: CHILDREN_TARGET, pid = child.id(), %error, "failed to reap child");
    }
}

fn reap_in_background(mut child: Child) {
    let pid = child.id();
    let spawned = thread::Builder::new()
        .name(format!("arbord-reap-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) => debug!(target: CHILDREN_TARGET, pid, %status, "child reaped"),
            Err(error) => warn!(target: CHILDREN_TARGET, pid, %error, "failed to reap child"),
        });
    if let Err(error) = spawned {
        warn!(target: CHILDREN_TARGET, pid, %error, "failed to start reaper thread");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn direct_child_of_a_shell_is_resolved() {
        let mut shell = Command::new("sh")
            .args(["-c", "sleep 5; true"])
            .spawn()
            .expect("spawn shell");
        thread::sleep(Duration::from_millis(300));

        let resolved = resolve_direct_child(shell.id());

        if let Some(raw) = resolved.and_then(|pid| i32::try_from(pid).ok()) {
            kill(Pid::from_raw(raw), Signal::SIGKILL).expect("kill sleep");
        }
        shell.kill().expect("kill shell");
        shell.wait().expect("reap shell");
        let pid = resolved.expect("sleep is a child of the shell");
        assert_ne!(pid, shell.id());
    }

    #[test]
    fn missing_process_is_reported_as_gone() {
        let mut exited = Command::new("true").spawn().expect("spawn true");
        let pid = exited.id();
        exited.wait().expect("reap true");

        let mut launcher = SystemLauncher::new("true");
        assert_eq!(
            launcher.terminate(pid).expect("terminate"),
            Termination::AlreadyGone
        );
    }

    #[test]
    fn early_exit_is_a_spawn_failure() {
        let args = LaunchArgs::parse_from_iter(["arbord", "leaf", "branch", "127.0.0.1", "8101"])
            .expect("parse args");
        let mut launcher = SystemLauncher::new("false").with_settle(Duration::from_millis(200));
        let error = launcher.launch(&args).expect_err("false exits immediately");
        assert!(matches!(error, ChildError::SpawnFailed { .. }));
    }
}

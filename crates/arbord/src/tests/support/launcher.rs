//! In-memory [`ProcessLauncher`] that never starts a process.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use arbor_config::LaunchArgs;

use crate::children::{ChildError, ProcessLauncher, Termination};

const FIRST_PID: u32 = 40_000;

#[derive(Debug, Default)]
struct LauncherState {
    next_pid: u32,
    refuse: bool,
    launched: Vec<LaunchArgs>,
    terminated: Vec<u32>,
    gone: HashSet<u32>,
}

/// Hands out fake pids and records every call.
///
/// Clones share their state, so a test keeps one clone after boxing another
/// into [`crate::children::ChildDeps`].
#[derive(Debug, Clone, Default)]
pub struct FakeLauncher {
    state: Arc<Mutex<LauncherState>>,
}

impl FakeLauncher {
    /// A launcher whose every launch fails.
    pub fn refusing() -> Self {
        let launcher = Self::default();
        launcher.state().refuse = true;
        launcher
    }

    /// Pretends `pid` exited on its own.
    pub fn mark_gone(&self, pid: u32) {
        self.state().gone.insert(pid);
    }

    /// Arguments of every launch, in order.
    pub fn launched(&self) -> Vec<LaunchArgs> {
        self.state().launched.clone()
    }

    /// Pids signalled so far, in order.
    pub fn terminated(&self) -> Vec<u32> {
        self.state().terminated.clone()
    }

    fn state(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().expect("launcher mutex poisoned")
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&mut self, args: &LaunchArgs) -> Result<u32, ChildError> {
        let mut state = self.state();
        if state.refuse {
            return Err(ChildError::spawn_failed(&args.name, "launcher refused"));
        }
        state.launched.push(args.clone());
        let pid = FIRST_PID + state.next_pid;
        state.next_pid += 1;
        Ok(pid)
    }

    fn terminate(&mut self, pid: u32) -> Result<Termination, ChildError> {
        let mut state = self.state();
        state.terminated.push(pid);
        if state.gone.contains(&pid) {
            Ok(Termination::AlreadyGone)
        } else {
            Ok(Termination::Signalled)
        }
    }
}

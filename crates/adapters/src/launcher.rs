// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process launching behind a single seam.
//!
//! The launcher takes a command line, working directory, environment
//! overlay, and priority class, and returns an opaque handle plus a PID.
//! Reaping is an explicit non-blocking call each tick — no SIGCHLD
//! handlers anywhere.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use thiserror::Error;

/// Errors from spawning or controlling a process.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),
    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),
    #[error("kill failed: {0}")]
    Kill(#[source] nix::errno::Errno),
    #[error("stdio redirect failed: {0}")]
    Redirect(#[source] io::Error),
}

/// Priority class applied to a job process at spawn.
///
/// Untrusted compute runs at `Idle` so it never competes with the user's
/// foreground work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Idle,
    BelowNormal,
    Normal,
}

impl Priority {
    fn nice(&self) -> i32 {
        match self {
            Priority::Idle => 19,
            Priority::BelowNormal => 10,
            Priority::Normal => 0,
        }
    }
}

quern_core::simple_display! {
    Priority {
        Idle => "idle",
        BelowNormal => "below_normal",
        Normal => "normal",
    }
}

/// Everything needed to start one job process.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnSpec {
    pub exec_path: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Environment overlay on top of the agent's own environment
    pub env: Vec<(String, String)>,
    pub priority: Priority,
    /// Redirect target for the job's stdout, if any
    pub stdout_path: Option<PathBuf>,
    /// Redirect target for the job's stderr (the slot stderr capture)
    pub stderr_path: Option<PathBuf>,
}

impl SpawnSpec {
    pub fn new(exec_path: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            exec_path: exec_path.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            priority: Priority::Idle,
            stdout_path: None,
            stderr_path: None,
        }
    }

    quern_core::setters! {
        set {
            args: Vec<String>,
            env: Vec<(String, String)>,
            priority: Priority,
        }
        option {
            stdout_path: PathBuf,
            stderr_path: PathBuf,
        }
    }
}

/// How a process left the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with a status code
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
}

/// Opaque handle to a spawned job process.
pub trait ProcessHandle: Send {
    fn pid(&self) -> u32;

    /// Non-blocking reap. `Ok(Some(_))` exactly once, when the process
    /// has exited; `Ok(None)` while it is still running.
    fn try_reap(&mut self) -> Result<Option<ExitOutcome>, LaunchError>;

    /// Forcefully terminate the process group.
    fn kill_group(&mut self) -> Result<(), LaunchError>;
}

/// The spawn seam. One implementation per OS, plus a fake for tests.
pub trait ProcessLauncher: Send {
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ProcessHandle>, LaunchError>;
}

/// Unix launcher: fork/exec via `std::process::Command`, the job in its
/// own process group so descendants can be swept together.
#[derive(Debug, Clone, Default)]
pub struct UnixLauncher;

impl ProcessLauncher for UnixLauncher {
    fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
        use std::os::unix::process::CommandExt;

        let mut cmd = Command::new(&spec.exec_path);
        cmd.args(&spec.args).current_dir(&spec.cwd);
        for (key, val) in &spec.env {
            cmd.env(key, val);
        }
        cmd.process_group(0);
        cmd.stdin(Stdio::null());

        if let Some(path) = &spec.stdout_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(LaunchError::Redirect)?;
            cmd.stdout(Stdio::from(file));
        }
        if let Some(path) = &spec.stderr_path {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(LaunchError::Redirect)?;
            cmd.stderr(Stdio::from(file));
        }

        let nice = spec.priority.nice();
        if nice != 0 {
            // Runs in the child after fork, before exec.
            unsafe {
                cmd.pre_exec(move || {
                    libc::setpriority(libc::PRIO_PROCESS, 0, nice);
                    Ok(())
                });
            }
        }

        let child = cmd.spawn().map_err(LaunchError::Spawn)?;
        let pid = child.id();
        tracing::info!(pid, exec = %spec.exec_path.display(), priority = %spec.priority, "spawned job process");
        Ok(Box::new(UnixProcess { child, pid }))
    }
}

struct UnixProcess {
    child: Child,
    pid: u32,
}

impl ProcessHandle for UnixProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn try_reap(&mut self) -> Result<Option<ExitOutcome>, LaunchError> {
        use std::os::unix::process::ExitStatusExt;

        match self.child.try_wait().map_err(LaunchError::Wait)? {
            None => Ok(None),
            Some(status) => {
                let outcome = match (status.code(), status.signal()) {
                    (Some(code), _) => ExitOutcome::Exited(code),
                    (None, Some(sig)) => ExitOutcome::Signaled(sig),
                    (None, None) => ExitOutcome::Exited(-1),
                };
                Ok(Some(outcome))
            }
        }
    }

    fn kill_group(&mut self) -> Result<(), LaunchError> {
        // The spawn put the job in its own group with pgid == pid.
        killpg(Pid::from_raw(self.pid as i32), Signal::SIGKILL).map_err(LaunchError::Kill)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeLauncher, FakeProcess};

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    /// Shared view of one fake process, scripted by tests.
    #[derive(Clone, Default)]
    pub struct FakeProcess {
        pub pid: u32,
        exit: Arc<Mutex<Option<ExitOutcome>>>,
        killed: Arc<AtomicBool>,
    }

    impl FakeProcess {
        /// Script the process to be reaped with this outcome on the next poll.
        pub fn set_exit(&self, outcome: ExitOutcome) {
            *self.exit.lock() = Some(outcome);
        }

        pub fn was_killed(&self) -> bool {
            self.killed.load(Ordering::SeqCst)
        }
    }

    /// Launcher that spawns nothing and lets tests script exits.
    #[derive(Default)]
    pub struct FakeLauncher {
        next_pid: AtomicU32,
        fail_next: AtomicBool,
        spawned: Mutex<Vec<(SpawnSpec, FakeProcess)>>,
    }

    impl FakeLauncher {
        pub fn new() -> Self {
            Self {
                next_pid: AtomicU32::new(1000),
                ..Self::default()
            }
        }

        /// Make the next spawn fail (corrupt executable, fork failure…).
        pub fn fail_next_spawn(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }

        pub fn spawn_count(&self) -> usize {
            self.spawned.lock().len()
        }

        /// The spec and process handle of spawn number `idx`.
        pub fn spawned(&self, idx: usize) -> Option<(SpawnSpec, FakeProcess)> {
            self.spawned.lock().get(idx).cloned()
        }

        /// The most recent spawn.
        pub fn last_spawned(&self) -> Option<(SpawnSpec, FakeProcess)> {
            self.spawned.lock().last().cloned()
        }
    }

    impl ProcessLauncher for FakeLauncher {
        fn spawn(&self, spec: &SpawnSpec) -> Result<Box<dyn ProcessHandle>, LaunchError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(LaunchError::Spawn(io::Error::other("scripted spawn failure")));
            }
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            let process = FakeProcess {
                pid,
                exit: Arc::new(Mutex::new(None)),
                killed: Arc::new(AtomicBool::new(false)),
            };
            self.spawned.lock().push((spec.clone(), process.clone()));
            Ok(Box::new(FakeHandle { process }))
        }
    }

    struct FakeHandle {
        process: FakeProcess,
    }

    impl ProcessHandle for FakeHandle {
        fn pid(&self) -> u32 {
            self.process.pid
        }

        fn try_reap(&mut self) -> Result<Option<ExitOutcome>, LaunchError> {
            Ok(self.process.exit.lock().take())
        }

        fn kill_group(&mut self) -> Result<(), LaunchError> {
            self.process.killed.store(true, Ordering::SeqCst);
            *self.process.exit.lock() = Some(ExitOutcome::Signaled(9));
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "launcher_tests.rs"]
mod tests;

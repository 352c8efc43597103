// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quern-adapters: platform-specific process control and measurement.
//!
//! Everything OS-dependent lives here behind two seams: [`ProcessLauncher`]
//! (spawn/reap/kill) and [`ResourceProbe`] (CPU and memory snapshots).
//! The engine crate only sees the traits.

pub mod launcher;
pub mod probe;
pub mod procs;

pub use launcher::{
    ExitOutcome, LaunchError, Priority, ProcessHandle, ProcessLauncher, SpawnSpec, UnixLauncher,
};
pub use probe::{ProbeError, ProcProbe, ProcSnapshot, ResourceProbe};
pub use procs::{
    descendants, find_exclusive_app, kill_pid, process_list, total_cpu_jiffies, NonAgentCpu,
    ProcEntry,
};

#[cfg(any(test, feature = "test-support"))]
pub use launcher::{FakeLauncher, FakeProcess};
#[cfg(any(test, feature = "test-support"))]
pub use probe::FakeProbe;

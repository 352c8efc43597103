// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quern-engine: task execution, supervision, file staging, throttling.
//!
//! One [`Task`] per running or runnable result; the [`TaskSet`] owns the
//! collection and runs the per-tick poll cycle; [`FileOps`] stages large
//! inputs in time-sliced chunks; the throttle controller duty-cycles
//! suspend/resume to hit a CPU usage target.

pub mod context;
pub mod fileops;
pub mod set;
pub mod task;
pub mod throttle;

use std::time::Duration;

use quern_adapters::LaunchError;
use quern_channel::ChannelError;
use quern_storage::StorageError;
use thiserror::Error;

/// Minimum spacing between supervisor polls (re-run early only after a
/// detected clock jump).
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(950);
/// Grace before a task stuck in QuitPending is force-killed.
pub const QUIT_TIMEOUT_MS: u64 = 15_000;
/// Grace before a task stuck in AbortPending is force-killed.
pub const ABORT_TIMEOUT_MS: u64 = 15_000;
/// An outbound queue blocked this long means the app stopped reading.
pub const CHANNEL_HANG_TIMEOUT_MS: u64 = 180_000;
/// How often working-set/swap/page-fault snapshots are refreshed.
pub const USAGE_REFRESH_INTERVAL: Duration = Duration::from_secs(10);
/// How often slot disk usage is walked (directories can hold many files).
pub const DISK_CHECK_INTERVAL: Duration = Duration::from_secs(30);
/// Cadence of the overdue/staleness liveness checks.
pub const SLOW_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// A finish file this old with the process still alive means it hung.
pub const FINISH_FILE_GRACE_MS: u64 = 300_000;
/// Interval between stuck-job progress comparisons.
pub const STUCK_CHECK_INTERVAL_MS: u64 = 600_000;
/// Deadline reset on every observed checkpoint.
pub const CHECKPOINT_PERIOD_MS: u64 = 60_000;
/// Inputs larger than this are staged through the async copy queue.
pub const ASYNC_COPY_THRESHOLD: u64 = 1 << 20;
/// Bytes processed per file-op invocation.
pub const COPY_CHUNK_SIZE: usize = 256 * 1024;
/// Exponential smoothing factor for the working-set estimate.
pub const WSS_SMOOTHING: f64 = 0.5;
/// Wall-vs-monotonic divergence treated as a system clock jump.
pub const CLOCK_JUMP_TOLERANCE_MS: u64 = 10_000;
/// Name of the mailbox segment file inside a slot directory.
pub const CHANNEL_FILE: &str = "channel";

/// Errors the engine propagates internally. Task-level failures are
/// recorded on the owning result instead; these never kill the agent.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("launch error: {0}")]
    Launch(#[from] LaunchError),
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("slot i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("slot {slot} already occupied; discarding task {result}")]
    SlotOccupied { slot: usize, result: String },
}

pub use context::RunContext;
pub use fileops::{FileOpEvent, FileOps, VerifyExpect};
pub use set::{wait_for_exit, TaskSet};
pub use task::{StartOutcome, Task};
pub use throttle::{spawn_throttle, ThrottleAction, ThrottleState};

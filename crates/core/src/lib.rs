// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quern-core: shared types for the Quern execution agent

pub mod macros;

pub mod clock;
pub mod codec;
pub mod message;
pub mod state;
pub mod status;
pub mod work;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use message::{AppStatus, ControlRequest, GraphicsReply, Heartbeat, TrickleNotice};
pub use state::{PreemptKind, SchedulerState, SuspendReason, TaskState};
pub use status::{is_external_kill_signal, ExitCode, Severity};
pub use work::{
    AppVersion, InputFile, ResourceKind, ResultRecord, ResultState, TaskSpec, UsagePrefs,
};

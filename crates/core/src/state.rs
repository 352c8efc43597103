// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task execution states and scheduling annotations.

use serde::{Deserialize, Serialize};

/// Observed state of a task's OS process and lifecycle.
///
/// `Uninitialized` doubles as the restartable state: a task that exited
/// for a recoverable reason is returned here and may be started again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// No process; may be started (or restarted)
    Uninitialized,
    /// Process is running
    Executing,
    /// Process resident but told to pause
    Suspended,
    /// `<abort/>` sent, waiting for the process to exit
    AbortPending,
    /// `<quit/>` sent, waiting for the process to exit
    QuitPending,
    /// Start deferred while a slot input is still being copied
    CopyPending,
    /// Process exited normally
    Exited,
    /// Task aborted; error recorded on the result
    Aborted,
    /// Process died to an unhandled signal
    WasSignaled,
    /// Process gone but its exit status could not be determined
    ExitUnknown,
    /// Process could not be started
    CouldntStart,
}

impl TaskState {
    /// True while an OS process exists for this task.
    pub fn process_exists(&self) -> bool {
        matches!(
            self,
            TaskState::Executing
                | TaskState::Suspended
                | TaskState::AbortPending
                | TaskState::QuitPending
        )
    }

    /// True once the task can never run again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Exited
                | TaskState::Aborted
                | TaskState::WasSignaled
                | TaskState::ExitUnknown
                | TaskState::CouldntStart
        )
    }

    /// True when a quit or abort request is outstanding.
    pub fn exit_pending(&self) -> bool {
        matches!(self, TaskState::AbortPending | TaskState::QuitPending)
    }
}

crate::simple_display! {
    TaskState {
        Uninitialized => "uninitialized",
        Executing => "executing",
        Suspended => "suspended",
        AbortPending => "abort_pending",
        QuitPending => "quit_pending",
        CopyPending => "copy_pending",
        Exited => "exited",
        Aborted => "aborted",
        WasSignaled => "was_signaled",
        ExitUnknown => "exit_unknown",
        CouldntStart => "couldnt_start",
    }
}

/// What the external CPU scheduler wants this task to be doing.
///
/// Deliberately separate from [`TaskState`]: this is policy input, the
/// task state is observed reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Uninitialized,
    Preempted,
    Scheduled,
}

crate::simple_display! {
    SchedulerState {
        Uninitialized => "uninitialized",
        Preempted => "preempted",
        Scheduled => "scheduled",
    }
}

/// Policy input for preemption: should the process leave memory?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreemptKind {
    /// Keep resident, suspend in place
    NeverRemove,
    /// Remove only if user prefs don't ask to keep apps in memory
    RemoveIfUserPrefs,
    /// Remove if scheduler policy says so
    RemoveByPolicy,
    /// Always remove from memory
    AlwaysRemove,
}

crate::simple_display! {
    PreemptKind {
        NeverRemove => "never_remove",
        RemoveIfUserPrefs => "remove_if_user_prefs",
        RemoveByPolicy => "remove_by_policy",
        AlwaysRemove => "always_remove",
    }
}

/// Why a suspend/resume was issued. Throttle transitions are not logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    CpuThrottle,
    UserRequest,
    Policy,
}

impl SuspendReason {
    /// Per-second throttle duty cycles would flood the log.
    pub fn loggable(&self) -> bool {
        !matches!(self, SuspendReason::CpuThrottle)
    }
}

crate::simple_display! {
    SuspendReason {
        CpuThrottle => "cpu_throttle",
        UserRequest => "user_request",
        Policy => "policy",
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exit-code taxonomy and log severities.
//!
//! Codes in the 192+ range are agent-assigned: they mark conditions the
//! agent detected, as opposed to whatever the app process itself returned.

use serde::{Deserialize, Serialize};

/// Agent-assigned exit codes recorded on a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    /// Process died to an unhandled signal
    Signal = 193,
    /// Aborted by the agent (limit breach, policy, hang)
    AbortedByClient = 194,
    DiskLimitExceeded = 196,
    TimeLimitExceeded = 197,
    MemLimitExceeded = 198,
    /// Agent shutting down; task told to quit
    ClientExiting = 199,
    /// Result still unstarted past its reporting deadline
    MissedDeadline = 200,
    AbortedViaGui = 203,
    /// Process gone, exit status unknowable
    Unknown = 204,
    /// Slot staging, channel setup, or spawn failed
    InitFailure = 206,
    /// Premature-exit retry budget exhausted
    TooManyExits = 209,
    /// Finish file present but the process never exited
    HungAfterFinish = 210,
    /// Control-channel queue blocked past the hang timeout
    ChannelHang = 211,
}

impl ExitCode {
    pub fn code(&self) -> i32 {
        *self as i32
    }
}

crate::simple_display! {
    ExitCode {
        Success => "success",
        Signal => "signal",
        AbortedByClient => "aborted by client",
        DiskLimitExceeded => "disk limit exceeded",
        TimeLimitExceeded => "time limit exceeded",
        MemLimitExceeded => "memory limit exceeded",
        ClientExiting => "client exiting",
        MissedDeadline => "missed deadline",
        AbortedViaGui => "aborted via GUI",
        Unknown => "exit status unknown",
        InitFailure => "couldn't start",
        TooManyExits => "too many exits",
        HungAfterFinish => "hung after claiming success",
        ChannelHang => "control channel hang",
    }
}

/// Signals that mean "killed externally — restart it" rather than a crash.
pub fn is_external_kill_signal(sig: i32) -> bool {
    // HUP INT QUIT KILL TERM STOP
    matches!(sig, 1 | 2 | 3 | 9 | 15 | 19)
}

/// Severity classes for user-visible conditions.
///
/// Maps onto log levels: info, warn, error. Only the inability to persist
/// agent state at all is fatal, and that is out of this crate's hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    UserAlert,
    InternalError,
}

crate::simple_display! {
    Severity {
        Info => "info",
        UserAlert => "user_alert",
        InternalError => "internal_error",
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Explicit execution context.
//!
//! Everything that used to live in a process-wide singleton travels here
//! instead and is injected into the supervisor's methods. The prefs block
//! is shared with the throttle controller, which reads it from its own
//! execution context.

use std::sync::Arc;

use parking_lot::Mutex;
use quern_adapters::{ProcessLauncher, ResourceProbe};
use quern_core::{Clock, UsagePrefs};

/// Dependencies for one agent run.
pub struct RunContext<L, P, C> {
    pub launcher: L,
    pub probe: P,
    pub clock: C,
    pub prefs: Arc<Mutex<UsagePrefs>>,
    /// The agent's own PID, excluded from non-agent CPU accounting
    pub agent_pid: u32,
}

impl<L, P, C> RunContext<L, P, C>
where
    L: ProcessLauncher,
    P: ResourceProbe,
    C: Clock,
{
    pub fn new(launcher: L, probe: P, clock: C) -> Self {
        Self {
            launcher,
            probe,
            clock,
            prefs: Arc::new(Mutex::new(UsagePrefs::default())),
            agent_pid: std::process::id(),
        }
    }

    /// Snapshot of the current prefs.
    pub fn prefs(&self) -> UsagePrefs {
        self.prefs.lock().clone()
    }

    /// Replace the prefs block (scheduler layer pushed new settings).
    pub fn set_prefs(&self, prefs: UsagePrefs) {
        *self.prefs.lock() = prefs;
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The CPU throttle controller.
//!
//! Converts a 0–100 % usage limit into a suspend/resume duty cycle. Runs
//! on its own timer-driven task, independent of the supervisor tick, so
//! it reacts within a second even when the main loop is busy. All task
//! mutation goes through the shared task-set lock, released across the
//! one-second sleep.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use quern_core::{Clock, UsagePrefs};
use tokio_util::sync::CancellationToken;

use crate::set::TaskSet;

/// Throttle cadence.
pub const THROTTLE_PERIOD: Duration = Duration::from_secs(1);

/// What one accumulator tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleAction {
    Run,
    Suspend,
}

/// The duty-cycle accumulator.
///
/// `x` starts at 100; each second the limit `L` is added. At `x ≥ 100`
/// the tasks run and 100 is subtracted; below, they sit suspended. The
/// average on-fraction converges to `L %`, with cycle length bounded by
/// how many consecutive seconds `x` stays under 100.
#[derive(Debug, Clone)]
pub struct ThrottleState {
    accum: f64,
}

impl Default for ThrottleState {
    fn default() -> Self {
        Self::new()
    }
}

impl ThrottleState {
    pub fn new() -> Self {
        Self { accum: 100.0 }
    }

    pub fn tick(&mut self, limit: f64) -> ThrottleAction {
        if limit >= 100.0 {
            // No throttling wanted: bypass the accumulator entirely.
            self.accum = 100.0;
            return ThrottleAction::Run;
        }
        self.accum += limit.max(0.0);
        if self.accum >= 100.0 {
            self.accum -= 100.0;
            ThrottleAction::Run
        } else {
            ThrottleAction::Suspend
        }
    }
}

/// Spawn the throttle task. Cancel the token to stop it (tasks are left
/// unsuspended on the way out).
pub fn spawn_throttle<C>(
    tasks: Arc<Mutex<TaskSet>>,
    prefs: Arc<Mutex<UsagePrefs>>,
    clock: C,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()>
where
    C: Clock + 'static,
{
    spawn_throttle_with_period(tasks, prefs, clock, shutdown, THROTTLE_PERIOD)
}

/// Same, with an injectable cadence for tests.
pub fn spawn_throttle_with_period<C>(
    tasks: Arc<Mutex<TaskSet>>,
    prefs: Arc<Mutex<UsagePrefs>>,
    clock: C,
    shutdown: CancellationToken,
    period: Duration,
) -> tokio::task::JoinHandle<()>
where
    C: Clock + 'static,
{
    tokio::spawn(async move {
        let mut state = ThrottleState::new();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            let limit = prefs.lock().cpu_usage_limit;
            let now_ms = clock.epoch_ms();
            // Lock held only for the suspend/resume sweep, never the sleep.
            let mut set = tasks.lock();
            match state.tick(limit) {
                ThrottleAction::Run => {
                    if set.throttled {
                        set.throttle_resume_all(now_ms);
                    }
                }
                ThrottleAction::Suspend => {
                    if !set.throttled {
                        set.throttle_suspend_all(now_ms);
                    }
                }
            }
        }
        let mut set = tasks.lock();
        if set.throttled {
            set.throttle_resume_all(clock.epoch_ms());
        }
    })
}

#[cfg(test)]
#[path = "throttle_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario C: CPU throttle duty cycle.

use super::prelude::*;
use quern_core::{TaskState, UsagePrefs};
use quern_engine::{spawn_throttle, ThrottleAction, ThrottleState};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[test]
fn limit_25_gives_one_second_on_in_every_four() {
    let mut state = ThrottleState::new();
    // The accumulator starts full; the first tick drains the initial credit.
    state.tick(25.0);

    let window: Vec<ThrottleAction> = (0..4).map(|_| state.tick(25.0)).collect();
    let on = window.iter().filter(|a| **a == ThrottleAction::Run).count();
    assert_eq!(on, 1, "expected exactly 1 unsuspended second in 4, got {window:?}");
    assert_eq!(window.iter().filter(|a| **a == ThrottleAction::Suspend).count(), 3);
}

#[test]
fn on_off_ratio_converges_to_25_percent() {
    let mut state = ThrottleState::new();
    let ticks = 100_000;
    let on = (0..ticks).filter(|_| state.tick(25.0) == ThrottleAction::Run).count();
    let ratio = on as f64 / ticks as f64;
    assert!((ratio - 0.25).abs() < 0.001, "ratio was {ratio}");
}

#[tokio::test]
async fn throttle_task_duty_cycles_the_set() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    let mut set = TaskSet::new();
    set.insert(make_task(dir.path(), "scenario_c", 0)).unwrap();
    set.start_task(&ctx, 0);
    let tasks = Arc::new(Mutex::new(set));
    let prefs = Arc::new(Mutex::new(UsagePrefs::default().cpu_usage_limit(0.0)));

    let shutdown = CancellationToken::new();
    let handle = spawn_throttle(
        tasks.clone(),
        prefs.clone(),
        ctx.clock.clone(),
        shutdown.clone(),
    );

    // At limit 0 the duty cycle pins the task suspended within a second
    // of the initial credit draining.
    let mut suspended = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if tasks.lock().get(0).map(|t| t.state()) == Some(TaskState::Suspended) {
            suspended = true;
            break;
        }
    }
    assert!(suspended, "task was never throttled");
    assert!(tasks.lock().throttled);

    // Raising the limit to 100 releases it
    prefs.lock().cpu_usage_limit = 100.0;
    let mut resumed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if tasks.lock().get(0).map(|t| t.state()) == Some(TaskState::Executing) {
            resumed = true;
            break;
        }
    }
    assert!(resumed, "task was never released");
    assert!(!tasks.lock().throttled);

    shutdown.cancel();
    let _ = handle.await;
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario A: resource-limit enforcement end to end.

use super::prelude::*;
use quern_adapters::ExitOutcome;
use quern_core::{ExitCode, TaskState};
use std::time::Duration;

#[test]
fn elapsed_limit_breach_aborts_exactly_once_and_lands_in_aborted() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    let mut set = running_set(dir.path(), &ctx, "scenario_a");
    set.get_mut(0).unwrap().spec.max_elapsed_secs = 10.0;

    // Let simulated elapsed time reach 11s while Executing
    ctx.clock.advance(Duration::from_secs(11));
    set.poll(&ctx);

    {
        let task = set.get(0).unwrap();
        assert!(task.elapsed_time > 10.0);
        assert_eq!(task.result.exit_status, Some(ExitCode::TimeLimitExceeded.code()));
        assert!(task.result.is_failed());
        // Cooperative abort first: the process is told to go
        assert_eq!(task.state(), TaskState::AbortPending);
    }

    // The process obeys the abort; the expected exit finishes the job
    let (_, process) = ctx.launcher.last_spawned().unwrap();
    process.set_exit(ExitOutcome::Exited(0));
    tick(&mut set, &ctx);

    let task = set.get(0).unwrap();
    assert_eq!(task.state(), TaskState::Aborted);
    // Aborted exactly once: the reason was never overwritten
    assert_eq!(task.result.exit_status, Some(ExitCode::TimeLimitExceeded.code()));
    assert!(set.slots_unique());
}

#[test]
fn unresponsive_abortee_is_force_killed_after_grace() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    let mut set = running_set(dir.path(), &ctx, "scenario_a_hang");
    set.get_mut(0).unwrap().spec.max_elapsed_secs = 10.0;

    ctx.clock.advance(Duration::from_secs(11));
    set.poll(&ctx);
    assert_eq!(set.get(0).unwrap().state(), TaskState::AbortPending);

    // The app ignores the abort message past the grace period
    ctx.clock.advance(Duration::from_secs(16));
    set.poll(&ctx);
    let (_, process) = ctx.launcher.last_spawned().unwrap();
    assert!(process.was_killed());

    tick(&mut set, &ctx);
    assert_eq!(set.get(0).unwrap().state(), TaskState::Aborted);
}

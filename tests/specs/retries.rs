// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario B: premature-exit retries under a capped budget.

use super::prelude::*;
use quern_adapters::ExitOutcome;
use quern_core::{Clock, ExitCode, TaskState};

#[test]
fn premature_exits_restart_until_the_cap_then_abort() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    ctx.prefs.lock().premature_exit_limit = 3;
    let mut set = running_set(dir.path(), &ctx, "scenario_b");

    // First three zero-status exits with no marker: restart each time
    for round in 1..=3u32 {
        let (_, process) = ctx.launcher.last_spawned().unwrap();
        process.set_exit(ExitOutcome::Exited(0));
        tick(&mut set, &ctx);
        {
            let task = set.get(0).unwrap();
            assert_eq!(task.state(), TaskState::Uninitialized, "round {round}");
            assert_eq!(task.premature_exit_count, round);
        }
        set.start_task(&ctx, 0);
        assert_eq!(set.get(0).unwrap().state(), TaskState::Executing);
    }

    // The fourth premature exit exceeds the cap: hard abort
    let (_, process) = ctx.launcher.last_spawned().unwrap();
    process.set_exit(ExitOutcome::Exited(0));
    tick(&mut set, &ctx);

    let task = set.get(0).unwrap();
    assert_eq!(task.state(), TaskState::Aborted);
    assert_eq!(task.result.exit_status, Some(ExitCode::TooManyExits.code()));
    assert!(task.result.ready_to_report);

    // Attempting two more exits changes nothing: the cap is monotonic
    let prefs = ctx.prefs();
    for _ in 0..2 {
        set.get_mut(0).unwrap().handle_premature_exit(&prefs);
        assert_eq!(set.get(0).unwrap().state(), TaskState::Aborted);
    }
}

#[test]
fn a_checkpoint_resets_the_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    ctx.prefs.lock().premature_exit_limit = 3;
    let mut set = running_set(dir.path(), &ctx, "scenario_b_ckpt");

    // Two premature exits
    for _ in 0..2 {
        let (_, process) = ctx.launcher.last_spawned().unwrap();
        process.set_exit(ExitOutcome::Exited(0));
        tick(&mut set, &ctx);
        set.start_task(&ctx, 0);
    }
    assert_eq!(set.get(0).unwrap().premature_exit_count, 2);

    // The app then checkpoints: retry pressure clears
    let status = quern_core::AppStatus {
        checkpoint_cpu_time: Some(12.0),
        ..Default::default()
    };
    let now_ms = ctx.clock.epoch_ms();
    assert!(set.get_mut(0).unwrap().process_app_status(status, now_ms));
    assert_eq!(set.get(0).unwrap().premature_exit_count, 0);
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint persistence round-trip and the slot-uniqueness invariant.

use super::prelude::*;
use quern_channel::{Channel, Mailbox};
use quern_core::AppStatus;

#[test]
fn checkpoint_survives_simulated_agent_restart_without_regressing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    let mut set = running_set(dir.path(), &ctx, "ckpt_restart");

    // Run a while, then the app reports a checkpoint
    for _ in 0..5 {
        tick(&mut set, &ctx);
    }
    let app = {
        let task = set.get(0).unwrap();
        Channel::attach(task.slot_dir.join("channel")).unwrap()
    };
    let status = AppStatus {
        current_cpu_time: Some(42.0),
        checkpoint_cpu_time: Some(40.0),
        fraction_done: Some(0.33),
        ..Default::default()
    };
    app.send(Mailbox::AppStatus, &status.render()).unwrap();
    tick(&mut set, &ctx);

    let (pre_cpu, pre_elapsed) = {
        let task = set.get(0).unwrap();
        (task.checkpoint_cpu_time, task.checkpoint_elapsed_time)
    };
    assert_eq!(pre_cpu, 40.0);
    assert!(pre_elapsed > 0.0);

    // Simulated restart: a fresh record for the same result recovers the
    // per-slot state file
    let mut restarted = make_task(dir.path(), "ckpt_restart", 0);
    restarted.load_slot_state();
    assert!(restarted.checkpoint_cpu_time >= pre_cpu);
    assert!(restarted.checkpoint_elapsed_time >= pre_elapsed);
    assert!(restarted.checkpoint_fraction_done >= 0.33);
}

#[test]
fn slot_uniqueness_holds_after_every_poll() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = spec_ctx();
    let mut set = TaskSet::new();
    for slot in 0..4 {
        set.insert(make_task(dir.path(), &format!("uniq_{slot}"), slot)).unwrap();
        set.start_task(&ctx, slot);
    }
    // A duplicate is rejected and discarded
    assert!(set.insert(make_task(dir.path(), "uniq_dup", 2)).is_err());

    for _ in 0..5 {
        tick(&mut set, &ctx);
        assert!(set.slots_unique());
    }
    assert_eq!(set.len(), 4);
}

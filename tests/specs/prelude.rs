// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the spec suite.

use std::path::Path;

use quern_adapters::{FakeLauncher, FakeProbe};
use quern_core::test_support::sample_spec;
use quern_core::FakeClock;
use quern_engine::RunContext;
pub use quern_engine::{Task, TaskSet};

pub type SpecCtx = RunContext<FakeLauncher, FakeProbe, FakeClock>;

pub fn spec_ctx() -> SpecCtx {
    RunContext::new(FakeLauncher::new(), FakeProbe::new(), FakeClock::new())
}

pub fn make_task(dir: &Path, name: &str, slot: usize) -> Task {
    let mut spec = sample_spec(name);
    spec.project_dir = dir.join("project");
    std::fs::create_dir_all(&spec.project_dir).unwrap();
    Task::new(spec, slot, dir.join(format!("slots/{slot}")))
}

/// One started task in a fresh set, poll baselines primed.
pub fn running_set(dir: &Path, ctx: &SpecCtx, name: &str) -> TaskSet {
    let mut set = TaskSet::new();
    set.insert(make_task(dir, name, 0)).unwrap();
    set.start_task(ctx, 0);
    tick(&mut set, ctx);
    set
}

/// Advance one simulated second and run the supervisor poll.
pub fn tick(set: &mut TaskSet, ctx: &SpecCtx) {
    ctx.clock.advance(std::time::Duration::from_secs(1));
    set.poll(ctx);
}

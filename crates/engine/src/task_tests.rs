// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use quern_adapters::{FakeLauncher, FakeProbe, ProcSnapshot};
use quern_channel::PAYLOAD_CAPACITY;
use quern_core::test_support::{sample_gpu_spec, sample_spec};
use quern_core::FakeClock;
use quern_storage::read_init_data;
use std::time::Duration;

type TestCtx = RunContext<FakeLauncher, FakeProbe, FakeClock>;

fn test_ctx() -> TestCtx {
    RunContext::new(FakeLauncher::new(), FakeProbe::new(), FakeClock::new())
}

fn make_task(dir: &Path, name: &str) -> Task {
    let mut spec = sample_spec(name);
    spec.project_dir = dir.join("project");
    fs::create_dir_all(&spec.project_dir).unwrap();
    Task::new(spec, 0, dir.join("slots/0"))
}

fn start_task(task: &mut Task, ctx: &TestCtx) -> FileOps {
    let mut file_ops = FileOps::new();
    assert_eq!(task.start(ctx, &mut file_ops), StartOutcome::Started);
    file_ops
}

/// App-side handle to the task's mailbox segment.
fn app_side(task: &Task) -> Channel {
    Channel::attach(task.slot_dir.join(CHANNEL_FILE)).unwrap()
}

fn now_ms(ctx: &TestCtx) -> u64 {
    ctx.clock.epoch_ms()
}

#[test]
fn start_spawns_process_and_stages_slot() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_start");
    start_task(&mut task, &ctx);

    assert_eq!(task.state(), TaskState::Executing);
    assert_eq!(task.scheduler_state, SchedulerState::Scheduled);
    assert!(task.pid.is_some());
    assert!(task.slot_dir.join(CHANNEL_FILE).exists());

    let init = read_init_data(&task.slot_dir).unwrap();
    assert_eq!(init.result_name, "r_start");
    assert_eq!(init.slot, 0);
    assert_eq!(init.max_elapsed_secs, 3600.0);

    let (spawn, _) = ctx.launcher.last_spawned().unwrap();
    assert_eq!(spawn.cwd, task.slot_dir);
    assert_eq!(spawn.priority, Priority::Idle);
    assert_eq!(spawn.args, vec!["--in", "input", "--out", "output"]);
    assert!(spawn.stderr_path.unwrap().ends_with(markers::STDERR_FILE));
}

#[test]
fn gpu_task_spawns_below_normal_priority() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut spec = sample_gpu_spec("r_gpu");
    spec.project_dir = dir.path().join("project");
    fs::create_dir_all(&spec.project_dir).unwrap();
    let mut task = Task::new(spec, 1, dir.path().join("slots/1"));
    start_task(&mut task, &ctx);
    let (spawn, _) = ctx.launcher.last_spawned().unwrap();
    assert_eq!(spawn.priority, Priority::BelowNormal);
}

#[test]
fn start_failure_records_couldnt_start_and_requests_verify() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    ctx.launcher.fail_next_spawn();
    let mut task = make_task(dir.path(), "r_fail");
    let mut file_ops = FileOps::new();

    assert_eq!(task.start(&ctx, &mut file_ops), StartOutcome::Failed);
    assert_eq!(task.state(), TaskState::CouldntStart);
    assert!(task.needs_app_verify);
    assert!(task.result.is_failed());
    assert_eq!(task.result.exit_status, Some(ExitCode::InitFailure.code()));
}

#[test]
fn small_inputs_are_staged_synchronously() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_small_in");
    fs::write(task.spec.project_dir.join("input"), b"small input").unwrap();
    task.spec.input_files = vec![quern_core::InputFile {
        name: "input".into(),
        source: "input".into(),
        copy: true,
    }];
    start_task(&mut task, &ctx);
    assert_eq!(fs::read(task.slot_dir.join("input")).unwrap(), b"small input");
}

#[test]
fn linked_inputs_share_content() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_link_in");
    fs::write(task.spec.project_dir.join("table"), b"lookup table").unwrap();
    task.spec.input_files = vec![quern_core::InputFile {
        name: "table".into(),
        source: "table".into(),
        copy: false,
    }];
    start_task(&mut task, &ctx);
    assert_eq!(fs::read(task.slot_dir.join("table")).unwrap(), b"lookup table");
}

#[test]
fn large_input_parks_task_in_copy_pending() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_big_in");
    let big = vec![0u8; (ASYNC_COPY_THRESHOLD + 1) as usize];
    fs::write(task.spec.project_dir.join("big_input"), &big).unwrap();
    task.spec.input_files = vec![quern_core::InputFile {
        name: "big_input".into(),
        source: "big_input".into(),
        copy: true,
    }];

    let mut file_ops = FileOps::new();
    assert_eq!(task.start(&ctx, &mut file_ops), StartOutcome::CopyPending);
    assert_eq!(task.state(), TaskState::CopyPending);
    assert!(file_ops.copy_pending_for_slot(0));
    // No process, no channel yet
    assert!(task.pid.is_none());

    // Drive the copy to completion, then the retry succeeds
    while file_ops.has_pending() {
        file_ops.poll();
    }
    assert_eq!(task.start(&ctx, &mut file_ops), StartOutcome::Started);
    assert_eq!(task.state(), TaskState::Executing);
    assert_eq!(fs::read(task.slot_dir.join("big_input")).unwrap(), big);
}

#[test]
fn suspend_and_resume_deliver_control_messages() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_susp");
    start_task(&mut task, &ctx);
    let app = app_side(&task);

    task.suspend(SuspendReason::UserRequest, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Suspended);
    assert_eq!(
        app.receive(Mailbox::ProcessControl).unwrap().as_deref(),
        Some("<suspend/>\n")
    );

    task.unsuspend(SuspendReason::UserRequest, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Executing);
    assert_eq!(
        app.receive(Mailbox::ProcessControl).unwrap().as_deref(),
        Some("<resume/>\n")
    );
}

#[test]
fn suspend_then_resume_purges_to_zero_traffic() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_purge");
    start_task(&mut task, &ctx);
    let app = app_side(&task);

    // Mailbox already holds an unread message, so the suspend queues.
    app.send(Mailbox::ProcessControl, "<dummy/>").unwrap();
    task.suspend(SuspendReason::UserRequest, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Suspended);

    // The resume purges the still-queued suspend instead of sending.
    task.unsuspend(SuspendReason::UserRequest, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Executing);

    // Net channel traffic is zero: only the dummy was ever on the wire.
    assert_eq!(app.receive(Mailbox::ProcessControl).unwrap().as_deref(), Some("<dummy/>"));
    task.poll_queue();
    assert_eq!(app.receive(Mailbox::ProcessControl).unwrap(), None);
}

#[test]
fn request_exit_transitions_and_sends_quit() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_quit");
    start_task(&mut task, &ctx);
    let app = app_side(&task);

    task.request_exit(now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::QuitPending);
    assert_eq!(app.receive(Mailbox::ProcessControl).unwrap().as_deref(), Some("<quit/>\n"));

    ctx.clock.advance(Duration::from_secs(20));
    assert!(task.exit_request_age_ms(now_ms(&ctx)).unwrap() >= 20_000);
}

#[test]
fn expected_exit_after_quit_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_quit_exit");
    start_task(&mut task, &ctx);
    task.request_exit(now_ms(&ctx)).unwrap();

    // Exit code is ignored for an expected exit
    task.handle_exited_app(ExitOutcome::Exited(7), &prefs, now_ms(&ctx));
    assert_eq!(task.state(), TaskState::Uninitialized);
    assert!(!task.result.is_failed());
    assert!(task.pid.is_none());
    assert!(!task.slot_dir.join(CHANNEL_FILE).exists());
}

#[test]
fn abort_without_process_is_immediately_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_abort_cold");
    task.abort_task(ExitCode::AbortedViaGui, "user said stop", now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Aborted);
    assert_eq!(task.result.exit_status, Some(ExitCode::AbortedViaGui.code()));
    assert!(task.result.ready_to_report);
}

#[test]
fn abort_with_process_waits_for_exit() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_abort_hot");
    start_task(&mut task, &ctx);

    task.abort_task(ExitCode::TimeLimitExceeded, "too slow", now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::AbortPending);

    // Second abort while pending is a no-op (exactly one recorded reason)
    task.abort_task(ExitCode::MemLimitExceeded, "also fat", now_ms(&ctx)).unwrap();
    assert_eq!(task.result.exit_status, Some(ExitCode::TimeLimitExceeded.code()));

    task.handle_exited_app(ExitOutcome::Exited(1), &prefs, now_ms(&ctx));
    assert_eq!(task.state(), TaskState::Aborted);
}

#[test]
fn finish_file_means_genuine_success() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_done");
    task.spec.output_files = vec!["out.dat".into()];
    start_task(&mut task, &ctx);

    fs::write(task.slot_dir.join("out.dat"), b"the answer").unwrap();
    fs::write(task.slot_dir.join(markers::FINISH_FILE), "0\nall frames rendered\n").unwrap();
    task.handle_exited_app(ExitOutcome::Exited(0), &prefs, now_ms(&ctx));

    assert_eq!(task.state(), TaskState::Exited);
    assert_eq!(task.result.state, quern_core::ResultState::Done);
    assert_eq!(task.result.exit_status, Some(0));
    assert_eq!(task.result.message.as_deref(), Some("all frames rendered"));
    // Outputs copied out of the slot
    assert_eq!(fs::read(task.spec.project_dir.join("out.dat")).unwrap(), b"the answer");
}

#[test]
fn temporary_exit_defers_restart() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_temp");
    start_task(&mut task, &ctx);

    fs::write(task.slot_dir.join(markers::TEMPORARY_EXIT_FILE), "42\nwaiting on GPU\n").unwrap();
    let before = now_ms(&ctx);
    task.handle_exited_app(ExitOutcome::Exited(0), &prefs, before);

    assert_eq!(task.state(), TaskState::Uninitialized);
    assert_eq!(task.defer_until_ms, Some(before + 42_000));
    assert!(!task.slot_dir.join(markers::TEMPORARY_EXIT_FILE).exists());

    // Still inside the backoff window
    let mut file_ops = FileOps::new();
    assert_eq!(task.resume_or_start(&ctx, &mut file_ops), StartOutcome::Deferred);

    ctx.clock.advance(Duration::from_secs(43));
    assert_eq!(task.resume_or_start(&ctx, &mut file_ops), StartOutcome::Started);
}

#[test]
fn zero_exit_with_no_marker_is_premature() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_premature");
    start_task(&mut task, &ctx);

    task.handle_exited_app(ExitOutcome::Exited(0), &prefs, now_ms(&ctx));
    assert_eq!(task.state(), TaskState::Uninitialized);
    assert_eq!(task.premature_exit_count, 1);
    assert!(!task.result.is_failed());
}

#[test]
fn premature_exit_cap_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = make_task(dir.path(), "r_cap");
    let prefs = quern_core::UsagePrefs::default().premature_exit_limit(3);

    for expected in 1..=3 {
        task.handle_premature_exit(&prefs);
        assert_eq!(task.state(), TaskState::Uninitialized);
        assert_eq!(task.premature_exit_count, expected);
    }
    task.handle_premature_exit(&prefs);
    assert_eq!(task.state(), TaskState::Aborted);
    assert_eq!(task.result.exit_status, Some(ExitCode::TooManyExits.code()));

    // Aborted is sticky no matter how often this is invoked afterward
    for _ in 0..5 {
        task.handle_premature_exit(&prefs);
        assert_eq!(task.state(), TaskState::Aborted);
    }
}

#[test]
fn checkpoint_resets_premature_counter() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = make_task(dir.path(), "r_ckpt_reset");
    let prefs = quern_core::UsagePrefs::default().premature_exit_limit(3);
    task.handle_premature_exit(&prefs);
    task.handle_premature_exit(&prefs);
    assert_eq!(task.premature_exit_count, 2);

    let status = AppStatus { checkpoint_cpu_time: Some(10.0), ..AppStatus::default() };
    assert!(task.process_app_status(status, 1_000));
    assert_eq!(task.premature_exit_count, 0);
}

#[test]
fn nonzero_exit_is_a_hard_failure() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_hard");
    start_task(&mut task, &ctx);

    fs::write(task.slot_dir.join(markers::STDERR_FILE), "segfault in kernel 3\n").unwrap();
    task.handle_exited_app(ExitOutcome::Exited(139), &prefs, now_ms(&ctx));

    assert_eq!(task.state(), TaskState::Exited);
    assert!(task.result.is_failed());
    assert_eq!(task.result.exit_status, Some(139));
    assert!(task.result.stderr_out.contains("segfault"));
    // Capture truncated after reading
    assert_eq!(fs::metadata(task.slot_dir.join(markers::STDERR_FILE)).unwrap().len(), 0);
}

#[test]
fn external_signal_restarts_task() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_sig_ext");
    start_task(&mut task, &ctx);
    task.handle_exited_app(ExitOutcome::Signaled(15), &prefs, now_ms(&ctx));
    assert_eq!(task.state(), TaskState::Uninitialized);
    assert!(!task.result.is_failed());
}

#[test]
fn crash_signal_is_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_sig_crash");
    start_task(&mut task, &ctx);
    task.handle_exited_app(ExitOutcome::Signaled(11), &prefs, now_ms(&ctx));
    assert_eq!(task.state(), TaskState::WasSignaled);
    assert_eq!(task.result.exit_status, Some(ExitCode::Signal.code()));
}

#[test]
fn final_status_drained_before_channel_destroyed() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_final");
    start_task(&mut task, &ctx);
    let app = app_side(&task);

    let status = AppStatus {
        current_cpu_time: Some(88.5),
        fraction_done: Some(0.95),
        ..AppStatus::default()
    };
    app.send(Mailbox::AppStatus, &status.render()).unwrap();
    task.handle_exited_app(ExitOutcome::Exited(1), &prefs, now_ms(&ctx));

    assert_eq!(task.result.final_cpu_time, 88.5);
    assert_eq!(task.fraction_done, 0.95);
}

#[test]
fn process_app_status_tracks_counters() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = make_task(dir.path(), "r_status");
    task.elapsed_time = 50.0;

    let status = AppStatus {
        current_cpu_time: Some(40.0),
        fraction_done: Some(0.5),
        other_pid: Some(4321),
        bytes_sent: Some(1000.0),
        bytes_received: Some(500.0),
        want_network: true,
        ..AppStatus::default()
    };
    assert!(!task.process_app_status(status, 1_000));
    assert_eq!(task.current_cpu_time, 40.0);
    assert_eq!(task.fraction_done, 0.5);
    assert_eq!(task.fraction_done_elapsed, 50.0);
    assert_eq!(task.other_pids, vec![4321]);
    assert_eq!(task.lifetime_bytes_sent, 1000.0);
    assert!(task.want_network);

    // Cumulative episode counters fold into lifetime as deltas
    let more = AppStatus { bytes_sent: Some(1500.0), ..AppStatus::default() };
    task.process_app_status(more, 2_000);
    assert_eq!(task.lifetime_bytes_sent, 1500.0);
    assert_eq!(task.episode_bytes_sent, 1500.0);
}

#[test]
fn checkpoint_advance_updates_paired_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = make_task(dir.path(), "r_ckpt");
    task.elapsed_time = 120.0;
    task.fraction_done = 0.25;

    let status = AppStatus {
        checkpoint_cpu_time: Some(100.0),
        fraction_done: Some(0.3),
        ..AppStatus::default()
    };
    assert!(task.process_app_status(status, 5_000));
    assert_eq!(task.checkpoint_cpu_time, 100.0);
    assert_eq!(task.checkpoint_elapsed_time, 120.0);
    assert_eq!(task.checkpoint_fraction_done, 0.3);
    assert_eq!(task.checkpoint_wall_ms, 5_000);
    assert!(task.ever_checkpointed());

    // Same checkpoint value again is not a new checkpoint
    let repeat = AppStatus { checkpoint_cpu_time: Some(100.0), ..AppStatus::default() };
    assert!(!task.process_app_status(repeat, 6_000));
}

#[test]
fn slot_state_round_trip_never_regresses() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = make_task(dir.path(), "r_persist");
    fs::create_dir_all(&task.slot_dir).unwrap();
    task.checkpoint_cpu_time = 200.0;
    task.checkpoint_elapsed_time = 250.0;
    task.checkpoint_fraction_done = 0.6;
    task.peak_wss = 123_456;
    task.write_slot_state().unwrap();

    // Simulated agent restart: fresh record, state file merged back in
    let mut restarted = make_task(dir.path(), "r_persist");
    restarted.load_slot_state();
    assert!(restarted.checkpoint_cpu_time >= 200.0);
    assert!(restarted.checkpoint_elapsed_time >= 250.0);
    assert!(restarted.checkpoint_fraction_done >= 0.6);
    assert_eq!(restarted.peak_wss, 123_456);
}

#[test]
fn slot_state_cross_check_rejects_foreign_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = make_task(dir.path(), "r_mine");
    fs::create_dir_all(&task.slot_dir).unwrap();
    task.checkpoint_cpu_time = 99.0;
    task.write_slot_state().unwrap();

    let mut other = make_task(dir.path(), "r_other");
    other.load_slot_state();
    assert_eq!(other.checkpoint_cpu_time, 0.0);
}

#[test]
fn preempt_keeps_never_checkpointed_task_resident() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_pre_keep");
    start_task(&mut task, &ctx);

    // Restart cost is a full redo; policy removal is overridden
    task.preempt(PreemptKind::RemoveByPolicy, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Suspended);
    assert_eq!(task.scheduler_state, SchedulerState::Preempted);
}

#[test]
fn preempt_removes_checkpointed_task_by_policy() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_pre_rm");
    start_task(&mut task, &ctx);
    task.checkpoint_cpu_time = 10.0;

    task.preempt(PreemptKind::RemoveByPolicy, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::QuitPending);
}

#[test]
fn preempt_gpu_always_removes_even_when_never_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut spec = sample_gpu_spec("r_pre_gpu");
    spec.project_dir = dir.path().join("project");
    fs::create_dir_all(&spec.project_dir).unwrap();
    let mut task = Task::new(spec, 2, dir.path().join("slots/2"));
    let mut file_ops = FileOps::new();
    assert_eq!(task.start(&ctx, &mut file_ops), StartOutcome::Started);

    // GPU memory is scarce: removal wins over never-checkpointed-keep
    task.preempt(PreemptKind::RemoveIfUserPrefs, SuspendReason::Policy, &prefs, now_ms(&ctx))
        .unwrap();
    assert_eq!(task.state(), TaskState::QuitPending);
}

#[test]
fn preempt_always_remove_ignores_checkpoint_rule() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_pre_always");
    start_task(&mut task, &ctx);
    task.preempt(PreemptKind::AlwaysRemove, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::QuitPending);
}

#[test]
fn preempt_is_idempotent_when_not_executing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let prefs = ctx.prefs();
    let mut task = make_task(dir.path(), "r_pre_idem");

    // Never started: no-op, not an error
    task.preempt(PreemptKind::AlwaysRemove, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Uninitialized);

    start_task(&mut task, &ctx);
    let app = app_side(&task);
    task.preempt(PreemptKind::NeverRemove, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    task.preempt(PreemptKind::NeverRemove, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::Suspended);
    // Exactly one suspend went out
    assert_eq!(app.receive(Mailbox::ProcessControl).unwrap().as_deref(), Some("<suspend/>\n"));
    task.poll_queue();
    assert_eq!(app.receive(Mailbox::ProcessControl).unwrap(), None);

    // Already quit-pending: any further preempt is a no-op
    task.request_exit(now_ms(&ctx)).unwrap();
    task.preempt(PreemptKind::AlwaysRemove, SuspendReason::Policy, &prefs, now_ms(&ctx)).unwrap();
    assert_eq!(task.state(), TaskState::QuitPending);
}

#[test]
fn refresh_usage_smooths_and_peaks() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_usage");
    start_task(&mut task, &ctx);
    let pid = task.pid.unwrap();

    ctx.probe.set(pid, ProcSnapshot {
        cpu_time_secs: 5.0,
        wss_bytes: 100 << 20,
        swap_bytes: 1 << 20,
        page_faults: 10,
    });
    task.refresh_usage(&ctx.probe, 0.0);
    assert_eq!(task.wss_bytes, 100 << 20);
    assert_eq!(task.smoothed_wss, (100 << 20) as f64);
    assert_eq!(task.peak_wss, 100 << 20);
    assert_eq!(task.current_cpu_time, 5.0);

    ctx.probe.set(pid, ProcSnapshot {
        cpu_time_secs: 6.0,
        wss_bytes: 200 << 20,
        swap_bytes: 1 << 20,
        page_faults: 110,
    });
    task.refresh_usage(&ctx.probe, 10.0);
    assert_eq!(task.wss_bytes, 200 << 20);
    assert_eq!(task.smoothed_wss, (150 << 20) as f64);
    assert_eq!(task.peak_wss, 200 << 20);
    assert_eq!(task.page_fault_rate, 10.0);
}

#[test]
fn stuck_detection_fires_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_stuck");
    start_task(&mut task, &ctx);

    let t0 = now_ms(&ctx);
    assert!(!task.check_stuck(t0)); // primes the sample
    assert!(!task.check_stuck(t0 + 1_000)); // interval not elapsed
    assert!(task.check_stuck(t0 + STUCK_CHECK_INTERVAL_MS + 1));
    // One-time alert only
    assert!(!task.check_stuck(t0 + 2 * STUCK_CHECK_INTERVAL_MS + 2));
}

#[test]
fn progressing_task_is_not_stuck() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_not_stuck");
    start_task(&mut task, &ctx);

    let t0 = now_ms(&ctx);
    assert!(!task.check_stuck(t0));
    task.fraction_done = 0.5;
    task.current_cpu_time += 100.0;
    assert!(!task.check_stuck(t0 + STUCK_CHECK_INTERVAL_MS + 1));
}

#[test]
fn graphics_request_and_reply_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_gfx");
    start_task(&mut task, &ctx);
    let app = app_side(&task);

    assert!(task.request_graphics().unwrap());
    // Unread request: a second ask backs off instead of overwriting
    assert!(!task.request_graphics().unwrap());
    assert_eq!(
        app.receive(Mailbox::GraphicsRequest).unwrap().as_deref(),
        Some("<graphics_request/>\n")
    );

    let reply = GraphicsReply {
        web_graphics_url: Some("http://localhost:31416/".into()),
        remote_desktop_addr: None,
    };
    app.send(Mailbox::GraphicsReply, &reply.render()).unwrap();
    task.drain_channel(now_ms(&ctx));
    assert_eq!(task.graphics, Some(reply));
}

#[test]
fn oversized_control_message_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_toolong");
    start_task(&mut task, &ctx);
    let app = app_side(&task);
    let too_long = "x".repeat(PAYLOAD_CAPACITY + 1);
    assert!(app.send(Mailbox::AppStatus, &too_long).is_err());
}

#[test]
fn clean_slot_removes_directory() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_clean");
    start_task(&mut task, &ctx);
    assert!(task.slot_dir.exists());
    task.clean_slot().unwrap();
    assert!(!task.slot_dir.exists());
}

#[test]
fn clock_jump_rebases_wall_clock_fields() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = test_ctx();
    let mut task = make_task(dir.path(), "r_jump");
    start_task(&mut task, &ctx);
    task.request_exit(1_000_000).unwrap();

    // Clock reset far into the future must not trigger instant escalation
    task.on_clock_jump(5_000_000);
    assert_eq!(task.exit_request_age_ms(5_000_100), Some(100));
}

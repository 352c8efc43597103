// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task-set supervisor.
//!
//! Owns the collection of task state machines and runs the per-tick poll:
//! reap exits, relay channel traffic, enforce resource limits, run the
//! slower liveness checks. It measures host-wide facts (exclusive apps,
//! non-agent CPU) for the external scheduler but decides no priority
//! itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use quern_adapters::{find_exclusive_app, process_list, NonAgentCpu, ProcessLauncher, ResourceProbe};
use quern_core::{
    Clock, ControlRequest, ExitCode, ResourceKind, SuspendReason, TaskState, UsagePrefs,
};
use sha2::{Digest, Sha256};

use crate::context::RunContext;
use crate::fileops::{FileOpEvent, FileOps};
use crate::task::{StartOutcome, Task};
use crate::{
    ABORT_TIMEOUT_MS, CHANNEL_HANG_TIMEOUT_MS, CLOCK_JUMP_TOLERANCE_MS, DISK_CHECK_INTERVAL,
    EngineError, FINISH_FILE_GRACE_MS, MIN_POLL_INTERVAL, QUIT_TIMEOUT_MS, SLOW_CHECK_INTERVAL,
    USAGE_REFRESH_INTERVAL,
};

/// The collection of tasks, one per occupied slot.
#[derive(Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
    pub file_ops: FileOps,
    /// Per-resource scheduling backoffs, cleared when a slot frees up
    rsc_backoff_until_ms: HashMap<ResourceKind, u64>,
    last_poll: Option<Instant>,
    last_epoch_ms: Option<u64>,
    last_usage_refresh: Option<Instant>,
    last_disk_check: Option<Instant>,
    last_slow_check: Option<Instant>,
    state_dirty: bool,
    /// Set while the throttle duty cycle has tasks suspended
    pub throttled: bool,
    non_agent_cpu: NonAgentCpu,
    /// Last sampled non-agent CPU burn, seconds (scheduler input)
    pub non_agent_cpu_secs: f64,
    /// Name of a configured exclusive app currently running, if any
    pub exclusive_app_running: Option<String>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self {
            non_agent_cpu: NonAgentCpu::new(),
            ..Self::default()
        }
    }

    // === collection management ===

    /// Add a task, enforcing slot uniqueness. A duplicate slot is an
    /// internal error: logged, task handed back for the caller to discard.
    pub fn insert(&mut self, task: Task) -> Result<(), EngineError> {
        if self.tasks.iter().any(|t| t.slot == task.slot) {
            tracing::error!(
                slot = task.slot,
                result = %task.spec.result_name,
                "internal error: duplicate slot assignment; discarding"
            );
            return Err(EngineError::SlotOccupied { slot: task.slot, result: task.spec.result_name });
        }
        self.state_dirty = true;
        self.tasks.push(task);
        Ok(())
    }

    /// Remove a task whose work is permanently gone. The slot directory
    /// must be cleaned before the slot is reused.
    pub fn remove(&mut self, slot: usize) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.slot == slot)?;
        self.state_dirty = true;
        Some(self.tasks.remove(idx))
    }

    pub fn get(&self, slot: usize) -> Option<&Task> {
        self.tasks.iter().find(|t| t.slot == slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.slot == slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Slot uniqueness must hold after every poll.
    pub fn slots_unique(&self) -> bool {
        let mut slots: Vec<usize> = self.tasks.iter().map(|t| t.slot).collect();
        slots.sort_unstable();
        slots.windows(2).all(|w| w[0] != w[1])
    }

    /// True when any state changed since the flag was last taken; the
    /// host loop serializes the client state when it sees this.
    pub fn take_state_dirty(&mut self) -> bool {
        std::mem::take(&mut self.state_dirty)
    }

    /// Scheduler-set backoff for a resource kind (e.g. GPU work fetch).
    /// Cleared automatically when a task of that kind exits.
    pub fn set_resource_backoff(&mut self, kind: ResourceKind, until_ms: u64) {
        self.rsc_backoff_until_ms.insert(kind, until_ms);
    }

    pub fn resource_backoff(&self, kind: ResourceKind) -> Option<u64> {
        self.rsc_backoff_until_ms.get(&kind).copied()
    }

    // === starting tasks ===

    /// Start or resume the task in `slot` (scheduler said: run this now).
    pub fn start_task<L, P, C>(&mut self, ctx: &RunContext<L, P, C>, slot: usize) -> StartOutcome
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        self.state_dirty = true;
        let Self { tasks, file_ops, .. } = self;
        let Some(task) = tasks.iter_mut().find(|t| t.slot == slot) else {
            return StartOutcome::Failed;
        };
        task.resume_or_start(ctx, file_ops)
    }

    /// Preempt the task in `slot` (scheduler said: stop running this).
    pub fn preempt_task(
        &mut self,
        slot: usize,
        kind: quern_core::PreemptKind,
        prefs: &UsagePrefs,
        now_ms: u64,
    ) {
        if let Some(task) = self.get_mut(slot) {
            if let Err(e) = task.preempt(kind, SuspendReason::Policy, prefs, now_ms) {
                tracing::error!(slot, error = %e, "preempt failed");
            }
            self.state_dirty = true;
        }
    }

    // === the poll cycle ===

    /// One supervisor tick. Throttled below one per second, except that a
    /// detected system clock jump forces an immediate re-run.
    pub fn poll<L, P, C>(&mut self, ctx: &RunContext<L, P, C>)
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        let now = ctx.clock.now();
        let now_ms = ctx.clock.epoch_ms();

        let jumped = self.detect_clock_jump(now, now_ms);
        if jumped {
            tracing::warn!("system clock jump detected; resetting wall-clock baselines");
            for task in &mut self.tasks {
                task.on_clock_jump(now_ms);
            }
        } else if let Some(last) = self.last_poll {
            if now.duration_since(last) < MIN_POLL_INTERVAL {
                return;
            }
        }

        let dt = self.last_poll.map(|t| now.duration_since(t).as_secs_f64()).unwrap_or(0.0);
        self.last_poll = Some(now);
        self.last_epoch_ms = Some(now_ms);

        let prefs = ctx.prefs();

        // Exit reaping strictly precedes limit checks: a task that already
        // exited must not be double-processed.
        self.reap(&prefs, now_ms);
        self.relay(&prefs, now_ms);
        self.accumulate_elapsed(dt);
        self.enforce_limits(ctx, &prefs, now, now_ms);
        self.slow_checks(&prefs, now, now_ms);
        self.scan_host(ctx, &prefs, now);
    }

    fn detect_clock_jump(&self, now: Instant, now_ms: u64) -> bool {
        let (Some(last), Some(last_ms)) = (self.last_poll, self.last_epoch_ms) else {
            return false;
        };
        if now_ms < last_ms {
            return true;
        }
        let wall_dt = now_ms - last_ms;
        let mono_dt = now.duration_since(last).as_millis() as u64;
        wall_dt.abs_diff(mono_dt) > CLOCK_JUMP_TOLERANCE_MS
    }

    fn reap(&mut self, prefs: &UsagePrefs, now_ms: u64) {
        let mut freed_gpu = false;
        for task in &mut self.tasks {
            let Some(outcome) = task.try_reap() else {
                continue;
            };
            let used_gpu = task.spec.uses_gpu();
            task.handle_exited_app(outcome, prefs, now_ms);
            self.state_dirty = true;
            if used_gpu {
                freed_gpu = true;
            }
        }
        if freed_gpu {
            // A GPU slot just freed up; sibling backoffs no longer apply.
            self.rsc_backoff_until_ms.remove(&ResourceKind::Gpu);
        }
    }

    fn relay(&mut self, prefs: &UsagePrefs, now_ms: u64) {
        let mut hung: Vec<usize> = Vec::new();
        for task in &mut self.tasks {
            if !task.state().process_exists() {
                continue;
            }
            if task.drain_channel(now_ms) {
                if let Err(e) = task.write_slot_state() {
                    tracing::warn!(slot = task.slot, error = %e, "slot state write failed");
                }
                self.state_dirty = true;
            }
            if task.take_trickle().any() {
                handle_upload_requests(task);
            }
            if !task.state().exit_pending() {
                task.send_heartbeat(prefs, None);
            }
            task.poll_queue();

            if task.queue_blocked_ms(now_ms).unwrap_or(0) > CHANNEL_HANG_TIMEOUT_MS {
                hung.push(task.slot);
            }
            if let Some(age) = task.exit_request_age_ms(now_ms) {
                let timeout = if task.state() == TaskState::AbortPending {
                    ABORT_TIMEOUT_MS
                } else {
                    QUIT_TIMEOUT_MS
                };
                if age > timeout {
                    tracing::warn!(slot = task.slot, age_ms = age, "exit request timed out; killing");
                    task.kill();
                }
            }
        }
        for slot in hung {
            if let Some(task) = self.get_mut(slot) {
                // Liveness failure of the job, not of the agent: kill it;
                // the SIGKILL reads as an external signal and restarts it.
                tracing::warn!(slot, "control channel blocked past timeout; killing hung task");
                task.kill();
                self.state_dirty = true;
            }
        }
    }

    fn accumulate_elapsed(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        for task in &mut self.tasks {
            if task.state() == TaskState::Executing {
                task.elapsed_time += dt;
            }
        }
    }

    fn enforce_limits<L, P, C>(
        &mut self,
        ctx: &RunContext<L, P, C>,
        prefs: &UsagePrefs,
        now: Instant,
        now_ms: u64,
    ) where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        let usage_due = self
            .last_usage_refresh
            .map(|t| now.duration_since(t) >= USAGE_REFRESH_INTERVAL)
            .unwrap_or(true);
        if usage_due {
            let dt = self
                .last_usage_refresh
                .map(|t| now.duration_since(t).as_secs_f64())
                .unwrap_or(0.0);
            for task in &mut self.tasks {
                task.refresh_usage(&ctx.probe, dt);
            }
            self.last_usage_refresh = Some(now);
        }

        let disk_due = self
            .last_disk_check
            .map(|t| now.duration_since(t) >= DISK_CHECK_INTERVAL)
            .unwrap_or(true);
        if disk_due {
            self.last_disk_check = Some(now);
        }

        for task in &mut self.tasks {
            if task.state() != TaskState::Executing && task.state() != TaskState::Suspended {
                continue;
            }
            if task.state().exit_pending() {
                continue;
            }
            // Ordering matters: elapsed first, and the first breach
            // short-circuits the rest for this task this tick.
            if !task.spec.always_run
                && task.spec.max_elapsed_secs > 0.0
                && task.elapsed_time > task.spec.max_elapsed_secs
            {
                abort_logged(
                    task,
                    ExitCode::TimeLimitExceeded,
                    format!(
                        "elapsed time {:.1}s exceeds limit {:.1}s",
                        task.elapsed_time, task.spec.max_elapsed_secs
                    ),
                    now_ms,
                );
                self.state_dirty = true;
                continue;
            }
            // Memory is checked against the global available-RAM ceiling,
            // not a per-task static bound.
            if prefs.ram_avail_bytes < u64::MAX && task.smoothed_wss as u64 > prefs.ram_avail_bytes
            {
                abort_logged(
                    task,
                    ExitCode::MemLimitExceeded,
                    format!(
                        "working set {} exceeds available RAM {}",
                        task.smoothed_wss as u64, prefs.ram_avail_bytes
                    ),
                    now_ms,
                );
                self.state_dirty = true;
                continue;
            }
            if disk_due && task.spec.max_disk_bytes > 0 {
                let usage = task.slot_disk_usage();
                if usage > task.spec.max_disk_bytes {
                    abort_logged(
                        task,
                        ExitCode::DiskLimitExceeded,
                        format!("disk usage {} exceeds limit {}", usage, task.spec.max_disk_bytes),
                        now_ms,
                    );
                    self.state_dirty = true;
                    continue;
                }
            }
        }
    }

    fn slow_checks(&mut self, prefs: &UsagePrefs, now: Instant, now_ms: u64) {
        let due = self
            .last_slow_check
            .map(|t| now.duration_since(t) >= SLOW_CHECK_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_slow_check = Some(now);

        for task in &mut self.tasks {
            // Overdue results: warn, or abort past the configured horizon.
            let deadline = task.spec.report_deadline_ms;
            if deadline > 0 && now_ms > deadline && !task.state().is_terminal() {
                let overdue_ms = now_ms - deadline;
                let max_overdue_ms = (prefs.max_overdue_days * 86_400_000.0) as u64;
                if prefs.max_overdue_days > 0.0 && overdue_ms > max_overdue_ms {
                    abort_logged(
                        task,
                        ExitCode::MissedDeadline,
                        format!("result {:.1} days past its reporting deadline", overdue_ms as f64 / 86_400_000.0),
                        now_ms,
                    );
                    self.state_dirty = true;
                    continue;
                }
                if !task.overdue_warned {
                    task.overdue_warned = true;
                    tracing::warn!(
                        result = %task.spec.result_name,
                        "result is past its reporting deadline"
                    );
                }
            }

            // Finish file present with the process still alive: the app
            // claimed success and then hung.
            if task.state().process_exists() {
                if quern_storage::markers::finish_file_exists(&task.slot_dir) {
                    match task.finish_file_seen_ms {
                        None => task.finish_file_seen_ms = Some(now_ms),
                        Some(seen) => {
                            if now_ms.saturating_sub(seen) > FINISH_FILE_GRACE_MS {
                                abort_logged(
                                    task,
                                    ExitCode::HungAfterFinish,
                                    "finish file present but process still alive".to_string(),
                                    now_ms,
                                );
                                self.state_dirty = true;
                                continue;
                            }
                        }
                    }
                } else {
                    task.finish_file_seen_ms = None;
                }
            }

            // Stuck: no progress and negligible CPU over a full interval.
            if task.check_stuck(now_ms) {
                tracing::warn!(
                    result = %task.spec.result_name,
                    fraction_done = task.fraction_done,
                    "task appears stuck: no progress and no CPU use"
                );
            }
        }
    }

    fn scan_host<L, P, C>(&mut self, ctx: &RunContext<L, P, C>, prefs: &UsagePrefs, now: Instant)
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        // Same cadence as the usage refresh; this walks the process table.
        if self.last_usage_refresh != Some(now) {
            return;
        }
        let list = process_list();
        self.exclusive_app_running =
            find_exclusive_app(&list, &prefs.exclusive_apps).map(str::to_string);

        let mut exclude: Vec<u32> = vec![ctx.agent_pid];
        for task in &self.tasks {
            if let Some(pid) = task.pid {
                exclude.push(pid);
                exclude.extend(quern_adapters::descendants(&list, pid));
            }
            exclude.extend(task.other_pids.iter().copied());
        }
        self.non_agent_cpu_secs = self.non_agent_cpu.sample(&exclude);
    }

    // === file ops ===

    /// Drive one chunk of pending file work and act on completions. The
    /// host loop calls this whenever no network descriptor is ready.
    pub fn poll_file_ops<L, P, C>(&mut self, ctx: &RunContext<L, P, C>)
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        let events = self.file_ops.poll();
        for event in events {
            match event {
                FileOpEvent::CopyDone { slot: Some(slot), result: Ok(()), dst } => {
                    tracing::info!(slot, dst = %dst.display(), "async copy finished");
                    let eligible = self
                        .get(slot)
                        .map(|t| {
                            t.state() == TaskState::CopyPending
                                && t.scheduler_state == quern_core::SchedulerState::Scheduled
                        })
                        .unwrap_or(false);
                    if eligible {
                        // The copy that parked this task is done; start it.
                        self.start_task(ctx, slot);
                    }
                }
                FileOpEvent::CopyDone { slot: Some(slot), result: Err(reason), dst } => {
                    tracing::error!(slot, dst = %dst.display(), %reason, "async copy failed");
                    if let Some(task) = self.get_mut(slot) {
                        if task.state() == TaskState::CopyPending {
                            task.result.record_failure(
                                ExitCode::InitFailure,
                                format!("input copy failed: {reason}"),
                            );
                        }
                    }
                    self.state_dirty = true;
                }
                FileOpEvent::CopyDone { slot: None, result, dst } => {
                    if let Err(reason) = result {
                        tracing::error!(dst = %dst.display(), %reason, "async copy failed");
                    }
                }
                FileOpEvent::VerifyDone { path, ok, error } => {
                    match error {
                        Some(reason) => {
                            tracing::error!(path = %path.display(), %reason, "verify failed")
                        }
                        None if ok => tracing::info!(path = %path.display(), "file verified"),
                        None => tracing::warn!(path = %path.display(), "file marked bad: verification mismatch"),
                    }
                }
            }
        }
    }

    /// True while file chunks are pending — the host loop must not sleep.
    pub fn has_pending_file_ops(&self) -> bool {
        self.file_ops.has_pending()
    }

    // === relayed control messages ===

    /// Tell every running app the network is back.
    pub fn network_available(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            if task.state().process_exists() {
                if let Err(e) = task.send_control(ControlRequest::NetworkAvailable, now_ms) {
                    tracing::warn!(slot = task.slot, error = %e, "network-available send failed");
                }
            }
        }
    }

    /// Tell every running app to reread project config.
    pub fn reread_app_info(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            if task.state().process_exists() {
                if let Err(e) = task.send_control(ControlRequest::RereadAppInfo, now_ms) {
                    tracing::warn!(slot = task.slot, error = %e, "reread-config send failed");
                }
            }
        }
    }

    // === throttle entry points (called from the throttle context) ===

    pub fn throttle_suspend_all(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            if task.state() == TaskState::Executing {
                if task.suspend(SuspendReason::CpuThrottle, now_ms).is_ok() {
                    task.throttled = true;
                }
            }
        }
        self.throttled = true;
    }

    pub fn throttle_resume_all(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            if task.state() == TaskState::Suspended && task.throttled {
                let _ = task.unsuspend(SuspendReason::CpuThrottle, now_ms);
            }
        }
        self.throttled = false;
    }

    // === shutdown ===

    /// Ask every running task to quit.
    pub fn request_exit_all(&mut self, now_ms: u64) {
        for task in &mut self.tasks {
            if task.state().process_exists() {
                if let Err(e) = task.request_exit(now_ms) {
                    tracing::error!(slot = task.slot, error = %e, "exit request failed");
                }
            }
        }
        self.state_dirty = true;
    }

    /// No task has a live process.
    pub fn all_exited(&self) -> bool {
        self.tasks.iter().all(|t| !t.state().process_exists())
    }

    /// Hard-kill everything still running (shutdown fallback).
    pub fn kill_all(&mut self) {
        for task in &mut self.tasks {
            if task.state().process_exists() {
                task.kill();
            }
        }
    }
}

/// Bounded shutdown wait: poll for exits, hard-kill on timeout. The lock
/// is released between polls so the throttle context never starves.
pub async fn wait_for_exit<L, P, C>(
    set: Arc<Mutex<TaskSet>>,
    ctx: &RunContext<L, P, C>,
    timeout: std::time::Duration,
) -> bool
where
    L: ProcessLauncher,
    P: ResourceProbe,
    C: Clock,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        {
            let mut set = set.lock();
            let prefs = ctx.prefs();
            let now_ms = ctx.clock.epoch_ms();
            // Only reap here: the full poll cycle is the host loop's job.
            set.reap(&prefs, now_ms);
            if set.all_exited() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                set.kill_all();
                return false;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}

fn abort_logged(task: &mut Task, code: ExitCode, message: String, now_ms: u64) {
    if let Err(e) = task.abort_task(code, message, now_ms) {
        tracing::error!(slot = task.slot, error = %e, "abort failed");
    }
}

/// Register files the app flagged for upload: checksum the real file,
/// record it for the transfer layer, delete the marker, and leave a
/// status file for the still-running app.
fn handle_upload_requests(task: &mut Task) {
    for name in quern_storage::upload_requests(&task.slot_dir) {
        let path = task.slot_dir.join(&name);
        let digest = match std::fs::read(&path) {
            Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
            Err(e) => {
                tracing::warn!(slot = task.slot, file = %name, error = %e, "upload request for unreadable file");
                continue;
            }
        };
        tracing::info!(slot = task.slot, file = %name, %digest, "upload requested");
        if let Err(e) = quern_storage::remove_upload_request(&task.slot_dir, &name) {
            tracing::warn!(slot = task.slot, file = %name, error = %e, "upload marker removal failed");
        }
        if task.state().process_exists() {
            if let Err(e) = quern_storage::write_upload_status(&task.slot_dir, &name, 0) {
                tracing::warn!(slot = task.slot, file = %name, error = %e, "upload status write failed");
            }
        }
        task.uploaded_files.push((name, digest));
    }
}

#[cfg(test)]
#[path = "set_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-task execution state machine.
//!
//! One `Task` per running or runnable result. Owns the OS process handle,
//! the control channel, the timers and resource counters, and the slot
//! directory. All lifecycle transitions go through the methods here; the
//! supervisor never pokes the state directly.

use std::fs;
use std::path::{Path, PathBuf};

use quern_adapters::{
    descendants, kill_pid, process_list, ExitOutcome, LaunchError, Priority, ProcessHandle,
    ProcessLauncher, ResourceProbe, SpawnSpec,
};
use quern_channel::{Channel, Mailbox, MsgQueue};
use quern_core::{
    is_external_kill_signal, AppStatus, Clock, ControlRequest, ExitCode, GraphicsReply, Heartbeat,
    PreemptKind, ResourceKind, ResultRecord, SchedulerState, SuspendReason, TaskSpec, TaskState,
    TrickleNotice, UsagePrefs,
};
use quern_storage::{
    markers, read_slot_state, read_stderr_tail, write_init_data, write_slot_state, InitData,
    SlotState,
};
use quern_storage::markers::{
    finish_file_exists, read_finish_file, read_temporary_exit, temporary_exit_exists,
};

use crate::fileops::FileOps;
use crate::{ASYNC_COPY_THRESHOLD, CHANNEL_FILE, EngineError, STUCK_CHECK_INTERVAL_MS, WSS_SMOOTHING};
use crate::context::RunContext;

/// What `start`/`resume_or_start` concluded. Failures are folded in: they
/// are recorded on the result, never thrown at the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A large input is still being async-copied; parked in `CopyPending`
    CopyPending,
    /// Still inside a temporary-exit backoff window
    Deferred,
    Failed,
}

pub struct Task {
    pub spec: TaskSpec,
    pub result: ResultRecord,
    pub slot: usize,
    pub slot_dir: PathBuf,

    state: TaskState,
    pub scheduler_state: SchedulerState,

    handle: Option<Box<dyn ProcessHandle>>,
    pub pid: Option<u32>,
    /// Descendants snapshotted at quit/abort request time (after exit it
    /// is too late to enumerate them)
    descendant_snapshot: Vec<u32>,
    /// Helper processes reported by the app (e.g. VM hypervisor)
    pub other_pids: Vec<u32>,

    channel: Option<Channel>,
    queue: MsgQueue,

    // timers and progress
    pub current_cpu_time: f64,
    pub checkpoint_cpu_time: f64,
    pub elapsed_time: f64,
    pub checkpoint_elapsed_time: f64,
    pub fraction_done: f64,
    pub fraction_done_elapsed: f64,
    pub checkpoint_fraction_done: f64,
    pub checkpoint_fraction_done_elapsed: f64,
    pub checkpoint_wall_ms: u64,
    pub checkpoint_deadline_ms: u64,
    quit_request_ms: Option<u64>,
    abort_request_ms: Option<u64>,
    pub finish_file_seen_ms: Option<u64>,
    /// Not restartable before this wall time (temporary-exit backoff)
    pub defer_until_ms: Option<u64>,
    pub premature_exit_count: u32,

    // resource snapshot (refreshed by the probe, not computed here)
    pub wss_bytes: u64,
    pub smoothed_wss: f64,
    pub swap_bytes: u64,
    pub page_fault_rate: f64,
    last_page_faults: u64,
    pub peak_wss: u64,
    pub peak_swap: u64,
    pub peak_disk: u64,

    // network counters: this episode vs lifetime
    pub episode_bytes_sent: f64,
    pub episode_bytes_received: f64,
    pub lifetime_bytes_sent: f64,
    pub lifetime_bytes_received: f64,
    pub want_network: bool,
    pub sporadic_state: Option<i64>,
    pub graphics: Option<GraphicsReply>,
    pending_trickle: TrickleNotice,
    /// Checksums of files the app flagged for upload, for the transfer layer
    pub uploaded_files: Vec<(String, String)>,

    /// Start failure looked like a corrupt executable; ask the file layer
    /// to re-verify the app version's files
    pub needs_app_verify: bool,
    pub(crate) overdue_warned: bool,
    stuck_alerted: bool,
    stuck_sample: Option<(u64, f64, f64)>,
    /// Suspended by the throttle duty cycle (resumed only by it)
    pub(crate) throttled: bool,
}

impl Task {
    pub fn new(spec: TaskSpec, slot: usize, slot_dir: impl Into<PathBuf>) -> Self {
        Self {
            spec,
            result: ResultRecord::default(),
            slot,
            slot_dir: slot_dir.into(),
            state: TaskState::Uninitialized,
            scheduler_state: SchedulerState::Uninitialized,
            handle: None,
            pid: None,
            descendant_snapshot: Vec::new(),
            other_pids: Vec::new(),
            channel: None,
            queue: MsgQueue::new(),
            current_cpu_time: 0.0,
            checkpoint_cpu_time: 0.0,
            elapsed_time: 0.0,
            checkpoint_elapsed_time: 0.0,
            fraction_done: 0.0,
            fraction_done_elapsed: 0.0,
            checkpoint_fraction_done: 0.0,
            checkpoint_fraction_done_elapsed: 0.0,
            checkpoint_wall_ms: 0,
            checkpoint_deadline_ms: 0,
            quit_request_ms: None,
            abort_request_ms: None,
            finish_file_seen_ms: None,
            defer_until_ms: None,
            premature_exit_count: 0,
            wss_bytes: 0,
            smoothed_wss: 0.0,
            swap_bytes: 0,
            page_fault_rate: 0.0,
            last_page_faults: 0,
            peak_wss: 0,
            peak_swap: 0,
            peak_disk: 0,
            episode_bytes_sent: 0.0,
            episode_bytes_received: 0.0,
            lifetime_bytes_sent: 0.0,
            lifetime_bytes_received: 0.0,
            want_network: false,
            sporadic_state: None,
            graphics: None,
            pending_trickle: TrickleNotice::default(),
            uploaded_files: Vec::new(),
            needs_app_verify: false,
            overdue_warned: false,
            stuck_alerted: false,
            stuck_sample: None,
            throttled: false,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Has this task ever written a checkpoint?
    pub fn ever_checkpointed(&self) -> bool {
        self.checkpoint_cpu_time > 0.0
    }

    // === starting ===

    /// Resume a suspended task, or (re)start one with no process.
    pub fn resume_or_start<L, P, C>(
        &mut self,
        ctx: &RunContext<L, P, C>,
        file_ops: &mut FileOps,
    ) -> StartOutcome
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        let now_ms = ctx.clock.epoch_ms();
        match self.state {
            TaskState::Suspended => {
                self.scheduler_state = SchedulerState::Scheduled;
                if let Err(e) = self.unsuspend(SuspendReason::Policy, now_ms) {
                    tracing::error!(result = %self.spec.result_name, error = %e, "resume failed");
                    return StartOutcome::Failed;
                }
                StartOutcome::Started
            }
            TaskState::Uninitialized | TaskState::CopyPending => {
                if let Some(until) = self.defer_until_ms {
                    if now_ms < until {
                        return StartOutcome::Deferred;
                    }
                    self.defer_until_ms = None;
                }
                self.start(ctx, file_ops)
            }
            TaskState::Executing => StartOutcome::Started,
            _ => StartOutcome::Failed,
        }
    }

    /// Stage the slot and spawn the process.
    pub fn start<L, P, C>(&mut self, ctx: &RunContext<L, P, C>, file_ops: &mut FileOps) -> StartOutcome
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        match self.start_inner(ctx, file_ops) {
            Ok(outcome) => outcome,
            Err(err) => {
                // Spawn failures can mean a corrupt executable on disk.
                self.needs_app_verify = matches!(err, EngineError::Launch(LaunchError::Spawn(_)));
                let msg = format!("couldn't start: {err}");
                tracing::error!(result = %self.spec.result_name, slot = self.slot, error = %err, "task start failed");
                self.result.record_failure(ExitCode::InitFailure, msg);
                self.release_channel();
                self.state = TaskState::CouldntStart;
                StartOutcome::Failed
            }
        }
    }

    fn start_inner<L, P, C>(
        &mut self,
        ctx: &RunContext<L, P, C>,
        file_ops: &mut FileOps,
    ) -> Result<StartOutcome, EngineError>
    where
        L: ProcessLauncher,
        P: ResourceProbe,
        C: Clock,
    {
        fs::create_dir_all(&self.slot_dir)?;

        if self.stage_inputs(file_ops)? {
            self.state = TaskState::CopyPending;
            self.scheduler_state = SchedulerState::Scheduled;
            return Ok(StartOutcome::CopyPending);
        }

        let channel = Channel::create(self.slot_dir.join(CHANNEL_FILE))?;
        write_init_data(&self.slot_dir, &self.init_data())?;

        let spawn_spec = self.spawn_spec();
        let handle = match ctx.launcher.spawn(&spawn_spec) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = channel.destroy();
                return Err(e.into());
            }
        };
        self.pid = Some(handle.pid());
        self.handle = Some(handle);
        self.channel = Some(channel);
        self.queue = MsgQueue::new();
        self.episode_bytes_sent = 0.0;
        self.episode_bytes_received = 0.0;
        self.finish_file_seen_ms = None;
        self.state = TaskState::Executing;
        self.scheduler_state = SchedulerState::Scheduled;
        tracing::info!(
            result = %self.spec.result_name,
            slot = self.slot,
            pid = self.pid,
            "task started"
        );
        Ok(StartOutcome::Started)
    }

    /// Link or copy inputs into the slot. Returns `true` when a large
    /// input went onto the async copy queue and staging is not complete.
    fn stage_inputs(&self, file_ops: &mut FileOps) -> Result<bool, EngineError> {
        let mut pending = false;
        for input in &self.spec.input_files {
            let dst = self.slot_dir.join(&input.name);
            if dst.exists() {
                continue;
            }
            let src = if input.source.is_absolute() {
                input.source.clone()
            } else {
                self.spec.project_dir.join(&input.source)
            };
            if file_ops.copy_pending_to(&dst) {
                pending = true;
                continue;
            }
            if !input.copy {
                // Link where possible; fall back to a plain copy across
                // filesystems.
                if fs::hard_link(&src, &dst).is_err() {
                    fs::copy(&src, &dst)?;
                }
                continue;
            }
            let len = fs::metadata(&src)?.len();
            if len > ASYNC_COPY_THRESHOLD {
                file_ops.enqueue_copy(&src, &dst, Some(self.slot))?;
                pending = true;
            } else {
                fs::copy(&src, &dst)?;
            }
        }
        Ok(pending)
    }

    fn init_data(&self) -> InitData {
        InitData {
            result_name: self.spec.result_name.clone(),
            wu_name: self.spec.wu_name.clone(),
            app_name: self.spec.app.app_name.clone(),
            project_url: self.spec.project_url.clone(),
            authenticator: self.spec.authenticator.clone(),
            slot: self.slot,
            project_dir: self.spec.project_dir.clone(),
            slot_dir: self.slot_dir.clone(),
            max_elapsed_secs: self.spec.max_elapsed_secs,
            max_disk_bytes: self.spec.max_disk_bytes,
            max_mem_bytes: self.spec.max_mem_bytes,
            gpu_device: self.spec.gpu_device,
            proxy: None,
        }
    }

    fn spawn_spec(&self) -> SpawnSpec {
        let priority = match self.spec.app.resource {
            // GPU apps starve the device at idle priority
            ResourceKind::Gpu => Priority::BelowNormal,
            ResourceKind::Cpu => Priority::Idle,
        };
        let mut spawn = SpawnSpec::new(&self.spec.app.exec_path, &self.slot_dir)
            .priority(priority)
            .stderr_path(self.slot_dir.join(markers::STDERR_FILE));
        spawn.args = self.spec.command_line.split_whitespace().map(str::to_string).collect();
        spawn
    }

    // === preemption and suspension ===

    /// Preempt: either remove from memory (`request_exit`) or suspend in
    /// place. No-op when the task is not executing (idempotent).
    pub fn preempt(
        &mut self,
        kind: PreemptKind,
        reason: SuspendReason,
        prefs: &UsagePrefs,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        if !matches!(self.state, TaskState::Executing | TaskState::Suspended) {
            return Ok(());
        }
        let mut remove = match kind {
            PreemptKind::NeverRemove => false,
            PreemptKind::AlwaysRemove => true,
            PreemptKind::RemoveIfUserPrefs => prefs.remove_from_memory,
            PreemptKind::RemoveByPolicy => true,
        };
        if matches!(kind, PreemptKind::RemoveIfUserPrefs | PreemptKind::RemoveByPolicy) {
            // A task that has never checkpointed would redo everything;
            // GPU memory is scarce, and that takes precedence.
            if !self.ever_checkpointed() {
                remove = false;
            }
            if self.spec.uses_gpu() {
                remove = true;
            }
        }
        self.scheduler_state = SchedulerState::Preempted;
        if remove {
            self.request_exit(now_ms)
        } else {
            self.suspend(reason, now_ms)
        }
    }

    /// Tell the app to pause, leaving it resident.
    pub fn suspend(&mut self, reason: SuspendReason, now_ms: u64) -> Result<(), EngineError> {
        if self.state != TaskState::Executing {
            return Ok(());
        }
        // A still-queued resume means the app never saw it; cancel both.
        if !self.queue.purge(&ControlRequest::Resume.render()) {
            if let Some(chan) = &self.channel {
                self.queue.send(chan, Mailbox::ProcessControl, ControlRequest::Suspend.render(), now_ms)?;
            }
        }
        if reason.loggable() {
            tracing::info!(result = %self.spec.result_name, %reason, "suspending task");
        }
        self.state = TaskState::Suspended;
        Ok(())
    }

    /// Tell the app to continue.
    pub fn unsuspend(&mut self, reason: SuspendReason, now_ms: u64) -> Result<(), EngineError> {
        if self.state != TaskState::Suspended {
            return Ok(());
        }
        if !self.queue.purge(&ControlRequest::Suspend.render()) {
            if let Some(chan) = &self.channel {
                self.queue.send(chan, Mailbox::ProcessControl, ControlRequest::Resume.render(), now_ms)?;
            }
        }
        if reason.loggable() {
            tracing::info!(result = %self.spec.result_name, %reason, "resuming task");
        }
        self.state = TaskState::Executing;
        self.throttled = false;
        Ok(())
    }

    // === exit requests ===

    /// Ask the app to quit (checkpoint and exit). Cooperative; the
    /// supervisor escalates to a kill after the quit timeout.
    pub fn request_exit(&mut self, now_ms: u64) -> Result<(), EngineError> {
        if !self.state.process_exists() || self.state.exit_pending() {
            return Ok(());
        }
        self.snapshot_descendants();
        if let Some(chan) = &self.channel {
            self.queue.send(chan, Mailbox::ProcessControl, ControlRequest::Quit.render(), now_ms)?;
        }
        self.quit_request_ms = Some(now_ms);
        self.state = TaskState::QuitPending;
        Ok(())
    }

    /// Ask the app to abort. Same escalation as `request_exit`.
    pub fn request_abort(&mut self, now_ms: u64) -> Result<(), EngineError> {
        if !self.state.process_exists() || self.state == TaskState::AbortPending {
            return Ok(());
        }
        self.snapshot_descendants();
        if let Some(chan) = &self.channel {
            self.queue.send(chan, Mailbox::ProcessControl, ControlRequest::Abort.render(), now_ms)?;
        }
        self.abort_request_ms = Some(now_ms);
        self.state = TaskState::AbortPending;
        Ok(())
    }

    fn snapshot_descendants(&mut self) {
        if let Some(pid) = self.pid {
            self.descendant_snapshot = descendants(&process_list(), pid);
        }
    }

    /// Terminal abort: record the error on the result and get rid of the
    /// process. Never retried.
    pub fn abort_task(
        &mut self,
        code: ExitCode,
        message: impl Into<String>,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        if self.state == TaskState::Aborted || self.state == TaskState::AbortPending {
            return Ok(());
        }
        let msg = message.into();
        tracing::warn!(result = %self.spec.result_name, code = %code, %msg, "aborting task");
        self.result.record_failure(code, msg);
        self.copy_final_usage();
        if self.state.process_exists() {
            self.request_abort(now_ms)?;
        } else {
            self.state = TaskState::Aborted;
        }
        Ok(())
    }

    /// Outstanding quit/abort request age, for timeout escalation.
    pub fn exit_request_age_ms(&self, now_ms: u64) -> Option<u64> {
        match self.state {
            TaskState::QuitPending => self.quit_request_ms.map(|t| now_ms.saturating_sub(t)),
            TaskState::AbortPending => self.abort_request_ms.map(|t| now_ms.saturating_sub(t)),
            _ => None,
        }
    }

    /// Forcefully terminate the process group and known helpers.
    pub fn kill(&mut self) {
        tracing::warn!(result = %self.spec.result_name, pid = self.pid, "killing task");
        if let Some(handle) = &mut self.handle {
            if let Err(e) = handle.kill_group() {
                tracing::warn!(result = %self.spec.result_name, error = %e, "kill_group failed");
            }
        }
        for pid in self.descendant_snapshot.iter().chain(self.other_pids.iter()) {
            kill_pid(*pid);
        }
    }

    // === exit handling ===

    /// Non-blocking reap of the task's process.
    pub fn try_reap(&mut self) -> Option<ExitOutcome> {
        let handle = self.handle.as_mut()?;
        match handle.try_reap() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(result = %self.spec.result_name, error = %e, "reap failed");
                Some(ExitOutcome::Exited(ExitCode::Unknown.code()))
            }
        }
    }

    /// The single funnel for any process-death notification.
    pub fn handle_exited_app(&mut self, outcome: ExitOutcome, prefs: &UsagePrefs, now_ms: u64) {
        // Last chance to read final status/trickle before the channel dies.
        self.drain_channel(now_ms);
        self.copy_final_usage();

        let was_abort = self.state == TaskState::AbortPending;
        let was_quit = self.state == TaskState::QuitPending;

        if was_abort {
            self.state = TaskState::Aborted;
        } else if was_quit {
            self.state = TaskState::Uninitialized;
        } else {
            self.classify_exit(outcome, prefs, now_ms);
        }

        // Sweep anything the job left behind.
        let mut leftovers = self.descendant_snapshot.clone();
        if let Some(pid) = self.pid {
            leftovers.extend(descendants(&process_list(), pid));
        }
        leftovers.extend(self.other_pids.iter().copied());
        for pid in leftovers {
            kill_pid(pid);
        }

        self.release_channel();
        self.handle = None;
        self.pid = None;
        self.quit_request_ms = None;
        self.abort_request_ms = None;
        self.finish_file_seen_ms = None;

        if self.state != TaskState::Uninitialized {
            // Not restarting: salvage outputs and the stderr capture, and
            // free the GPU backoff held by siblings (handled by the set).
            self.copy_output_files();
            match read_stderr_tail(&self.slot_dir) {
                Ok(tail) => self.result.stderr_out = tail,
                Err(e) => {
                    tracing::warn!(result = %self.spec.result_name, error = %e, "stderr capture read failed")
                }
            }
        }
        tracing::info!(
            result = %self.spec.result_name,
            state = %self.state,
            exit = ?outcome,
            "task exit handled"
        );
    }

    fn classify_exit(&mut self, outcome: ExitOutcome, prefs: &UsagePrefs, now_ms: u64) {
        match outcome {
            ExitOutcome::Exited(code) => {
                if finish_file_exists(&self.slot_dir) {
                    // Genuine completion; the finish file's status wins.
                    match read_finish_file(&self.slot_dir) {
                        Ok(info) => {
                            self.result.record_success(info.status);
                            self.result.is_notice = info.is_notice;
                            if let Some(msg) = info.message {
                                if info.is_notice {
                                    tracing::warn!(result = %self.spec.result_name, %msg, "task finished");
                                } else {
                                    tracing::info!(result = %self.spec.result_name, %msg, "task finished");
                                }
                                self.result.message = Some(msg);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(result = %self.spec.result_name, error = %e, "unreadable finish file");
                            self.result.record_success(code);
                        }
                    }
                    self.state = TaskState::Exited;
                } else if temporary_exit_exists(&self.slot_dir) {
                    self.handle_temporary_exit(now_ms);
                } else if code == 0 {
                    // Ambiguous: zero status, no marker at all.
                    self.handle_premature_exit(prefs);
                } else {
                    self.result
                        .record_raw_failure(code, format!("process exited with code {code}"));
                    self.state = TaskState::Exited;
                }
            }
            ExitOutcome::Signaled(sig) => {
                if is_external_kill_signal(sig) {
                    tracing::info!(result = %self.spec.result_name, sig, "killed externally; will restart");
                    self.state = TaskState::Uninitialized;
                } else {
                    self.result
                        .record_raw_failure(ExitCode::Signal.code(), format!("process got signal {sig}"));
                    self.state = TaskState::WasSignaled;
                }
            }
        }
    }

    fn handle_temporary_exit(&mut self, now_ms: u64) {
        match read_temporary_exit(&self.slot_dir) {
            Ok(te) => {
                self.defer_until_ms = Some(now_ms + (te.backoff_secs * 1000.0) as u64);
                let reason = te.reason.unwrap_or_default();
                if te.is_notice {
                    tracing::warn!(result = %self.spec.result_name, backoff = te.backoff_secs, %reason, "temporary exit");
                } else {
                    tracing::info!(result = %self.spec.result_name, backoff = te.backoff_secs, %reason, "temporary exit");
                }
            }
            Err(e) => {
                tracing::warn!(result = %self.spec.result_name, error = %e, "unreadable temporary-exit marker");
            }
        }
        let _ = fs::remove_file(self.slot_dir.join(markers::TEMPORARY_EXIT_FILE));
        self.state = TaskState::Uninitialized;
    }

    /// Zero-status exit with no marker: retried under a capped budget.
    /// The counter is monotonic; only a successful checkpoint resets it.
    pub fn handle_premature_exit(&mut self, prefs: &UsagePrefs) {
        if self.state == TaskState::Aborted {
            return;
        }
        self.premature_exit_count += 1;
        if self.premature_exit_count > prefs.premature_exit_limit {
            self.result.record_failure(
                ExitCode::TooManyExits,
                format!("{} premature exits", self.premature_exit_count),
            );
            self.state = TaskState::Aborted;
        } else {
            tracing::info!(
                result = %self.spec.result_name,
                count = self.premature_exit_count,
                "premature exit; will restart"
            );
            self.state = TaskState::Uninitialized;
        }
    }

    // === channel traffic ===

    /// Read every inbound mailbox once. Returns `true` when a checkpoint
    /// was observed (caller persists the slot state file).
    pub fn drain_channel(&mut self, now_ms: u64) -> bool {
        let status = self.receive_mail(Mailbox::AppStatus);
        let trickle = self.receive_mail(Mailbox::TrickleUp);
        let graphics = self.receive_mail(Mailbox::GraphicsReply);

        let mut checkpointed = false;
        if let Some(text) = status {
            checkpointed = self.process_app_status(AppStatus::parse(&text), now_ms);
        }
        if let Some(text) = trickle {
            let notice = TrickleNotice::parse(&text);
            self.pending_trickle.new_trickle_up |= notice.new_trickle_up;
            self.pending_trickle.new_upload_file |= notice.new_upload_file;
        }
        if let Some(text) = graphics {
            self.graphics = Some(GraphicsReply::parse(&text));
        }
        checkpointed
    }

    fn receive_mail(&self, mbox: Mailbox) -> Option<String> {
        let chan = self.channel.as_ref()?;
        match chan.receive(mbox) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(result = %self.spec.result_name, mailbox = %mbox, error = %e, "mailbox read failed");
                None
            }
        }
    }

    /// Fold one status report into the counters. Returns `true` on an
    /// observed checkpoint-time advance.
    pub fn process_app_status(&mut self, status: AppStatus, now_ms: u64) -> bool {
        if let Some(v) = status.current_cpu_time {
            self.current_cpu_time = v;
        }
        if let Some(v) = status.fraction_done {
            self.fraction_done = v;
            self.fraction_done_elapsed = status.fraction_done_elapsed.unwrap_or(self.elapsed_time);
        }
        if let Some(v) = status.working_set_hint {
            self.wss_bytes = self.wss_bytes.max(v);
        }
        if let Some(pid) = status.other_pid {
            if !self.other_pids.contains(&pid) {
                self.other_pids.push(pid);
            }
        }
        if let Some(sent) = status.bytes_sent {
            self.lifetime_bytes_sent += (sent - self.episode_bytes_sent).max(0.0);
            self.episode_bytes_sent = sent;
        }
        if let Some(received) = status.bytes_received {
            self.lifetime_bytes_received += (received - self.episode_bytes_received).max(0.0);
            self.episode_bytes_received = received;
        }
        if status.want_network {
            self.want_network = true;
        }
        if let Some(v) = status.sporadic_state {
            self.sporadic_state = Some(v);
        }

        let mut checkpointed = false;
        if let Some(v) = status.checkpoint_cpu_time {
            if v != self.checkpoint_cpu_time {
                self.checkpoint_cpu_time = v;
                self.checkpoint_elapsed_time = self.elapsed_time;
                self.checkpoint_fraction_done = self.fraction_done;
                self.checkpoint_fraction_done_elapsed = self.fraction_done_elapsed;
                self.checkpoint_wall_ms = now_ms;
                self.checkpoint_deadline_ms = now_ms + crate::CHECKPOINT_PERIOD_MS;
                // A successful checkpoint resets retry pressure.
                self.premature_exit_count = 0;
                checkpointed = true;
            }
        }
        checkpointed
    }

    /// Trickle/upload flags accumulated since the last take.
    pub fn take_trickle(&mut self) -> TrickleNotice {
        std::mem::take(&mut self.pending_trickle)
    }

    /// Send the per-tick heartbeat. Advisory: mailbox-full is logged and
    /// otherwise ignored, without queueing.
    pub fn send_heartbeat(&self, prefs: &UsagePrefs, sporadic: Option<i64>) {
        let Some(chan) = &self.channel else {
            return;
        };
        let hb = Heartbeat {
            wss_hint: self.smoothed_wss as u64,
            max_wss: prefs.ram_avail_bytes,
            network_suspended: prefs.network_suspended,
            sporadic_available: sporadic,
        };
        match chan.send(Mailbox::Heartbeat, &hb.render()) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(result = %self.spec.result_name, "heartbeat mailbox still full")
            }
            Err(e) => tracing::warn!(result = %self.spec.result_name, error = %e, "heartbeat send failed"),
        }
    }

    /// Ask the app for its graphics coordinates (web URL or remote
    /// desktop address). The reply lands in the graphics mailbox and is
    /// picked up by the next drain. Returns `false` when a previous
    /// request is still unread.
    pub fn request_graphics(&self) -> Result<bool, EngineError> {
        match &self.channel {
            Some(chan) => Ok(chan.send(Mailbox::GraphicsRequest, "<graphics_request/>\n")?),
            None => Ok(false),
        }
    }

    /// Relay a process-control request (network available, config reread).
    pub fn send_control(&mut self, request: ControlRequest, now_ms: u64) -> Result<(), EngineError> {
        if let Some(chan) = &self.channel {
            self.queue.send(chan, Mailbox::ProcessControl, request.render(), now_ms)?;
        }
        Ok(())
    }

    /// Retry queued outbound messages.
    pub fn poll_queue(&mut self) {
        if let Some(chan) = &self.channel {
            if let Err(e) = self.queue.poll(chan, Mailbox::ProcessControl) {
                tracing::warn!(result = %self.spec.result_name, error = %e, "queue poll failed");
            }
        }
    }

    /// How long the outbound queue has been blocked.
    pub fn queue_blocked_ms(&self, now_ms: u64) -> Option<u64> {
        self.queue.blocked_for_ms(now_ms)
    }

    fn release_channel(&mut self) {
        self.queue.clear();
        if let Some(chan) = self.channel.take() {
            if let Err(e) = chan.destroy() {
                tracing::warn!(result = %self.spec.result_name, error = %e, "channel destroy failed");
            }
        }
    }

    // === resource accounting ===

    /// Refresh the usage snapshot from the probe. `dt_secs` is the time
    /// since the previous refresh, for the page-fault rate.
    pub fn refresh_usage<P: ResourceProbe>(&mut self, probe: &P, dt_secs: f64) {
        let Some(pid) = self.pid else {
            return;
        };
        let Ok(snap) = probe.snapshot(pid) else {
            return; // about to be reaped
        };
        self.wss_bytes = snap.wss_bytes;
        self.smoothed_wss = if self.smoothed_wss == 0.0 {
            snap.wss_bytes as f64
        } else {
            WSS_SMOOTHING * snap.wss_bytes as f64 + (1.0 - WSS_SMOOTHING) * self.smoothed_wss
        };
        self.swap_bytes = snap.swap_bytes;
        if dt_secs > 0.0 {
            self.page_fault_rate =
                snap.page_faults.saturating_sub(self.last_page_faults) as f64 / dt_secs;
        }
        self.last_page_faults = snap.page_faults;
        self.peak_wss = self.peak_wss.max(snap.wss_bytes);
        self.peak_swap = self.peak_swap.max(snap.swap_bytes);
        // The OS view of CPU time floors whatever the app last reported.
        if snap.cpu_time_secs > self.current_cpu_time {
            self.current_cpu_time = snap.cpu_time_secs;
        }
    }

    /// Walk the slot directory and return its disk usage, tracking the peak.
    pub fn slot_disk_usage(&mut self) -> u64 {
        let usage = dir_size(&self.slot_dir);
        self.peak_disk = self.peak_disk.max(usage);
        usage
    }

    /// Progress comparison on the stuck-check cadence. Returns `true` the
    /// first time the task shows no progress and negligible CPU burn over
    /// a full interval (one-time user alert, not an abort).
    pub fn check_stuck(&mut self, now_ms: u64) -> bool {
        if self.state != TaskState::Executing {
            self.stuck_sample = None;
            return false;
        }
        match self.stuck_sample {
            None => {
                self.stuck_sample = Some((now_ms, self.fraction_done, self.current_cpu_time));
                false
            }
            Some((t, frac, cpu)) => {
                if now_ms.saturating_sub(t) < STUCK_CHECK_INTERVAL_MS {
                    return false;
                }
                let no_progress =
                    self.fraction_done <= frac && (self.current_cpu_time - cpu) < 1.0;
                self.stuck_sample = Some((now_ms, self.fraction_done, self.current_cpu_time));
                if no_progress && !self.stuck_alerted {
                    self.stuck_alerted = true;
                    return true;
                }
                false
            }
        }
    }

    fn copy_final_usage(&mut self) {
        self.result.final_cpu_time = self.current_cpu_time;
        self.result.final_elapsed_time = self.elapsed_time;
        self.result.final_peak_wss = self.peak_wss;
        self.result.final_peak_swap = self.peak_swap;
        self.result.final_peak_disk = self.peak_disk;
    }

    fn copy_output_files(&self) {
        for name in &self.spec.output_files {
            let src = self.slot_dir.join(name);
            if !src.exists() {
                continue;
            }
            let dst = self.spec.project_dir.join(name);
            if let Err(e) = fs::copy(&src, &dst) {
                tracing::warn!(result = %self.spec.result_name, file = %name, error = %e, "output copy failed");
            }
        }
    }

    // === checkpoint persistence ===

    pub fn slot_state(&self) -> SlotState {
        SlotState {
            project_url: self.spec.project_url.clone(),
            result_name: self.spec.result_name.clone(),
            checkpoint_cpu_time: self.checkpoint_cpu_time,
            checkpoint_elapsed_time: self.checkpoint_elapsed_time,
            fraction_done: self.checkpoint_fraction_done,
            peak_wss: self.peak_wss,
            peak_swap: self.peak_swap,
            peak_disk: self.peak_disk,
        }
    }

    /// Persist the small per-slot state file (not the full client state).
    pub fn write_slot_state(&self) -> Result<(), EngineError> {
        write_slot_state(&self.slot_dir, &self.slot_state())?;
        Ok(())
    }

    /// Merge a recovered slot-state file into this task on agent restart.
    /// Checkpointed values never regress. Returns `false` (and changes
    /// nothing) when the file belongs to a different task.
    pub fn merge_slot_state(&mut self, state: &SlotState) -> bool {
        if state.result_name != self.spec.result_name
            || state.project_url != self.spec.project_url
        {
            tracing::error!(
                result = %self.spec.result_name,
                file_result = %state.result_name,
                "internal error: slot state file does not match task; discarding"
            );
            return false;
        }
        if state.checkpoint_cpu_time > self.checkpoint_cpu_time {
            self.checkpoint_cpu_time = state.checkpoint_cpu_time;
            self.current_cpu_time = self.current_cpu_time.max(state.checkpoint_cpu_time);
        }
        if state.checkpoint_elapsed_time > self.checkpoint_elapsed_time {
            self.checkpoint_elapsed_time = state.checkpoint_elapsed_time;
            self.elapsed_time = self.elapsed_time.max(state.checkpoint_elapsed_time);
        }
        if state.fraction_done > self.checkpoint_fraction_done {
            self.checkpoint_fraction_done = state.fraction_done;
            self.fraction_done = self.fraction_done.max(state.fraction_done);
        }
        self.peak_wss = self.peak_wss.max(state.peak_wss);
        self.peak_swap = self.peak_swap.max(state.peak_swap);
        self.peak_disk = self.peak_disk.max(state.peak_disk);
        true
    }

    /// Recover from the slot's state file, if one survives.
    pub fn load_slot_state(&mut self) {
        match read_slot_state(&self.slot_dir) {
            Ok(state) => {
                self.merge_slot_state(&state);
            }
            Err(quern_storage::StorageError::Io(_)) => {}
            Err(e) => {
                tracing::error!(result = %self.spec.result_name, error = %e, "discarding corrupt slot state file")
            }
        }
    }

    /// Wall-clock baselines cleared after a system clock jump so timeout
    /// escalation never misfires.
    pub fn on_clock_jump(&mut self, now_ms: u64) {
        if self.quit_request_ms.is_some() {
            self.quit_request_ms = Some(now_ms);
        }
        if self.abort_request_ms.is_some() {
            self.abort_request_ms = Some(now_ms);
        }
        if self.finish_file_seen_ms.is_some() {
            self.finish_file_seen_ms = Some(now_ms);
        }
        self.checkpoint_deadline_ms = now_ms + crate::CHECKPOINT_PERIOD_MS;
        self.stuck_sample = None;
    }

    /// Remove everything from the slot directory (work permanently gone).
    /// The slot must not be reused until this has succeeded.
    pub fn clean_slot(&mut self) -> Result<(), EngineError> {
        self.release_channel();
        if self.slot_dir.exists() {
            fs::remove_dir_all(&self.slot_dir)?;
        }
        Ok(())
    }
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    let mut total = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else {
            continue;
        };
        if meta.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Work descriptors: what the scheduling layer hands the execution core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::status::ExitCode;

/// Processing resource a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cpu,
    Gpu,
}

crate::simple_display! {
    ResourceKind {
        Cpu => "cpu",
        Gpu => "gpu",
    }
}

/// An installed app version a task executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppVersion {
    pub app_name: String,
    pub version_num: u32,
    pub exec_path: PathBuf,
    pub resource: ResourceKind,
}

impl AppVersion {
    pub fn new(app_name: impl Into<String>, version_num: u32, exec_path: impl Into<PathBuf>) -> Self {
        Self {
            app_name: app_name.into(),
            version_num,
            exec_path: exec_path.into(),
            resource: ResourceKind::Cpu,
        }
    }

    crate::setters! {
        set {
            resource: ResourceKind,
        }
    }
}

/// One input file to stage into the slot before start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFile {
    /// Logical name inside the slot directory
    pub name: String,
    /// Path in the project directory
    pub source: PathBuf,
    /// Copy instead of link (apps that write to their inputs)
    pub copy: bool,
}

/// The work descriptor for one result: identity, limits, deadline.
///
/// Limits are copied into the task at start; the descriptor itself is
/// owned by the scheduling layer and treated as read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub result_name: String,
    pub wu_name: String,
    pub project_url: String,
    pub app: AppVersion,
    pub command_line: String,
    /// Abort when elapsed time exceeds this, seconds (0 = no bound)
    pub max_elapsed_secs: f64,
    /// Abort when slot disk usage exceeds this, bytes (0 = no bound)
    pub max_disk_bytes: u64,
    /// Abort when working set exceeds this, bytes (0 = no bound)
    pub max_mem_bytes: u64,
    /// Reporting deadline, epoch ms
    pub report_deadline_ms: u64,
    /// Exempt from the elapsed-time bound
    pub always_run: bool,
    /// Project directory: input sources live here, outputs are copied back
    pub project_dir: PathBuf,
    pub input_files: Vec<InputFile>,
    /// Logical names of outputs to copy out of the slot on final exit
    pub output_files: Vec<String>,
    /// Project credential forwarded via the init-data file
    pub authenticator: String,
    /// Assigned device ordinal for GPU tasks
    pub gpu_device: Option<i64>,
}

impl TaskSpec {
    pub fn new(result_name: impl Into<String>, app: AppVersion) -> Self {
        let result_name = result_name.into();
        let wu_name = result_name.clone();
        Self {
            result_name,
            wu_name,
            project_url: String::new(),
            app,
            command_line: String::new(),
            max_elapsed_secs: 0.0,
            max_disk_bytes: 0,
            max_mem_bytes: 0,
            report_deadline_ms: 0,
            always_run: false,
            project_dir: PathBuf::new(),
            input_files: Vec::new(),
            output_files: Vec::new(),
            authenticator: String::new(),
            gpu_device: None,
        }
    }

    crate::setters! {
        into {
            wu_name: String,
            project_url: String,
            command_line: String,
            project_dir: PathBuf,
            authenticator: String,
        }
        set {
            max_elapsed_secs: f64,
            max_disk_bytes: u64,
            max_mem_bytes: u64,
            report_deadline_ms: u64,
            always_run: bool,
            input_files: Vec<InputFile>,
            output_files: Vec<String>,
        }
        option {
            gpu_device: i64,
        }
    }

    pub fn uses_gpu(&self) -> bool {
        self.app.resource == ResourceKind::Gpu
    }
}

/// Where the result stands with the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultState {
    Fresh,
    Computing,
    Done,
    Error,
}

crate::simple_display! {
    ResultState {
        Fresh => "fresh",
        Computing => "computing",
        Done => "done",
        Error => "error",
    }
}

/// Mutable outcome record for a result.
///
/// Job-level failures land here as a (status, message) pair; they are
/// never surfaced as agent-level errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub state: ResultState,
    pub exit_status: Option<i32>,
    pub message: Option<String>,
    /// Elevate `message` to a user alert instead of an info line
    pub is_notice: bool,
    pub ready_to_report: bool,
    pub final_cpu_time: f64,
    pub final_elapsed_time: f64,
    pub final_peak_wss: u64,
    pub final_peak_swap: u64,
    pub final_peak_disk: u64,
    /// Stderr tail captured from the slot on final exit
    pub stderr_out: String,
}

impl Default for ResultRecord {
    fn default() -> Self {
        Self {
            state: ResultState::Fresh,
            exit_status: None,
            message: None,
            is_notice: false,
            ready_to_report: false,
            final_cpu_time: 0.0,
            final_elapsed_time: 0.0,
            final_peak_wss: 0,
            final_peak_swap: 0,
            final_peak_disk: 0,
            stderr_out: String::new(),
        }
    }
}

impl ResultRecord {
    /// Record a permanent compute error.
    pub fn record_failure(&mut self, code: ExitCode, message: impl Into<String>) {
        self.state = ResultState::Error;
        self.exit_status = Some(code.code());
        self.message = Some(message.into());
        self.ready_to_report = true;
    }

    /// Record a permanent failure with a raw process exit status
    /// (nonzero exit with no recognized marker, unhandled signal).
    pub fn record_raw_failure(&mut self, status: i32, message: impl Into<String>) {
        self.state = ResultState::Error;
        self.exit_status = Some(status);
        self.message = Some(message.into());
        self.ready_to_report = true;
    }

    /// Record genuine successful completion.
    pub fn record_success(&mut self, status: i32) {
        self.state = ResultState::Done;
        self.exit_status = Some(status);
        self.ready_to_report = true;
    }

    pub fn is_failed(&self) -> bool {
        self.state == ResultState::Error
    }
}

/// Global usage preferences the core consults. Decided elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePrefs {
    /// CPU usage limit percentage, 0–100
    pub cpu_usage_limit: f64,
    /// Global available-RAM ceiling for any one task, bytes
    pub ram_avail_bytes: u64,
    /// Abort results this many days past their reporting deadline (0 = never)
    pub max_overdue_days: f64,
    /// Process names whose presence suspends computation
    pub exclusive_apps: Vec<String>,
    /// User pref: preempted apps leave memory
    pub remove_from_memory: bool,
    /// Network activity currently suspended (relayed in heartbeats)
    pub network_suspended: bool,
    /// Premature-exit retry budget before a task is hard-aborted
    pub premature_exit_limit: u32,
}

impl Default for UsagePrefs {
    fn default() -> Self {
        Self {
            cpu_usage_limit: 100.0,
            ram_avail_bytes: u64::MAX,
            max_overdue_days: 0.0,
            exclusive_apps: Vec::new(),
            remove_from_memory: false,
            network_suspended: false,
            premature_exit_limit: 100,
        }
    }
}

impl UsagePrefs {
    crate::setters! {
        set {
            cpu_usage_limit: f64,
            ram_avail_bytes: u64,
            max_overdue_days: f64,
            exclusive_apps: Vec<String>,
            remove_from_memory: bool,
            network_suspended: bool,
            premature_exit_limit: u32,
        }
    }
}

#[cfg(test)]
#[path = "work_tests.rs"]
mod tests;

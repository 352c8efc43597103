// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-slot task-state file.
//!
//! Written on every observed checkpoint so restart recovery is fresher
//! than the last full client-state write, and read back on agent start.
//! Carries the project URL and result name purely as a sanity cross-check
//! against the in-memory record it is merged into.

use std::fs;
use std::path::Path;

use quern_core::codec;

use crate::StorageError;

pub const SLOT_STATE_FILE: &str = "task_state.txt";

/// Checkpointed progress and peak usage for one slot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlotState {
    pub project_url: String,
    pub result_name: String,
    pub checkpoint_cpu_time: f64,
    pub checkpoint_elapsed_time: f64,
    pub fraction_done: f64,
    pub peak_wss: u64,
    pub peak_swap: u64,
    pub peak_disk: u64,
}

impl SlotState {
    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("<task_state>\n");
        codec::put_str(&mut out, "project_url", &self.project_url);
        codec::put_str(&mut out, "result_name", &self.result_name);
        codec::put_f64(&mut out, "checkpoint_cpu_time", self.checkpoint_cpu_time);
        codec::put_f64(&mut out, "checkpoint_elapsed_time", self.checkpoint_elapsed_time);
        codec::put_f64(&mut out, "fraction_done", self.fraction_done);
        codec::put_u64(&mut out, "peak_working_set_size", self.peak_wss);
        codec::put_u64(&mut out, "peak_swap_size", self.peak_swap);
        codec::put_u64(&mut out, "peak_disk_usage", self.peak_disk);
        out.push_str("</task_state>\n");
        out
    }

    fn parse(text: &str) -> Result<Self, StorageError> {
        if !text.contains("<task_state>") {
            return Err(StorageError::Malformed {
                file: SLOT_STATE_FILE,
                reason: "missing <task_state> element".into(),
            });
        }
        Ok(SlotState {
            project_url: codec::get_str(text, "project_url").unwrap_or_default().to_string(),
            result_name: codec::get_str(text, "result_name").unwrap_or_default().to_string(),
            checkpoint_cpu_time: codec::get_f64(text, "checkpoint_cpu_time").unwrap_or(0.0),
            checkpoint_elapsed_time: codec::get_f64(text, "checkpoint_elapsed_time").unwrap_or(0.0),
            fraction_done: codec::get_f64(text, "fraction_done").unwrap_or(0.0),
            peak_wss: codec::get_u64(text, "peak_working_set_size").unwrap_or(0),
            peak_swap: codec::get_u64(text, "peak_swap_size").unwrap_or(0),
            peak_disk: codec::get_u64(text, "peak_disk_usage").unwrap_or(0),
        })
    }
}

/// Write the state file atomically (temp + rename), so a crash mid-write
/// never leaves a torn file for restart recovery to trip over.
pub fn write_slot_state(slot_dir: &Path, state: &SlotState) -> Result<(), StorageError> {
    let tmp = slot_dir.join(format!("{}.tmp", SLOT_STATE_FILE));
    fs::write(&tmp, state.render())?;
    fs::rename(&tmp, slot_dir.join(SLOT_STATE_FILE))?;
    Ok(())
}

pub fn read_slot_state(slot_dir: &Path) -> Result<SlotState, StorageError> {
    let text = fs::read_to_string(slot_dir.join(SLOT_STATE_FILE))?;
    SlotState::parse(&text)
}

#[cfg(test)]
#[path = "slot_state_tests.rs"]
mod tests;

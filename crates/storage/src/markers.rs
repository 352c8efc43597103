// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Marker files apps leave in their slot directory.
//!
//! - finish file: the sole signal of genuine success after a zero exit
//! - temporary-exit marker: self-requested deferral with a backoff
//! - upload request/status markers: "file X is ready to upload"
//! - stderr capture: read the tail, then truncate

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::StorageError;

pub const FINISH_FILE: &str = "finish_called";
pub const TEMPORARY_EXIT_FILE: &str = "temporary_exit";
pub const UPLOAD_REQUEST_PREFIX: &str = "ufr_";
pub const UPLOAD_STATUS_PREFIX: &str = "ufs_";
pub const STDERR_FILE: &str = "stderr.txt";

/// Largest stderr tail copied into the result record.
pub const STDERR_TAIL_CAP: u64 = 63 * 1024;

/// Backoff used when the temporary-exit marker is malformed.
pub const DEFAULT_TEMPORARY_EXIT_BACKOFF: f64 = 300.0;
/// Longest self-requested deferral an app may ask for.
pub const MAX_TEMPORARY_EXIT_BACKOFF: f64 = 86_400.0;

/// Parsed finish file.
///
/// First line is the integer exit status; optional following lines are a
/// user-visible message and a line containing `notice` that elevates the
/// message to a user alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishInfo {
    pub status: i32,
    pub message: Option<String>,
    pub is_notice: bool,
}

pub fn read_finish_file(slot_dir: &Path) -> Result<FinishInfo, StorageError> {
    let text = fs::read_to_string(slot_dir.join(FINISH_FILE))?;
    let mut lines = text.lines();
    let status = lines
        .next()
        .and_then(|l| l.trim().parse::<i32>().ok())
        .ok_or_else(|| StorageError::Malformed {
            file: FINISH_FILE,
            reason: "first line is not an integer status".into(),
        })?;
    let mut message = None;
    let mut is_notice = false;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "notice" {
            is_notice = true;
        } else if message.is_none() {
            message = Some(line.to_string());
        }
    }
    Ok(FinishInfo { status, message, is_notice })
}

pub fn finish_file_exists(slot_dir: &Path) -> bool {
    slot_dir.join(FINISH_FILE).exists()
}

/// Parsed temporary-exit marker.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporaryExit {
    /// Requested backoff, clamped to [0, 86400]; malformed → 300
    pub backoff_secs: f64,
    pub reason: Option<String>,
    pub is_notice: bool,
}

/// Read and interpret the temporary-exit marker. Never fails on content:
/// a malformed first field falls back to the default backoff.
pub fn read_temporary_exit(slot_dir: &Path) -> Result<TemporaryExit, StorageError> {
    let text = fs::read_to_string(slot_dir.join(TEMPORARY_EXIT_FILE))?;
    let mut lines = text.lines();
    let backoff_secs = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .and_then(|f| f.parse::<f64>().ok())
        .map(|b| b.clamp(0.0, MAX_TEMPORARY_EXIT_BACKOFF))
        .unwrap_or(DEFAULT_TEMPORARY_EXIT_BACKOFF);
    let reason = lines.next().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string);
    let is_notice = lines.next().map(str::trim) == Some("notice");
    Ok(TemporaryExit { backoff_secs, reason, is_notice })
}

pub fn temporary_exit_exists(slot_dir: &Path) -> bool {
    slot_dir.join(TEMPORARY_EXIT_FILE).exists()
}

/// Logical names of files the app flagged as ready to upload
/// (zero-byte `ufr_<name>` markers).
pub fn upload_requests(slot_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(slot_dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| {
            e.file_name()
                .to_str()
                .and_then(|n| n.strip_prefix(UPLOAD_REQUEST_PREFIX))
                .map(str::to_string)
        })
        .collect();
    names.sort();
    names
}

/// Remove the request marker once the upload has been registered.
pub fn remove_upload_request(slot_dir: &Path, name: &str) -> Result<(), StorageError> {
    fs::remove_file(slot_dir.join(format!("{UPLOAD_REQUEST_PREFIX}{name}")))?;
    Ok(())
}

/// Write the status file the running app polls for.
pub fn write_upload_status(slot_dir: &Path, name: &str, status: i32) -> Result<PathBuf, StorageError> {
    let path = slot_dir.join(format!("{UPLOAD_STATUS_PREFIX}{name}"));
    fs::write(&path, format!("<status>{status}</status>\n"))?;
    Ok(path)
}

/// Read the tail of the stderr capture (capped), then truncate the file.
///
/// Returns an empty string when there is no capture.
pub fn read_stderr_tail(slot_dir: &Path) -> Result<String, StorageError> {
    let path = slot_dir.join(STDERR_FILE);
    let Ok(mut file) = fs::OpenOptions::new().read(true).write(true).open(&path) else {
        return Ok(String::new());
    };
    let len = file.metadata()?.len();
    if len > STDERR_TAIL_CAP {
        file.seek(SeekFrom::End(-(STDERR_TAIL_CAP as i64)))?;
    }
    let mut buf = Vec::new();
    (&file).take(STDERR_TAIL_CAP).read_to_end(&mut buf)?;
    file.set_len(0)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
#[path = "markers_tests.rs"]
mod tests;

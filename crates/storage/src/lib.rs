// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! quern-storage: the on-disk files a slot directory carries.
//!
//! Per-slot task-state file (checkpoint recovery), init-data file (consumed
//! by the app at startup), and the marker files apps use to talk through
//! the filesystem: finish file, temporary-exit marker, upload requests,
//! stderr capture.

pub mod init_data;
pub mod markers;
pub mod slot_state;

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("slot file i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed {file}: {reason}")]
    Malformed { file: &'static str, reason: String },
}

pub use init_data::{read_init_data, write_init_data, InitData, INIT_DATA_FILE};
pub use markers::{
    read_finish_file, read_stderr_tail, read_temporary_exit, remove_upload_request,
    upload_requests, write_upload_status, FinishInfo, TemporaryExit, FINISH_FILE, STDERR_FILE,
    TEMPORARY_EXIT_FILE, UPLOAD_REQUEST_PREFIX, UPLOAD_STATUS_PREFIX,
};
pub use slot_state::{read_slot_state, write_slot_state, SlotState, SLOT_STATE_FILE};

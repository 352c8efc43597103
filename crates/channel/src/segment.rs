// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The mailbox segment: a fixed-size file shared between agent and app.
//!
//! Layout is six 1 KiB mailboxes, each a 4-byte header (occupied flag,
//! reserved byte, little-endian payload length) followed by the payload.
//! A mailbox holds at most one unread message; writers that find the
//! occupied flag set must back off and retry — overwrite is not permitted.
//!
//! Both sides address the segment with positioned reads/writes, so no
//! side ever holds a lock the other can block on.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes per mailbox, header included.
pub const MAILBOX_SIZE: usize = 1024;
/// occupied(1) + reserved(1) + len(2, LE)
const HEADER_SIZE: usize = 4;
/// Longest message a mailbox can carry.
pub const PAYLOAD_CAPACITY: usize = MAILBOX_SIZE - HEADER_SIZE;
/// Total segment size on disk.
pub const SEGMENT_SIZE: u64 = (Mailbox::ALL.len() * MAILBOX_SIZE) as u64;

/// Errors from channel I/O.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("message too long for mailbox: {len} > {}", PAYLOAD_CAPACITY)]
    TooLong { len: usize },
    #[error("corrupt mailbox header: payload length {len}")]
    CorruptHeader { len: usize },
}

/// The named mailboxes and who writes into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mailbox {
    /// agent → app: suspend/resume/quit/abort/reread/network
    ProcessControl,
    /// agent → app: graphics requests
    GraphicsRequest,
    /// agent → app: heartbeat with usage hints
    Heartbeat,
    /// app → agent: progress/cpu/checkpoint/working-set report
    AppStatus,
    /// app → agent: trickle-up and upload-file notices
    TrickleUp,
    /// app → agent: graphics reply
    GraphicsReply,
}

impl Mailbox {
    pub const ALL: [Mailbox; 6] = [
        Mailbox::ProcessControl,
        Mailbox::GraphicsRequest,
        Mailbox::Heartbeat,
        Mailbox::AppStatus,
        Mailbox::TrickleUp,
        Mailbox::GraphicsReply,
    ];

    fn index(&self) -> usize {
        match self {
            Mailbox::ProcessControl => 0,
            Mailbox::GraphicsRequest => 1,
            Mailbox::Heartbeat => 2,
            Mailbox::AppStatus => 3,
            Mailbox::TrickleUp => 4,
            Mailbox::GraphicsReply => 5,
        }
    }

    fn offset(&self) -> u64 {
        (self.index() * MAILBOX_SIZE) as u64
    }

    /// True for mailboxes the agent writes and the app reads.
    pub fn agent_to_app(&self) -> bool {
        matches!(
            self,
            Mailbox::ProcessControl | Mailbox::GraphicsRequest | Mailbox::Heartbeat
        )
    }
}

quern_core::simple_display! {
    Mailbox {
        ProcessControl => "process_control",
        GraphicsRequest => "graphics_request",
        Heartbeat => "heartbeat",
        AppStatus => "app_status",
        TrickleUp => "trickle_up",
        GraphicsReply => "graphics_reply",
    }
}

/// Handle to the mailbox segment file.
///
/// The agent side `create`s the segment (and later removes it via
/// [`Channel::destroy`]); the app side `attach`es to the existing file.
/// The segment is exclusively owned by its task while attached.
#[derive(Debug)]
pub struct Channel {
    file: File,
    path: PathBuf,
}

impl Channel {
    /// Create a fresh, zeroed segment. Truncates any stale one.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(SEGMENT_SIZE)?;
        Ok(Self { file, path })
    }

    /// Attach to an existing segment (app side, or agent restart).
    pub fn attach(path: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let path = path.into();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deposit a message. Returns `false` if the mailbox still holds an
    /// unread message — the caller must queue and retry, never overwrite.
    pub fn send(&self, mbox: Mailbox, text: &str) -> Result<bool, ChannelError> {
        let bytes = text.as_bytes();
        if bytes.len() > PAYLOAD_CAPACITY {
            return Err(ChannelError::TooLong { len: bytes.len() });
        }
        if self.occupied(mbox)? {
            return Ok(false);
        }
        let base = mbox.offset();
        // Payload and length land before the occupied flag flips, so a
        // reader that sees the flag sees a complete message.
        self.file.write_all_at(bytes, base + HEADER_SIZE as u64)?;
        let len = (bytes.len() as u16).to_le_bytes();
        self.file.write_all_at(&len, base + 2)?;
        self.file.write_all_at(&[1u8], base)?;
        Ok(true)
    }

    /// Take the message out of a mailbox, clearing it.
    pub fn receive(&self, mbox: Mailbox) -> Result<Option<String>, ChannelError> {
        let base = mbox.offset();
        let mut header = [0u8; HEADER_SIZE];
        self.file.read_exact_at(&mut header, base)?;
        if header[0] == 0 {
            return Ok(None);
        }
        let len = u16::from_le_bytes([header[2], header[3]]) as usize;
        if len > PAYLOAD_CAPACITY {
            // Clear the box so one corrupt write can't wedge the channel.
            self.file.write_all_at(&[0u8], base)?;
            return Err(ChannelError::CorruptHeader { len });
        }
        let mut payload = vec![0u8; len];
        self.file.read_exact_at(&mut payload, base + HEADER_SIZE as u64)?;
        self.file.write_all_at(&[0u8], base)?;
        Ok(Some(String::from_utf8_lossy(&payload).into_owned()))
    }

    /// Is there an unread message waiting?
    pub fn occupied(&self, mbox: Mailbox) -> Result<bool, ChannelError> {
        let mut flag = [0u8; 1];
        self.file.read_exact_at(&mut flag, mbox.offset())?;
        Ok(flag[0] != 0)
    }

    /// Remove the segment file. Detachment destroys the channel.
    pub fn destroy(self) -> Result<(), ChannelError> {
        std::fs::remove_file(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "segment_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chunked asynchronous file copy and verify.
//!
//! Two FIFO queues, one chunk of the head element per invocation, so the
//! main loop never stalls on a large file and the oldest pending file
//! finishes first (finishing one sooner lets a waiting task start sooner).
//!
//! Copy writes into a temp file beside the destination and renames into
//! place on EOF, so an interrupted copy can always be re-run from scratch
//! without leaving a torn destination. Verify streams through an optional
//! zstd decompression filter while hashing, then checks either an Ed25519
//! signature over the digest or a plain hex digest.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::{COPY_CHUNK_SIZE, EngineError};

/// What a verify op checks the stream against.
#[derive(Debug, Clone)]
pub enum VerifyExpect {
    /// Plain lowercase hex SHA-256 of the (decompressed) content
    Digest(String),
    /// Ed25519 signature over the SHA-256 digest bytes
    Signature { public_key: [u8; 32], signature: Vec<u8> },
}

/// Completion notices handed back to the supervisor.
#[derive(Debug)]
pub enum FileOpEvent {
    CopyDone {
        /// Slot of the task waiting on this input, if any
        slot: Option<usize>,
        dst: PathBuf,
        result: Result<(), String>,
    },
    VerifyDone {
        path: PathBuf,
        ok: bool,
        error: Option<String>,
    },
}

struct CopyOp {
    dst: PathBuf,
    tmp: PathBuf,
    reader: File,
    writer: File,
    mode: u32,
    slot: Option<usize>,
}

struct VerifyOp {
    path: PathBuf,
    reader: Box<dyn Read + Send>,
    hasher: Sha256,
    expect: VerifyExpect,
}

/// The two work queues. Owned by the task set; the host loop drives
/// [`FileOps::poll`] whenever no network descriptor is ready.
#[derive(Default)]
pub struct FileOps {
    copies: VecDeque<CopyOp>,
    verifies: VecDeque<VerifyOp>,
}

impl FileOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunked copy. The destination's temp file is truncated, so
    /// re-enqueueing after an interruption restarts cleanly.
    pub fn enqueue_copy(
        &mut self,
        src: &Path,
        dst: &Path,
        slot: Option<usize>,
    ) -> Result<(), EngineError> {
        let reader = File::open(src)?;
        let mode = file_mode(&reader);
        let tmp = tmp_path(dst);
        let writer = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
        tracing::info!(src = %src.display(), dst = %dst.display(), "queued async copy");
        self.copies.push_back(CopyOp { dst: dst.to_path_buf(), tmp, reader, writer, mode, slot });
        Ok(())
    }

    /// Queue a checksum/signature verification.
    pub fn enqueue_verify(
        &mut self,
        path: &Path,
        expect: VerifyExpect,
        compressed: bool,
    ) -> Result<(), EngineError> {
        let file = File::open(path)?;
        let reader: Box<dyn Read + Send> = if compressed {
            Box::new(zstd::stream::read::Decoder::new(file)?)
        } else {
            Box::new(file)
        };
        tracing::info!(path = %path.display(), compressed, "queued async verify");
        self.verifies.push_back(VerifyOp {
            path: path.to_path_buf(),
            reader,
            hasher: Sha256::new(),
            expect,
        });
        Ok(())
    }

    /// True while either queue has work — the host loop must not
    /// idle-sleep with file I/O pending.
    pub fn has_pending(&self) -> bool {
        !self.copies.is_empty() || !self.verifies.is_empty()
    }

    /// Is a copy into this destination still in flight?
    pub fn copy_pending_to(&self, dst: &Path) -> bool {
        self.copies.iter().any(|op| op.dst == dst)
    }

    /// Any copy queued for this slot?
    pub fn copy_pending_for_slot(&self, slot: usize) -> bool {
        self.copies.iter().any(|op| op.slot == Some(slot))
    }

    /// Process one chunk of the head of each queue.
    pub fn poll(&mut self) -> Vec<FileOpEvent> {
        let mut events = Vec::new();
        if let Some(result) = self.copies.front_mut().and_then(copy_chunk) {
            if let Some(op) = self.copies.pop_front() {
                if result.is_err() {
                    let _ = fs::remove_file(&op.tmp);
                }
                events.push(FileOpEvent::CopyDone { slot: op.slot, dst: op.dst, result });
            }
        }
        if let Some(outcome) = self.verifies.front_mut().and_then(verify_chunk) {
            if let Some(op) = self.verifies.pop_front() {
                let (ok, error) = match outcome {
                    Ok(ok) => (ok, None),
                    Err(msg) => (false, Some(msg)),
                };
                events.push(FileOpEvent::VerifyDone { path: op.path, ok, error });
            }
        }
        events
    }
}

/// One chunk of a copy. `Some(result)` when the op is finished.
fn copy_chunk(op: &mut CopyOp) -> Option<Result<(), String>> {
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let n = match op.reader.read(&mut buf) {
        Ok(n) => n,
        Err(e) => return Some(Err(format!("read failed: {e}"))),
    };
    if n == 0 {
        // EOF: flush, fix permissions, rename into place atomically.
        if let Err(e) = op.writer.flush() {
            return Some(Err(format!("flush failed: {e}")));
        }
        if let Err(e) = apply_mode(&op.tmp, op.mode) {
            return Some(Err(format!("chmod failed: {e}")));
        }
        if let Err(e) = fs::rename(&op.tmp, &op.dst) {
            return Some(Err(format!("rename failed: {e}")));
        }
        return Some(Ok(()));
    }
    if let Err(e) = op.writer.write_all(&buf[..n]) {
        return Some(Err(format!("write failed: {e}")));
    }
    None
}

/// One chunk of a verify. `Some(outcome)` when the stream is exhausted.
fn verify_chunk(op: &mut VerifyOp) -> Option<Result<bool, String>> {
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let n = match op.reader.read(&mut buf) {
        Ok(n) => n,
        Err(e) => return Some(Err(format!("read failed: {e}"))),
    };
    if n > 0 {
        op.hasher.update(&buf[..n]);
        return None;
    }
    let digest = op.hasher.clone().finalize();
    let ok = match &op.expect {
        VerifyExpect::Digest(expected) => hex::encode(digest).eq_ignore_ascii_case(expected),
        VerifyExpect::Signature { public_key, signature } => {
            let Ok(key) = VerifyingKey::from_bytes(public_key) else {
                return Some(Err("invalid public key".into()));
            };
            let Ok(sig) = Signature::from_slice(signature) else {
                return Some(Err("invalid signature encoding".into()));
            };
            key.verify(digest.as_slice(), &sig).is_ok()
        }
    };
    Some(Ok(ok))
}

fn tmp_path(dst: &Path) -> PathBuf {
    let mut name = dst.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dst.with_file_name(name)
}

fn file_mode(file: &File) -> u32 {
    use std::os::unix::fs::MetadataExt;
    file.metadata().map(|m| m.mode()).unwrap_or(0o644)
}

fn apply_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(test)]
#[path = "fileops_tests.rs"]
mod tests;

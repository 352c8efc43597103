// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource usage retrieval behind a seam.
//!
//! The probe answers "what is this PID consuming right now". The engine
//! refreshes snapshots on its own cadence; nothing here caches.

use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no such process: {0}")]
    NoSuchProcess(u32),
    #[error("unparseable proc entry for pid {0}")]
    Parse(u32),
}

/// Point-in-time usage of one process.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcSnapshot {
    /// User + system CPU time, seconds
    pub cpu_time_secs: f64,
    /// Resident working set, bytes
    pub wss_bytes: u64,
    /// Swapped-out size, bytes
    pub swap_bytes: u64,
    /// Cumulative major page faults
    pub page_faults: u64,
}

/// The measurement seam.
pub trait ResourceProbe: Send {
    fn snapshot(&self, pid: u32) -> Result<ProcSnapshot, ProbeError>;
}

/// Linux probe over `/proc/<pid>/stat` and `/proc/<pid>/status`.
#[derive(Debug, Clone, Default)]
pub struct ProcProbe;

impl ProcProbe {
    fn clk_tck() -> f64 {
        // SAFETY: sysconf is async-signal-safe and takes no pointers.
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if tck > 0 {
            tck as f64
        } else {
            100.0
        }
    }
}

impl ResourceProbe for ProcProbe {
    fn snapshot(&self, pid: u32) -> Result<ProcSnapshot, ProbeError> {
        let proc_dir = Path::new("/proc").join(pid.to_string());
        let stat = fs::read_to_string(proc_dir.join("stat"))
            .map_err(|_| ProbeError::NoSuchProcess(pid))?;
        let status = fs::read_to_string(proc_dir.join("status")).unwrap_or_default();

        let mut snap = parse_stat(pid, &stat, Self::clk_tck())?;
        let (rss, swap) = parse_status_mem(&status);
        snap.wss_bytes = rss;
        snap.swap_bytes = swap;
        Ok(snap)
    }
}

/// Parse the fields we need out of a `/proc/<pid>/stat` line.
///
/// The comm field may contain spaces and parens; everything positional
/// counts from after the closing paren.
fn parse_stat(pid: u32, stat: &str, clk_tck: f64) -> Result<ProcSnapshot, ProbeError> {
    let rest = stat.rfind(')').map(|i| &stat[i + 1..]).ok_or(ProbeError::Parse(pid))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // Field numbering in proc(5) is 1-based with comm at 2; after the
    // paren, index 0 is state (field 3).
    let majflt: u64 = fields.get(9).and_then(|s| s.parse().ok()).ok_or(ProbeError::Parse(pid))?;
    let utime: u64 = fields.get(11).and_then(|s| s.parse().ok()).ok_or(ProbeError::Parse(pid))?;
    let stime: u64 = fields.get(12).and_then(|s| s.parse().ok()).ok_or(ProbeError::Parse(pid))?;
    Ok(ProcSnapshot {
        cpu_time_secs: (utime + stime) as f64 / clk_tck,
        wss_bytes: 0,
        swap_bytes: 0,
        page_faults: majflt,
    })
}

/// Pull VmRSS/VmSwap (kB lines) out of `/proc/<pid>/status`.
fn parse_status_mem(status: &str) -> (u64, u64) {
    let mut rss = 0;
    let mut swap = 0;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss = parse_kb(rest);
        } else if let Some(rest) = line.strip_prefix("VmSwap:") {
            swap = parse_kb(rest);
        }
    }
    (rss, swap)
}

fn parse_kb(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProbe;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Probe backed by a settable map, shared across clones.
    #[derive(Clone, Default)]
    pub struct FakeProbe {
        map: Arc<Mutex<HashMap<u32, ProcSnapshot>>>,
    }

    impl FakeProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, pid: u32, snap: ProcSnapshot) {
            self.map.lock().insert(pid, snap);
        }

        pub fn remove(&self, pid: u32) {
            self.map.lock().remove(&pid);
        }
    }

    impl ResourceProbe for FakeProbe {
        fn snapshot(&self, pid: u32) -> Result<ProcSnapshot, ProbeError> {
            self.map.lock().get(&pid).copied().ok_or(ProbeError::NoSuchProcess(pid))
        }
    }
}

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;

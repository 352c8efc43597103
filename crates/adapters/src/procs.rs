// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host process-list scanning: descendant enumeration, exclusive-app
//! detection, and non-agent CPU accounting.
//!
//! All pure logic here takes an explicit process list so it can be tested
//! without a live `/proc`.

use std::collections::HashMap;
use std::fs;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// One row of the host process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcEntry {
    pub pid: u32,
    pub ppid: u32,
    /// Executable name (comm), no path
    pub name: String,
    /// Cumulative user+system jiffies
    pub cpu_jiffies: u64,
}

/// Snapshot the full host process list from `/proc`.
pub fn process_list() -> Vec<ProcEntry> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    let mut list = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
            continue; // raced with process exit
        };
        if let Some(proc_entry) = parse_proc_stat(pid, &stat) {
            list.push(proc_entry);
        }
    }
    list
}

fn parse_proc_stat(pid: u32, stat: &str) -> Option<ProcEntry> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
    let ppid: u32 = fields.get(1)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(ProcEntry { pid, ppid, name, cpu_jiffies: utime + stime })
}

/// All transitive children of `root` in the given process list.
pub fn descendants(list: &[ProcEntry], root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for entry in list {
        children.entry(entry.ppid).or_default().push(entry.pid);
    }
    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(pid) = frontier.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                found.push(kid);
                frontier.push(kid);
            }
        }
    }
    found
}

/// First configured exclusive app found running, if any.
///
/// Comparison is case-insensitive on the executable name.
pub fn find_exclusive_app<'a>(list: &[ProcEntry], names: &'a [String]) -> Option<&'a str> {
    names.iter().map(String::as_str).find(|name| {
        list.iter().any(|entry| entry.name.eq_ignore_ascii_case(name))
    })
}

/// SIGKILL a single process. Used to sweep descendants after job exit.
pub fn kill_pid(pid: u32) {
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}

/// Total CPU jiffies across all cores from `/proc/stat`, if readable.
pub fn total_cpu_jiffies() -> Option<u64> {
    let stat = fs::read_to_string("/proc/stat").ok()?;
    parse_total_jiffies(&stat)
}

fn parse_total_jiffies(stat: &str) -> Option<u64> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let mut total = 0u64;
    for field in line.split_whitespace().skip(1) {
        total += field.parse::<u64>().ok()?;
    }
    Some(total)
}

/// CPU usage by processes other than the agent and its tasks.
///
/// Two paths with different accuracy:
/// - the "good" path differences the host-wide jiffy counter and
///   subtracts the excluded processes' own deltas;
/// - the fallback "old" path sums per-process deltas across two process
///   list snapshots, which undercounts processes that live and die
///   between samples. That inaccuracy is long-standing observed behavior
///   and is kept as-is.
#[derive(Debug, Default)]
pub struct NonAgentCpu {
    primed: bool,
    prev_total: Option<u64>,
    prev_procs: HashMap<u32, u64>,
    clk_tck: f64,
}

impl NonAgentCpu {
    pub fn new() -> Self {
        // SAFETY: sysconf is async-signal-safe and takes no pointers.
        let tck = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        Self {
            primed: false,
            prev_total: None,
            prev_procs: HashMap::new(),
            clk_tck: if tck > 0 { tck as f64 } else { 100.0 },
        }
    }

    /// Seconds of non-agent CPU burned since the previous sample.
    /// The first sample primes the baselines and returns 0.
    pub fn sample(&mut self, exclude: &[u32]) -> f64 {
        let list = process_list();
        self.sample_from(total_cpu_jiffies(), &list, exclude)
    }

    /// Same, with explicit inputs.
    pub fn sample_from(
        &mut self,
        total_jiffies: Option<u64>,
        list: &[ProcEntry],
        exclude: &[u32],
    ) -> f64 {
        let excluded_now: u64 = list
            .iter()
            .filter(|e| exclude.contains(&e.pid))
            .map(|e| e.cpu_jiffies)
            .sum();

        let delta_jiffies = if !self.primed {
            // First sample primes the baselines.
            0
        } else {
            match (total_jiffies, self.prev_total) {
                // Good path: host-wide counter delta minus excluded delta.
                (Some(total), Some(prev)) => {
                    let excluded_prev: u64 = self
                        .prev_procs
                        .iter()
                        .filter(|(pid, _)| exclude.contains(pid))
                        .map(|(_, j)| j)
                        .sum();
                    total
                        .saturating_sub(prev)
                        .saturating_sub(excluded_now.saturating_sub(excluded_prev))
                }
                // Old path: per-process deltas over surviving processes only.
                _ => list
                    .iter()
                    .filter(|e| !exclude.contains(&e.pid))
                    .map(|e| {
                        let prev = self.prev_procs.get(&e.pid).copied().unwrap_or(0);
                        e.cpu_jiffies.saturating_sub(prev)
                    })
                    .sum(),
            }
        };

        self.primed = true;
        self.prev_total = total_jiffies;
        self.prev_procs = list.iter().map(|e| (e.pid, e.cpu_jiffies)).collect();

        let tck = if self.clk_tck > 0.0 { self.clk_tck } else { 100.0 };
        delta_jiffies as f64 / tck
    }
}

#[cfg(test)]
#[path = "procs_tests.rs"]
mod tests;

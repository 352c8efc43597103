// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed control-channel messages.
//!
//! Each mailbox carries one of these, rendered to the tag-text wire form
//! by `render()` and recovered by a per-type `parse()`. Parsers collect
//! the tags they recognize and skip the rest.

use crate::codec;

/// Agent → app process-control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Suspend,
    Resume,
    Quit,
    Abort,
    RereadAppInfo,
    NetworkAvailable,
}

impl ControlRequest {
    pub fn render(&self) -> String {
        let mut out = String::new();
        codec::put_flag(&mut out, self.tag());
        out
    }

    fn tag(&self) -> &'static str {
        match self {
            ControlRequest::Suspend => "suspend",
            ControlRequest::Resume => "resume",
            ControlRequest::Quit => "quit",
            ControlRequest::Abort => "abort",
            ControlRequest::RereadAppInfo => "reread_app_info",
            ControlRequest::NetworkAvailable => "network_available",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        const ALL: [ControlRequest; 6] = [
            ControlRequest::Suspend,
            ControlRequest::Resume,
            ControlRequest::Quit,
            ControlRequest::Abort,
            ControlRequest::RereadAppInfo,
            ControlRequest::NetworkAvailable,
        ];
        ALL.into_iter().find(|r| codec::has_flag(text, r.tag()))
    }
}

crate::simple_display! {
    ControlRequest {
        Suspend => "<suspend/>",
        Resume => "<resume/>",
        Quit => "<quit/>",
        Abort => "<abort/>",
        RereadAppInfo => "<reread_app_info/>",
        NetworkAvailable => "<network_available/>",
    }
}

/// Agent → app heartbeat, sent every poll cycle. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Heartbeat {
    /// Current working-set estimate for the task, bytes
    pub wss_hint: u64,
    /// Max RAM the task may use, bytes
    pub max_wss: u64,
    pub network_suspended: bool,
    /// Sporadic-computation availability code, if the app is sporadic
    pub sporadic_available: Option<i64>,
}

impl Heartbeat {
    pub fn render(&self) -> String {
        let mut out = String::new();
        codec::put_flag(&mut out, "heartbeat");
        codec::put_u64(&mut out, "wss", self.wss_hint);
        codec::put_u64(&mut out, "max_wss", self.max_wss);
        if self.network_suspended {
            codec::put_flag(&mut out, "network_suspended");
        }
        if let Some(code) = self.sporadic_available {
            codec::put_str(&mut out, "sporadic_ca", &code.to_string());
        }
        out
    }

    pub fn parse(text: &str) -> Option<Self> {
        if !codec::has_flag(text, "heartbeat") {
            return None;
        }
        Some(Heartbeat {
            wss_hint: codec::get_u64(text, "wss").unwrap_or(0),
            max_wss: codec::get_u64(text, "max_wss").unwrap_or(0),
            network_suspended: codec::has_flag(text, "network_suspended"),
            sporadic_available: codec::get_i64(text, "sporadic_ca"),
        })
    }
}

/// App → agent status report.
///
/// Apps report `fraction_done` far more often than they checkpoint, so the
/// raw and checkpointed progress values travel as separate tags.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppStatus {
    pub current_cpu_time: Option<f64>,
    pub checkpoint_cpu_time: Option<f64>,
    pub fraction_done: Option<f64>,
    /// Elapsed-time baseline paired with `fraction_done`
    pub fraction_done_elapsed: Option<f64>,
    /// App's own working-set estimate, bytes
    pub working_set_hint: Option<u64>,
    /// A helper process (e.g. VM hypervisor) the agent should track
    pub other_pid: Option<u32>,
    pub bytes_sent: Option<f64>,
    pub bytes_received: Option<f64>,
    pub want_network: bool,
    /// Sporadic-mode app-side state code
    pub sporadic_state: Option<i64>,
}

impl AppStatus {
    pub fn parse(text: &str) -> Self {
        AppStatus {
            current_cpu_time: codec::get_f64(text, "current_cpu_time"),
            checkpoint_cpu_time: codec::get_f64(text, "checkpoint_cpu_time"),
            fraction_done: codec::get_f64(text, "fraction_done"),
            fraction_done_elapsed: codec::get_f64(text, "fraction_done_elapsed"),
            working_set_hint: codec::get_u64(text, "working_set_size"),
            other_pid: codec::get_u64(text, "other_pid").map(|p| p as u32),
            bytes_sent: codec::get_f64(text, "bytes_sent"),
            bytes_received: codec::get_f64(text, "bytes_received"),
            want_network: codec::has_flag(text, "want_network"),
            sporadic_state: codec::get_i64(text, "sporadic_ac"),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(v) = self.current_cpu_time {
            codec::put_f64(&mut out, "current_cpu_time", v);
        }
        if let Some(v) = self.checkpoint_cpu_time {
            codec::put_f64(&mut out, "checkpoint_cpu_time", v);
        }
        if let Some(v) = self.fraction_done {
            codec::put_f64(&mut out, "fraction_done", v);
        }
        if let Some(v) = self.fraction_done_elapsed {
            codec::put_f64(&mut out, "fraction_done_elapsed", v);
        }
        if let Some(v) = self.working_set_hint {
            codec::put_u64(&mut out, "working_set_size", v);
        }
        if let Some(v) = self.other_pid {
            codec::put_u64(&mut out, "other_pid", v as u64);
        }
        if let Some(v) = self.bytes_sent {
            codec::put_f64(&mut out, "bytes_sent", v);
        }
        if let Some(v) = self.bytes_received {
            codec::put_f64(&mut out, "bytes_received", v);
        }
        if self.want_network {
            codec::put_flag(&mut out, "want_network");
        }
        if let Some(v) = self.sporadic_state {
            codec::put_str(&mut out, "sporadic_ac", &v.to_string());
        }
        out
    }
}

/// App → agent trickle/upload notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrickleNotice {
    pub new_trickle_up: bool,
    pub new_upload_file: bool,
}

impl TrickleNotice {
    pub fn parse(text: &str) -> Self {
        TrickleNotice {
            new_trickle_up: codec::has_flag(text, "have_new_trickle_up"),
            new_upload_file: codec::has_flag(text, "have_new_upload_file"),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.new_trickle_up {
            codec::put_flag(&mut out, "have_new_trickle_up");
        }
        if self.new_upload_file {
            codec::put_flag(&mut out, "have_new_upload_file");
        }
        out
    }

    pub fn any(&self) -> bool {
        self.new_trickle_up || self.new_upload_file
    }
}

/// App → agent graphics reply (web URL or remote desktop address).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphicsReply {
    pub web_graphics_url: Option<String>,
    pub remote_desktop_addr: Option<String>,
}

impl GraphicsReply {
    pub fn parse(text: &str) -> Self {
        GraphicsReply {
            web_graphics_url: codec::get_str(text, "web_graphics_url").map(str::to_string),
            remote_desktop_addr: codec::get_str(text, "remote_desktop_addr").map(str::to_string),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(url) = &self.web_graphics_url {
            codec::put_str(&mut out, "web_graphics_url", url);
        }
        if let Some(addr) = &self.remote_desktop_addr {
            codec::put_str(&mut out, "remote_desktop_addr", addr);
        }
        out
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;

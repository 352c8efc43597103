// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Init-data file: written into the slot before each process start,
//! consumed by the app at startup. Job identity, resource limits,
//! credentials, GPU assignment, proxy info, and the path layout.

use std::fs;
use std::path::{Path, PathBuf};

use quern_core::codec;

use crate::StorageError;

pub const INIT_DATA_FILE: &str = "init_data.txt";

/// Everything the app process needs to know at startup.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InitData {
    pub result_name: String,
    pub wu_name: String,
    pub app_name: String,
    pub project_url: String,
    /// Project credential forwarded to the app for trickle authentication
    pub authenticator: String,
    pub slot: usize,
    pub project_dir: PathBuf,
    pub slot_dir: PathBuf,
    pub max_elapsed_secs: f64,
    pub max_disk_bytes: u64,
    pub max_mem_bytes: u64,
    /// Device ordinal for GPU tasks
    pub gpu_device: Option<i64>,
    /// `host:port` of the HTTP proxy the app should use, if any
    pub proxy: Option<String>,
}

impl InitData {
    fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("<init_data>\n");
        codec::put_str(&mut out, "result_name", &self.result_name);
        codec::put_str(&mut out, "wu_name", &self.wu_name);
        codec::put_str(&mut out, "app_name", &self.app_name);
        codec::put_str(&mut out, "project_url", &self.project_url);
        codec::put_str(&mut out, "authenticator", &self.authenticator);
        codec::put_u64(&mut out, "slot", self.slot as u64);
        codec::put_str(&mut out, "project_dir", &self.project_dir.to_string_lossy());
        codec::put_str(&mut out, "slot_dir", &self.slot_dir.to_string_lossy());
        codec::put_f64(&mut out, "max_elapsed_time", self.max_elapsed_secs);
        codec::put_u64(&mut out, "max_disk_usage", self.max_disk_bytes);
        codec::put_u64(&mut out, "max_memory_usage", self.max_mem_bytes);
        if let Some(device) = self.gpu_device {
            codec::put_str(&mut out, "gpu_device_num", &device.to_string());
        }
        if let Some(proxy) = &self.proxy {
            codec::put_str(&mut out, "http_proxy", proxy);
        }
        out.push_str("</init_data>\n");
        out
    }

    fn parse(text: &str) -> Result<Self, StorageError> {
        if !text.contains("<init_data>") {
            return Err(StorageError::Malformed {
                file: INIT_DATA_FILE,
                reason: "missing <init_data> element".into(),
            });
        }
        Ok(InitData {
            result_name: codec::get_str(text, "result_name").unwrap_or_default().to_string(),
            wu_name: codec::get_str(text, "wu_name").unwrap_or_default().to_string(),
            app_name: codec::get_str(text, "app_name").unwrap_or_default().to_string(),
            project_url: codec::get_str(text, "project_url").unwrap_or_default().to_string(),
            authenticator: codec::get_str(text, "authenticator").unwrap_or_default().to_string(),
            slot: codec::get_u64(text, "slot").unwrap_or(0) as usize,
            project_dir: codec::get_str(text, "project_dir").unwrap_or_default().into(),
            slot_dir: codec::get_str(text, "slot_dir").unwrap_or_default().into(),
            max_elapsed_secs: codec::get_f64(text, "max_elapsed_time").unwrap_or(0.0),
            max_disk_bytes: codec::get_u64(text, "max_disk_usage").unwrap_or(0),
            max_mem_bytes: codec::get_u64(text, "max_memory_usage").unwrap_or(0),
            gpu_device: codec::get_i64(text, "gpu_device_num"),
            proxy: codec::get_str(text, "http_proxy").map(str::to_string),
        })
    }
}

pub fn write_init_data(slot_dir: &Path, data: &InitData) -> Result<(), StorageError> {
    fs::write(slot_dir.join(INIT_DATA_FILE), data.render())?;
    Ok(())
}

pub fn read_init_data(slot_dir: &Path) -> Result<InitData, StorageError> {
    let text = fs::read_to_string(slot_dir.join(INIT_DATA_FILE))?;
    InitData::parse(&text)
}

#[cfg(test)]
#[path = "init_data_tests.rs"]
mod tests;

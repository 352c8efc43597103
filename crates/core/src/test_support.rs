// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures for other crates' tests.

use crate::work::{AppVersion, ResourceKind, TaskSpec};

/// A minimal CPU task spec with sensible test bounds.
pub fn sample_spec(result_name: &str) -> TaskSpec {
    TaskSpec::new(result_name, AppVersion::new("uppercase", 7, "/apps/uppercase_7"))
        .project_url("https://project.example/")
        .project_dir("/var/lib/quern/projects/project.example")
        .command_line("--in input --out output")
        .authenticator("auth-token")
        .max_elapsed_secs(3600.0)
        .max_disk_bytes(100 << 20)
        .max_mem_bytes(512 << 20)
        .report_deadline_ms(86_400_000)
}

/// Same but bound to a GPU app version.
pub fn sample_gpu_spec(result_name: &str) -> TaskSpec {
    let mut spec = sample_spec(result_name);
    spec.app.resource = ResourceKind::Gpu;
    spec
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn task_spec_defaults_are_unbounded() {
    let spec = TaskSpec::new("r1", AppVersion::new("uppercase", 7, "/apps/uppercase"));
    assert_eq!(spec.max_elapsed_secs, 0.0);
    assert_eq!(spec.max_disk_bytes, 0);
    assert_eq!(spec.max_mem_bytes, 0);
    assert!(!spec.always_run);
    assert!(!spec.uses_gpu());
}

#[test]
fn gpu_detection_follows_app_resource() {
    let app = AppVersion::new("render", 2, "/apps/render").resource(ResourceKind::Gpu);
    let spec = TaskSpec::new("r_gpu", app);
    assert!(spec.uses_gpu());
}

#[test]
fn setters_chain() {
    let spec = TaskSpec::new("r2", AppVersion::new("a", 1, "/apps/a"))
        .project_url("https://project.example/")
        .command_line("--quick")
        .max_elapsed_secs(600.0)
        .report_deadline_ms(1_000);
    assert_eq!(spec.project_url, "https://project.example/");
    assert_eq!(spec.command_line, "--quick");
    assert_eq!(spec.max_elapsed_secs, 600.0);
    assert_eq!(spec.report_deadline_ms, 1_000);
}

#[test]
fn record_failure_marks_permanent() {
    let mut result = ResultRecord::default();
    result.record_failure(crate::status::ExitCode::TimeLimitExceeded, "elapsed > bound");
    assert!(result.is_failed());
    assert!(result.ready_to_report);
    assert_eq!(result.exit_status, Some(197));
    assert_eq!(result.message.as_deref(), Some("elapsed > bound"));
}

#[test]
fn record_success_reports_done() {
    let mut result = ResultRecord::default();
    result.record_success(0);
    assert_eq!(result.state, ResultState::Done);
    assert!(result.ready_to_report);
    assert!(!result.is_failed());
}

#[test]
fn prefs_default_to_wide_open() {
    let prefs = UsagePrefs::default();
    assert_eq!(prefs.cpu_usage_limit, 100.0);
    assert_eq!(prefs.ram_avail_bytes, u64::MAX);
    assert!(prefs.exclusive_apps.is_empty());
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn sample(slot_dir: &Path) -> InitData {
    InitData {
        result_name: "wu_9_0".into(),
        wu_name: "wu_9".into(),
        app_name: "uppercase".into(),
        project_url: "https://project.example/".into(),
        authenticator: "auth-token".into(),
        slot: 2,
        project_dir: "/var/lib/quern/projects/project.example".into(),
        slot_dir: slot_dir.to_path_buf(),
        max_elapsed_secs: 7200.0,
        max_disk_bytes: 100 << 20,
        max_mem_bytes: 512 << 20,
        gpu_device: None,
        proxy: None,
    }
}

#[test]
fn round_trip_cpu_task() {
    let dir = tempfile::tempdir().unwrap();
    let data = sample(dir.path());
    write_init_data(dir.path(), &data).unwrap();
    assert_eq!(read_init_data(dir.path()).unwrap(), data);
}

#[test]
fn round_trip_gpu_task_with_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = sample(dir.path());
    data.gpu_device = Some(1);
    data.proxy = Some("proxy.local:3128".into());
    write_init_data(dir.path(), &data).unwrap();
    let read = read_init_data(dir.path()).unwrap();
    assert_eq!(read.gpu_device, Some(1));
    assert_eq!(read.proxy.as_deref(), Some("proxy.local:3128"));
}

#[test]
fn garbage_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(INIT_DATA_FILE), "junk").unwrap();
    assert!(matches!(
        read_init_data(dir.path()),
        Err(StorageError::Malformed { file: INIT_DATA_FILE, .. })
    ));
}

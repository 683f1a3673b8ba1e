//! Integration tests for the operation store
//!
//! Tests cover:
//! - Record lifecycle and active-operation detection
//! - Persistence across store instances sharing one state file
//! - Staleness cleanup and reset

mod common;

use otaflow_core::types::InstallType;
use otaflow_update::store::{
    ActiveDownload, ActiveUpdate, DownloadStatus, KeyValueStore, LastUpdateConfig,
    OperationStore, UpdateProgress, UpdateStatus, KEY_ACTIVE_UPDATES,
};
use otaflow_update::JsonFileStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_completed_download_is_not_active() {
    let store = OperationStore::in_memory();
    let id = store.generate_download_id();
    store
        .add_download(ActiveDownload::new(&id, "https://ota.example.com/update/c.json"))
        .unwrap();

    let listed = store.list_downloads().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].download_id, id);
    assert_eq!(listed[0].status, DownloadStatus::Downloading);

    store
        .update_download_status(&id, DownloadStatus::Completed, None)
        .unwrap();
    assert!(!store.has_active_operations().unwrap());
}

#[test]
fn test_other_active_record_keeps_store_active() {
    let store = OperationStore::in_memory();
    store.add_download(ActiveDownload::new("d1", "u")).unwrap();
    store.add_update(ActiveUpdate::new("u1", "Foo_Ver2.0.0")).unwrap();

    store
        .update_download_status("d1", DownloadStatus::Completed, None)
        .unwrap();
    assert!(store.has_active_operations().unwrap());

    store
        .update_update_status("u1", UpdateStatus::Applying, None)
        .unwrap();
    assert!(store.has_active_operations().unwrap());

    store.remove_update("u1").unwrap();
    assert!(!store.has_active_operations().unwrap());
}

#[test]
fn test_remove_download_only_drops_matching_record() {
    let store = OperationStore::in_memory();
    store.add_download(ActiveDownload::new("d1", "u")).unwrap();
    store.add_download(ActiveDownload::new("d2", "u")).unwrap();

    assert!(store.remove_download("d1").unwrap());
    assert!(!store.remove_download("d1").unwrap());

    let remaining = store.list_downloads().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].download_id, "d2");
}

#[test]
fn test_records_survive_restart() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");

    let id = {
        let store = OperationStore::open(&path);
        let id = store.generate_update_id();
        store.add_update(ActiveUpdate::new(&id, "Foo_Ver2.0.0")).unwrap();
        store.update_update_progress(&id, 40).unwrap();
        store
            .set_update_progress(&UpdateProgress::new("prepare", 40, "Downloading property files"))
            .unwrap();
        id
    };

    let reopened = OperationStore::open(&path);
    let updates = reopened.list_updates().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].update_id, id);
    assert_eq!(updates[0].progress, 40);
    assert!(reopened.has_active_operations().unwrap());

    let progress = reopened.update_progress().unwrap().unwrap();
    assert_eq!(progress.overall_progress, 40);
    assert_eq!(progress.current_step, "Downloading property files");
}

#[test]
fn test_two_handles_on_one_file_do_not_lose_records() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    let a = Arc::new(OperationStore::open(&path));
    let b = Arc::new(OperationStore::open(&path));

    let handles: Vec<_> = [a, b]
        .into_iter()
        .enumerate()
        .map(|(n, store)| {
            std::thread::spawn(move || {
                for i in 0..10 {
                    store
                        .add_download(ActiveDownload::new(format!("d{}_{}", n, i), "u"))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reopened = OperationStore::open(&path);
    let mut ids: Vec<String> = reopened
        .list_downloads()
        .unwrap()
        .into_iter()
        .map(|d| d.download_id)
        .collect();
    ids.sort();

    let mut expected: Vec<String> = (0..2)
        .flat_map(|n| (0..10).map(move |i| format!("d{}_{}", n, i)))
        .collect();
    expected.sort();
    assert_eq!(ids, expected);
}

#[test]
fn test_cleanup_keeps_recent_and_running_records() {
    let store = OperationStore::in_memory();
    let two_hours_ms = 2 * 60 * 60 * 1000;

    let mut old_failed = ActiveUpdate::new("old_failed", "cfg");
    old_failed.start_time -= two_hours_ms;
    old_failed.status = UpdateStatus::Error;
    let mut old_applying = ActiveUpdate::new("old_applying", "cfg");
    old_applying.start_time -= two_hours_ms;
    old_applying.status = UpdateStatus::Applying;

    store.add_update(old_failed).unwrap();
    store.add_update(old_applying).unwrap();

    assert_eq!(store.cleanup_stale(Duration::from_secs(3600)).unwrap(), 1);
    let remaining = store.list_updates().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].update_id, "old_applying");
}

#[test]
fn test_clear_all_forgets_everything() {
    let temp = TempDir::new().unwrap();
    let store = OperationStore::open(temp.path().join("state.json"));
    store.add_download(ActiveDownload::new("d1", "u")).unwrap();
    store.add_update(ActiveUpdate::new("u1", "cfg")).unwrap();
    store
        .set_last_update_config(&LastUpdateConfig {
            name: "Foo_Ver2.0.0".into(),
            url: "https://ota.example.com/foo.zip".into(),
            install_type: InstallType::NonStreaming,
        })
        .unwrap();

    store.clear_all().unwrap();

    assert!(store.list_downloads().unwrap().is_empty());
    assert!(store.list_updates().unwrap().is_empty());
    assert!(store.last_update_config().unwrap().is_none());
    assert!(store.update_progress().unwrap().is_none());
}

#[test]
fn test_update_records_use_camel_case_fields() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    let store = OperationStore::open(&path);
    store.add_update(ActiveUpdate::new("update_1", "Foo_Ver2.0.0")).unwrap();
    store
        .update_update_status("update_1", UpdateStatus::Error, Some("boom".into()))
        .unwrap();

    let raw = JsonFileStore::new(&path).get(KEY_ACTIVE_UPDATES).unwrap().unwrap();
    assert!(raw.contains(r#""updateId":"update_1""#));
    assert!(raw.contains(r#""configName":"Foo_Ver2.0.0""#));
    assert!(raw.contains(r#""status":"error""#));
    assert!(raw.contains(r#""errorMessage":"boom""#));
}

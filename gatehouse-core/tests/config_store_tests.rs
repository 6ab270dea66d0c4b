mod common;

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{fresh_store, leftover_temps, open_store};
use gatehouse_core::{
    AsyncConfigListener, ConfigEvent, ConfigEventKind, ConfigStore, SaveStatus, StoreSettings,
};
use serde_json::{json, Value};

// ===== Persistence Tests =====

#[test]
fn test_round_trip_preserves_document() {
    let (dir, store) = fresh_store();
    store.set("prefix", json!("!"));
    store.set(
        "permissions",
        json!({
            "global": {"users": [{"id": "1", "channels": ["public"]}], "roles": []},
            "guilds": {"900": {"commands": {"help": {"public": true, "users": [], "roles": []}}}}
        }),
    );
    store.set("nested", json!({"a": [1, 2.5, null, {"b": "ü"}]}));

    let reopened = open_store(dir.path());
    assert_eq!(reopened.snapshot(), store.snapshot());
}

#[test]
fn test_saved_file_is_complete_json() {
    let (_dir, store) = fresh_store();
    store.set("prefix", json!("?"));

    let primary: Value = serde_json::from_slice(&fs::read(store.path()).unwrap()).unwrap();
    let backup: Value = serde_json::from_slice(&fs::read(store.backup_path()).unwrap()).unwrap();
    assert_eq!(primary["prefix"], json!("?"));
    assert_eq!(backup["prefix"], json!("$"));
}

#[test]
fn test_failed_commit_leaves_files_intact() {
    let (dir, store) = fresh_store();
    store.set("prefix", json!("!"));
    let primary = fs::read(store.path()).unwrap();
    let backup = fs::read(store.backup_path()).unwrap();

    // With a directory in its place the final rename fails after the new
    // contents have already been staged.
    fs::remove_file(store.path()).unwrap();
    fs::create_dir(store.path()).unwrap();
    fs::write(store.path().join("kept.json"), &primary).unwrap();

    let status = store.set("prefix", json!("?"));
    assert!(matches!(status, SaveStatus::Failed(_)));
    assert_eq!(store.prefix(), "?");
    assert_eq!(fs::read(store.path().join("kept.json")).unwrap(), primary);
    assert_eq!(fs::read(store.backup_path()).unwrap(), backup);
    assert!(leftover_temps(dir.path()).is_empty());
}

#[test]
fn test_stray_temp_file_is_ignored_on_open() {
    let (dir, store) = fresh_store();
    store.set("prefix", json!("!"));
    let before = fs::read(store.path()).unwrap();

    // A process killed before the final rename leaves only a staged temp file.
    let staged = dir.path().join(".config.json.crashed.tmp");
    fs::write(&staged, b"{\"prefix\": \"?\", \"trunc").unwrap();

    assert_eq!(fs::read(store.path()).unwrap(), before);
    let reopened = open_store(dir.path());
    assert_eq!(reopened.prefix(), "!");
}

#[test]
fn test_saves_leave_no_temp_files() {
    let (dir, store) = fresh_store();
    for i in 0..5 {
        store.set("counter", json!(i));
    }
    assert!(leftover_temps(dir.path()).is_empty());
}

// ===== Recovery Tests =====

#[test]
fn test_corrupt_primary_recovers_from_backup() {
    let (dir, store) = fresh_store();
    store.set("prefix", json!("!"));
    store.set("prefix", json!("?"));
    drop(store);

    let settings = StoreSettings::new(dir.path());
    fs::write(settings.path(), b"{ not json").unwrap();

    let recovered = ConfigStore::open(settings.clone()).unwrap();
    // The backup holds the document from before the last save.
    assert_eq!(recovered.prefix(), "!");

    let restored: Value = serde_json::from_slice(&fs::read(settings.path()).unwrap()).unwrap();
    assert_eq!(restored["prefix"], json!("!"));
}

#[test]
fn test_missing_primary_recovers_from_backup() {
    let (dir, store) = fresh_store();
    store.set("prefix", json!("!"));
    fs::remove_file(store.path()).unwrap();

    store.load().unwrap();
    assert_eq!(store.prefix(), "$");
    assert!(store.path().exists());
    assert!(dir.path().join("config.json").exists());
}

#[test]
fn test_both_files_corrupt_is_fatal() {
    let (dir, store) = fresh_store();
    store.set("prefix", json!("!"));
    fs::write(store.path(), b"garbage").unwrap();
    fs::write(store.backup_path(), b"[1, 2, 3]").unwrap();
    drop(store);

    let err = ConfigStore::open(StoreSettings::new(dir.path())).unwrap_err();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("config.json"));
}

#[test]
fn test_reload_after_external_edit() {
    let (_dir, store) = fresh_store();
    let kinds = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    store.register_listener(move |event: &ConfigEvent| sink.lock().push(event.kind));

    fs::write(store.path(), br#"{"prefix": "%", "extra": true}"#).unwrap();
    store.load().unwrap();

    assert_eq!(store.prefix(), "%");
    assert_eq!(store.get("extra"), Some(json!(true)));
    assert_eq!(*kinds.lock(), vec![ConfigEventKind::Reload]);
}

// ===== Concurrency Tests =====

#[test]
fn test_concurrent_writers_produce_valid_document() {
    let (dir, store) = fresh_store();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for j in 0..10 {
                    assert!(store.set(&format!("key_{}", i), json!(j)).is_ok());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reopened = open_store(dir.path());
    for i in 0..8 {
        assert_eq!(reopened.get(&format!("key_{}", i)), Some(json!(9)));
    }
    assert!(leftover_temps(dir.path()).is_empty());
}

// ===== Listener Tests =====

struct CountingListener(Arc<AtomicUsize>);

#[async_trait]
impl AsyncConfigListener for CountingListener {
    async fn on_config_event(&self, event: &ConfigEvent) {
        if event.touches("prefix") {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[tokio::test]
async fn test_async_listener_notified_in_background() {
    let (_dir, store) = fresh_store();
    let hits = Arc::new(AtomicUsize::new(0));
    store.register_async_listener(CountingListener(Arc::clone(&hits)));

    assert_eq!(store.set("prefix", json!("!")), SaveStatus::Persisted);
    store.set("other", json!(1));

    tokio::time::timeout(Duration::from_secs(2), async {
        while hits.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_async_listener_runs_inline_without_runtime() {
    let (_dir, store) = fresh_store();
    let hits = Arc::new(AtomicUsize::new(0));
    let id = store.register_async_listener(CountingListener(Arc::clone(&hits)));

    store.set("prefix", json!("!"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert!(store.unregister_listener(id));
    store.set("prefix", json!("?"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_listener_does_not_fail_save() {
    let (dir, store) = fresh_store();
    store.register_listener(|_: &ConfigEvent| panic!("listener bug"));

    assert_eq!(store.set("prefix", json!("!")), SaveStatus::Persisted);
    assert_eq!(open_store(dir.path()).prefix(), "!");
}

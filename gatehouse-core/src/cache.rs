//! Read-through views over the config store.
//!
//! A view is rebuilt from the store whenever a save or reload touches one of
//! its keys, and published by swapping an `Arc`. Readers clone the `Arc` and
//! never see a half-built value. Rebuilds are serialized, so the last one to
//! publish has read the newest document.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::ConfigStore;
use crate::events::{ConfigEvent, ConfigEventKind, ListenerId};

/// Atomically replaceable shared value.
pub(crate) struct Snapshot<T> {
    current: RwLock<Arc<T>>,
    refresh: Mutex<()>,
}

impl<T> Snapshot<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
            refresh: Mutex::new(()),
        }
    }

    /// The current value. The read lock is held only for the clone.
    pub(crate) fn load(&self) -> Arc<T> {
        Arc::clone(&self.current.read())
    }

    pub(crate) fn publish(&self, value: T) {
        *self.current.write() = Arc::new(value);
    }

    /// Build a new value and publish it.
    ///
    /// Holds the refresh lock across both steps. A rebuild that read an older
    /// document can therefore never publish after one that read a newer one.
    pub(crate) fn refresh(&self, build: impl FnOnce() -> T) {
        let _guard = self.refresh.lock();
        self.publish(build());
    }
}

/// Build a snapshot from the store and keep it fresh.
///
/// `build` runs once now and again after every event touching one of `keys`.
/// The listener holds only weak references, so dropping the snapshot's owner
/// turns it into a no-op; the owner should still unregister the returned id.
pub(crate) fn attach<T, F>(
    store: &Arc<ConfigStore>,
    name: &'static str,
    keys: &'static [&'static str],
    build: F,
) -> (Arc<Snapshot<T>>, ListenerId)
where
    T: Send + Sync + 'static,
    F: Fn(&ConfigStore) -> T + Send + Sync + 'static,
{
    let snapshot = Arc::new(Snapshot::new(build(store)));

    let weak_store: Weak<ConfigStore> = Arc::downgrade(store);
    let weak_snapshot = Arc::downgrade(&snapshot);
    let id = store.register_listener(move |event: &ConfigEvent| {
        let relevant =
            event.kind == ConfigEventKind::Reload || keys.iter().any(|k| event.touches(k));
        if !relevant {
            return;
        }
        let (Some(store), Some(snapshot)) = (weak_store.upgrade(), weak_snapshot.upgrade()) else {
            return;
        };
        snapshot.refresh(|| build(&store));
        log::debug!("reloaded {} cache after {} event", name, event.kind);
    });

    (snapshot, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreSettings;
    use serde_json::json;

    #[test]
    fn test_publish_replaces_value() {
        let snapshot = Snapshot::new(1);
        let before = snapshot.load();
        snapshot.publish(2);
        assert_eq!(*before, 1);
        assert_eq!(*snapshot.load(), 2);
    }

    #[test]
    fn test_refresh_never_publishes_an_older_read() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::mpsc;
        use std::thread;
        use std::time::Duration;

        let snapshot = Arc::new(Snapshot::new(0));
        let version = Arc::new(AtomicUsize::new(1));
        let (read_tx, read_rx) = mpsc::channel();
        let (go_tx, go_rx) = mpsc::channel::<()>();

        // The slow rebuild reads version 1, then stalls before publishing.
        let slow = {
            let snapshot = Arc::clone(&snapshot);
            let version = Arc::clone(&version);
            thread::spawn(move || {
                snapshot.refresh(|| {
                    let seen = version.load(Ordering::SeqCst);
                    read_tx.send(()).unwrap();
                    go_rx.recv().unwrap();
                    seen
                });
            })
        };
        read_rx.recv().unwrap();

        // A newer document lands and its rebuild starts while the slow one
        // is still in flight.
        version.store(2, Ordering::SeqCst);
        let fast = {
            let snapshot = Arc::clone(&snapshot);
            let version = Arc::clone(&version);
            thread::spawn(move || snapshot.refresh(|| version.load(Ordering::SeqCst)))
        };
        thread::sleep(Duration::from_millis(50));
        go_tx.send(()).unwrap();

        slow.join().unwrap();
        fast.join().unwrap();
        assert_eq!(*snapshot.load(), 2);
    }

    #[test]
    fn test_concurrent_saves_leave_newest_view() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
        let (snapshot, _id) = attach(&store, "prefix", &["prefix"], |s| s.prefix());

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store.set("prefix", json!(format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(*snapshot.load(), store.prefix());
    }

    #[test]
    fn test_attach_refreshes_on_relevant_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
        let (snapshot, id) = attach(&store, "prefix", &["prefix"], |s| s.prefix());

        assert_eq!(*snapshot.load(), "$");
        store.set("prefix", json!("!"));
        assert_eq!(*snapshot.load(), "!");

        // Unrelated keys leave the view alone.
        store.set("other", json!(1));
        assert_eq!(*snapshot.load(), "!");

        assert!(store.unregister_listener(id));
    }

    #[test]
    fn test_attach_refreshes_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
        let (snapshot, _id) = attach(&store, "prefix", &["prefix"], |s| s.prefix());

        let other = ConfigStore::open(StoreSettings::new(dir.path())).unwrap();
        other.set("prefix", json!("?"));
        assert_eq!(*snapshot.load(), "$");

        store.load().unwrap();
        assert_eq!(*snapshot.load(), "?");
    }

    #[test]
    fn test_dropped_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
        let (snapshot, _id) = attach(&store, "prefix", &["prefix"], |s| s.prefix());
        drop(snapshot);

        assert!(store.set("prefix", json!("!")).is_ok());
    }
}

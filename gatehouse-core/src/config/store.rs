//! The durable key/value document.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::persist;
use super::settings::{default_document, StoreSettings, DEFAULT_PREFIX};
use crate::error::{Error, Result};
use crate::events::{AsyncConfigListener, ConfigEvent, ConfigListener, ListenerId, Notifier};

/// The root config document.
pub type Document = Map<String, Value>;

/// Outcome of a save.
///
/// Saves never return an error: a failed write is logged, listeners are still
/// notified, and the in-memory document keeps the change. Callers that care
/// whether the change reached disk can inspect this value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    /// The document was written and atomically swapped into place.
    Persisted,
    /// Nothing changed, so nothing was written.
    Unchanged,
    /// The write failed; the file on disk still holds the previous document.
    Failed(String),
}

impl SaveStatus {
    /// True unless the write failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self, SaveStatus::Failed(_))
    }

    /// True if this save put new bytes on disk.
    pub fn is_persisted(&self) -> bool {
        matches!(self, SaveStatus::Persisted)
    }
}

/// Crash-safe JSON document store with change notification.
///
/// One instance is created at startup and shared (`Arc<ConfigStore>`) with
/// every component that reads or writes configuration.
///
/// # Persistence
///
/// Every [`set`](Self::set) writes the whole document to a temp file, syncs
/// it, copies the current primary to `<path>.bak` the same way, and renames
/// the temp file over the primary. The primary and the backup are each either
/// absent or complete, valid JSON.
///
/// There is no cross-process lock. Two processes writing the same file each
/// produce valid documents, but the last writer wins.
///
/// # Example
///
/// ```rust
/// use gatehouse_core::{ConfigStore, StoreSettings};
/// use serde_json::json;
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = ConfigStore::open(StoreSettings::new(dir.path())).unwrap();
///
/// assert_eq!(store.prefix(), "$");
/// store.set("prefix", json!("!"));
/// assert_eq!(store.get("prefix"), Some(json!("!")));
/// ```
pub struct ConfigStore {
    settings: StoreSettings,
    document: RwLock<Document>,
    save_lock: Mutex<()>,
    notifier: Notifier,
}

impl ConfigStore {
    /// Open the store, creating the data directory and a default document on
    /// first run.
    ///
    /// Fails with [`Error::ConfigCorruption`] when a document exists but
    /// neither it nor its backup can be parsed.
    pub fn open(settings: StoreSettings) -> Result<Self> {
        fs::create_dir_all(settings.data_dir())?;

        let store = Self {
            notifier: Notifier::new(settings.event_queue_capacity),
            settings,
            document: RwLock::new(Document::new()),
            save_lock: Mutex::new(()),
        };

        if store.path().exists() || store.backup_path().exists() {
            store.load()?;
        } else {
            log::info!("creating default config at {}", store.path().display());
            *store.document.write() = default_document();
            store.save();
        }
        Ok(store)
    }

    /// Open the store and wrap it for sharing.
    pub fn open_shared(settings: StoreSettings) -> Result<Arc<Self>> {
        Self::open(settings).map(Arc::new)
    }

    /// Path of the primary document.
    pub fn path(&self) -> PathBuf {
        self.settings.path()
    }

    /// Path of the rolling backup.
    pub fn backup_path(&self) -> PathBuf {
        self.settings.backup_path()
    }

    /// Settings this store was opened with.
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// (Re)load the document from disk.
    ///
    /// Falls back to the backup when the primary is missing or invalid, and
    /// copies a good backup over the primary (best effort). Listeners receive
    /// a `Reload` event covering every key.
    pub fn load(&self) -> Result<()> {
        let path = self.path();
        let document = match persist::read_document(&path) {
            Ok(doc) => {
                log::info!("config loaded from {}", path.display());
                doc
            }
            Err(primary) => {
                log::warn!("failed to load config {}: {}", path.display(), primary);
                let backup_path = self.backup_path();
                let doc = persist::read_document(&backup_path).map_err(|backup| {
                    log::error!(
                        "failed to load backup config {}: {}",
                        backup_path.display(),
                        backup
                    );
                    Error::ConfigCorruption {
                        path: path.clone(),
                        primary: primary.clone(),
                        backup,
                    }
                })?;
                log::warn!("loaded config from backup {}", backup_path.display());

                match persist::copy_atomic(&backup_path, &path) {
                    Ok(()) => log::info!("restored backup over {}", path.display()),
                    Err(e) => log::debug!("could not restore backup over primary: {}", e),
                }
                doc
            }
        };

        let keys = document.keys().cloned().collect();
        *self.document.write() = document;
        self.notifier.dispatch(ConfigEvent::reload(keys));
        Ok(())
    }

    /// Persist the whole document and notify listeners.
    pub fn save(&self) -> SaveStatus {
        let keys = self.document.read().keys().cloned().collect();
        self.save_keys(keys)
    }

    /// Get a clone of a top-level value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.document.read().get(key).cloned()
    }

    /// Get a top-level value, or `default` if it is missing or null.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        match self.get(key) {
            Some(Value::Null) | None => default,
            Some(value) => value,
        }
    }

    /// Whether a top-level key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.document.read().contains_key(key)
    }

    /// Replace a top-level value and save.
    pub fn set(&self, key: &str, value: Value) -> SaveStatus {
        self.document.write().insert(key.to_string(), value);
        self.save_keys(vec![key.to_string()])
    }

    /// Remove a top-level value, saving only if it existed.
    pub fn remove(&self, key: &str) -> SaveStatus {
        if self.document.write().remove(key).is_none() {
            return SaveStatus::Unchanged;
        }
        self.save_keys(vec![key.to_string()])
    }

    /// Read-modify-write a top-level value.
    ///
    /// `edit` works on a copy of the current value (`Null` when missing) and
    /// returns whether it changed anything. The copy is committed and saved
    /// only when `edit` returns `Ok(true)`; on error the document is untouched.
    pub fn update<F>(&self, key: &str, edit: F) -> Result<SaveStatus>
    where
        F: FnOnce(&mut Value) -> Result<bool>,
    {
        {
            let mut document = self.document.write();
            let mut value = document.get(key).cloned().unwrap_or(Value::Null);
            if !edit(&mut value)? {
                return Ok(SaveStatus::Unchanged);
            }
            document.insert(key.to_string(), value);
        }
        Ok(self.save_keys(vec![key.to_string()]))
    }

    /// Clone of the whole document.
    pub fn snapshot(&self) -> Document {
        self.document.read().clone()
    }

    /// Configured command prefix.
    pub fn prefix(&self) -> String {
        match self.get("prefix") {
            Some(Value::String(p)) if !p.is_empty() => p,
            _ => DEFAULT_PREFIX.to_string(),
        }
    }

    /// Register a listener called inline after every save.
    ///
    /// Keep the returned id to unregister later.
    pub fn register_listener(&self, listener: impl ConfigListener + 'static) -> ListenerId {
        self.notifier.register(Arc::new(listener))
    }

    /// Register a listener driven by the background dispatcher.
    pub fn register_async_listener(
        &self,
        listener: impl AsyncConfigListener + 'static,
    ) -> ListenerId {
        self.notifier.register_async(Arc::new(listener))
    }

    /// Stop notifying a listener. Returns `false` if it was not registered.
    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.notifier.unregister(id)
    }

    /// Number of registered listeners of both kinds.
    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    fn save_keys(&self, keys: Vec<String>) -> SaveStatus {
        let status = {
            let _guard = self.save_lock.lock();
            match self.persist() {
                Ok(()) => {
                    log::info!("config saved to {}", self.path().display());
                    SaveStatus::Persisted
                }
                Err(e) => {
                    log::error!("failed to save config to {}: {}", self.path().display(), e);
                    SaveStatus::Failed(e.to_string())
                }
            }
        };

        self.notifier
            .dispatch(ConfigEvent::save(keys, status.is_persisted()));
        status
    }

    fn persist(&self) -> Result<()> {
        fs::create_dir_all(self.settings.data_dir())?;
        let bytes = serde_json::to_vec_pretty(&*self.document.read())?;
        persist::write_with_backup(&self.path(), &self.backup_path(), &bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

//! Change notification for the config store.
//!
//! Every save emits a [`ConfigEvent`]. Listeners come in two flavours:
//!
//! - [`ConfigListener`]: called inline on the saving thread, right after the
//!   write completes. Permission and command-type caches use this so that a
//!   mutation is visible to the very next check.
//! - [`AsyncConfigListener`]: events are pushed onto a bounded queue drained
//!   by a single background task on the current tokio runtime. With no runtime
//!   available the listeners run to completion on the saving thread.
//!
//! A panicking listener is logged and skipped; it never fails the save or
//! stops other listeners from running.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

/// Default capacity of the asynchronous listener queue.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 64;

/// What happened to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEventKind {
    /// A save was attempted. See [`ConfigEvent::persisted`] for the outcome.
    Save,
    /// The document was re-read from disk.
    Reload,
}

impl std::fmt::Display for ConfigEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigEventKind::Save => write!(f, "save"),
            ConfigEventKind::Reload => write!(f, "reload"),
        }
    }
}

/// Notification delivered to listeners after a save or reload.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEvent {
    /// Event type
    pub kind: ConfigEventKind,
    /// Top-level document keys covered by this save
    pub keys: Vec<String>,
    /// Whether the document reached disk
    pub persisted: bool,
    /// When the save finished
    pub at: DateTime<Utc>,
}

impl ConfigEvent {
    pub(crate) fn save(keys: Vec<String>, persisted: bool) -> Self {
        Self {
            kind: ConfigEventKind::Save,
            keys,
            persisted,
            at: Utc::now(),
        }
    }

    pub(crate) fn reload(keys: Vec<String>) -> Self {
        Self {
            kind: ConfigEventKind::Reload,
            keys,
            persisted: true,
            at: Utc::now(),
        }
    }

    /// Check whether a top-level key was part of this save.
    pub fn touches(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

/// Synchronous config observer.
///
/// # Example
/// ```
/// use gatehouse_core::events::{ConfigEvent, ConfigListener};
///
/// struct Audit;
///
/// impl ConfigListener for Audit {
///     fn on_config_event(&self, event: &ConfigEvent) {
///         println!("saved keys: {:?}", event.keys);
///     }
/// }
/// ```
pub trait ConfigListener: Send + Sync {
    /// Called after every save
    fn on_config_event(&self, event: &ConfigEvent);
}

/// Blanket implementation for closures
impl<F> ConfigListener for F
where
    F: Fn(&ConfigEvent) + Send + Sync,
{
    fn on_config_event(&self, event: &ConfigEvent) {
        self(event)
    }
}

/// Asynchronous config observer, driven by the background dispatcher.
#[async_trait]
pub trait AsyncConfigListener: Send + Sync {
    /// Called after every save, off the saving thread when a runtime exists
    async fn on_config_event(&self, event: &ConfigEvent);
}

/// Unique identifier for a registered listener.
///
/// Pass it to [`crate::ConfigStore::unregister_listener`] to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

type SyncListeners = Vec<(ListenerId, Arc<dyn ConfigListener>)>;
type AsyncListeners = Arc<RwLock<Vec<(ListenerId, Arc<dyn AsyncConfigListener>)>>>;

/// Two-mode event fan-out owned by the store.
pub(crate) struct Notifier {
    next_id: AtomicU64,
    sync_listeners: RwLock<SyncListeners>,
    async_listeners: AsyncListeners,
    queue: Mutex<Option<mpsc::Sender<ConfigEvent>>>,
    capacity: usize,
}

impl Notifier {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sync_listeners: RwLock::new(Vec::new()),
            async_listeners: Arc::new(RwLock::new(Vec::new())),
            queue: Mutex::new(None),
            capacity: capacity.max(1),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, listener: Arc<dyn ConfigListener>) -> ListenerId {
        let id = self.next_id();
        self.sync_listeners.write().push((id, listener));
        id
    }

    pub(crate) fn register_async(&self, listener: Arc<dyn AsyncConfigListener>) -> ListenerId {
        let id = self.next_id();
        self.async_listeners.write().push((id, listener));
        id
    }

    /// Remove a listener of either kind. Returns `false` if it was not registered.
    pub(crate) fn unregister(&self, id: ListenerId) -> bool {
        {
            let mut sync = self.sync_listeners.write();
            if let Some(pos) = sync.iter().position(|(lid, _)| *lid == id) {
                sync.remove(pos);
                return true;
            }
        }
        let mut listeners = self.async_listeners.write();
        match listeners.iter().position(|(lid, _)| *lid == id) {
            Some(pos) => {
                listeners.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.sync_listeners.read().len() + self.async_listeners.read().len()
    }

    pub(crate) fn dispatch(&self, event: ConfigEvent) {
        // Clone out of the lock so listeners may register or unregister.
        let sync: Vec<_> = self
            .sync_listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in sync {
            if catch_unwind(AssertUnwindSafe(|| listener.on_config_event(&event))).is_err() {
                log::error!("config listener panicked while handling {} event", event.kind);
            }
        }

        if self.async_listeners.read().is_empty() {
            return;
        }
        self.dispatch_async(event);
    }

    fn dispatch_async(&self, event: ConfigEvent) {
        let Some(tx) = self.sender() else {
            let listeners = self.async_listeners.read().clone();
            futures::executor::block_on(run_async_listeners(&listeners, &event));
            return;
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!(
                    "config event queue full (capacity {}); dropping {} event for keys {:?}",
                    self.capacity,
                    event.kind,
                    event.keys
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                // The runtime that hosted the dispatcher is gone.
                *self.queue.lock() = None;
                log::warn!("config event dispatcher stopped; restarting");
                if let Some(tx) = self.sender() {
                    if tx.try_send(event).is_err() {
                        log::warn!("config event dropped after dispatcher restart");
                    }
                } else {
                    let listeners = self.async_listeners.read().clone();
                    futures::executor::block_on(run_async_listeners(&listeners, &event));
                }
            }
        }
    }

    /// Queue sender, spawning the dispatcher task on first use.
    ///
    /// Returns `None` when called outside a tokio runtime.
    fn sender(&self) -> Option<mpsc::Sender<ConfigEvent>> {
        let mut queue = self.queue.lock();
        if let Some(tx) = queue.as_ref() {
            if !tx.is_closed() {
                return Some(tx.clone());
            }
        }

        let handle = tokio::runtime::Handle::try_current().ok()?;
        let (tx, rx) = mpsc::channel(self.capacity);
        handle.spawn(drain_events(rx, Arc::clone(&self.async_listeners)));
        log::debug!("started config event dispatcher (capacity {})", self.capacity);
        *queue = Some(tx.clone());
        Some(tx)
    }
}

async fn drain_events(mut rx: mpsc::Receiver<ConfigEvent>, listeners: AsyncListeners) {
    while let Some(event) = rx.recv().await {
        let snapshot = listeners.read().clone();
        run_async_listeners(&snapshot, &event).await;
    }
}

async fn run_async_listeners(
    listeners: &[(ListenerId, Arc<dyn AsyncConfigListener>)],
    event: &ConfigEvent,
) {
    for (id, listener) in listeners {
        let outcome = AssertUnwindSafe(listener.on_config_event(event))
            .catch_unwind()
            .await;
        if outcome.is_err() {
            log::error!(
                "async config listener {:?} panicked while handling {} event",
                id,
                event.kind
            );
        }
    }
}

//! Where the config document lives and how the store is tuned.

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use crate::events::DEFAULT_EVENT_QUEUE_CAPACITY;

/// Environment variable naming the bot data directory.
pub const DATA_DIR_ENV: &str = "BOT_DATA_DIR";

/// Older name for [`DATA_DIR_ENV`], still honoured as a fallback.
pub const LEGACY_DATA_DIR_ENV: &str = "DISCORD_BOT_CONFIG";

/// Default document file name inside the data directory.
pub const DEFAULT_FILE_NAME: &str = "config.json";

/// Command prefix used when the document does not set one.
pub const DEFAULT_PREFIX: &str = "$";

/// Settings for a [`crate::ConfigStore`].
///
/// # Example
///
/// ```rust
/// use gatehouse_core::StoreSettings;
///
/// let settings = StoreSettings::new("/var/lib/bot")
///     .with_file_name("bot.json")
///     .with_event_queue_capacity(16);
///
/// assert!(settings.path().ends_with("bot.json"));
/// assert!(settings.backup_path().ends_with("bot.json.bak"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Directory holding the document and its backup
    pub data_dir: PathBuf,
    /// Document file name
    pub file_name: String,
    /// Capacity of the asynchronous listener queue
    pub event_queue_capacity: usize,
}

impl StoreSettings {
    /// Settings for a document named `config.json` inside `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_name: DEFAULT_FILE_NAME.to_string(),
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
        }
    }

    /// Resolve the data directory from the environment.
    ///
    /// Checks `BOT_DATA_DIR`, then `DISCORD_BOT_CONFIG`, then falls back to
    /// the current working directory.
    pub fn from_env() -> Self {
        Self::new(resolve_data_dir(|key| std::env::var(key).ok()))
    }

    /// Use a different document file name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Set the asynchronous listener queue capacity (minimum 1).
    pub fn with_event_queue_capacity(mut self, capacity: usize) -> Self {
        self.event_queue_capacity = capacity.max(1);
        self
    }

    /// Path of the primary document.
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    /// Path of the rolling backup (`<path>.bak`).
    pub fn backup_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.bak", self.file_name))
    }

    pub(crate) fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

fn resolve_data_dir(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    [DATA_DIR_ENV, LEGACY_DATA_DIR_ENV]
        .iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// Document written on first run.
pub fn default_document() -> Map<String, Value> {
    let value = json!({
        "prefix": DEFAULT_PREFIX,
        "enabled_cogs": [],
        "disabled_cogs": [],
        "command_permissions": {"commands": {}},
        "cogs": {"_global": {}},
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

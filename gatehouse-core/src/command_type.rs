//! Per-command invocation surface.
//!
//! A command can be invoked by prefix, as a slash command, both, or not at
//! all. The mode and an optional custom trigger are resolved per guild:
//!
//! 1. `command_triggers[<guild>][<cmd>]`
//! 2. `command_triggers["_global"][<cmd>]`
//! 3. `command_types[<cmd>]`
//! 4. `command_type_mode`
//! 5. `prefix`

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{self, Snapshot};
use crate::config::{ConfigStore, SaveStatus};
use crate::error::{Result, ValidationError};
use crate::events::ListenerId;

/// Override scope used when no guild is given.
pub const GLOBAL_SCOPE: &str = "_global";

const TRIGGERS_KEY: &str = "command_triggers";
const TYPES_KEY: &str = "command_types";
const DEFAULT_MODE_KEY: &str = "command_type_mode";
const REGISTERED_KEY: &str = "registered_commands";

/// How a command may be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMode {
    #[default]
    Prefix,
    Slash,
    Both,
    None,
}

impl CommandMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandMode::Prefix => "prefix",
            CommandMode::Slash => "slash",
            CommandMode::Both => "both",
            CommandMode::None => "none",
        }
    }

    /// Whether the command is registered as a slash command.
    pub fn includes_slash(&self) -> bool {
        matches!(self, CommandMode::Slash | CommandMode::Both)
    }

    /// Whether the command answers to the text prefix.
    pub fn includes_prefix(&self) -> bool {
        matches!(self, CommandMode::Prefix | CommandMode::Both)
    }
}

impl FromStr for CommandMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prefix" => Ok(CommandMode::Prefix),
            "slash" => Ok(CommandMode::Slash),
            "both" => Ok(CommandMode::Both),
            "none" => Ok(CommandMode::None),
            _ => Err(ValidationError::InvalidMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for CommandMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One app-command spec for the registration layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlashCommandSpec {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Override {
    mode: Option<CommandMode>,
    trigger: Option<String>,
}

/// Parsed copy of the command-type keys.
#[derive(Debug, Default)]
struct CommandTypes {
    overrides: BTreeMap<String, BTreeMap<String, Override>>,
    types: BTreeMap<String, CommandMode>,
    default_mode: CommandMode,
    registered: Vec<String>,
}

impl CommandTypes {
    fn from_store(store: &ConfigStore) -> Self {
        let mut overrides: BTreeMap<String, BTreeMap<String, Override>> = BTreeMap::new();
        if let Some(Value::Object(scopes)) = store.get(TRIGGERS_KEY) {
            for (scope, commands) in scopes {
                let Value::Object(commands) = commands else {
                    log::warn!("ignoring command_triggers scope '{}': not an object", scope);
                    continue;
                };
                let parsed: BTreeMap<String, Override> = commands
                    .into_iter()
                    .filter_map(|(cmd, entry)| parse_override(&cmd, &entry).map(|o| (cmd, o)))
                    .collect();
                overrides.insert(scope, parsed);
            }
        }

        let mut types: BTreeMap<String, CommandMode> = BTreeMap::new();
        if let Some(Value::Object(map)) = store.get(TYPES_KEY) {
            for (cmd, mode) in map {
                match parse_mode(&mode) {
                    Some(mode) => {
                        types.insert(cmd, mode);
                    }
                    None => {
                        log::warn!("ignoring command_types entry '{}': invalid mode {}", cmd, mode)
                    }
                }
            }
        }

        let default_mode = match store.get(DEFAULT_MODE_KEY) {
            None | Some(Value::Null) => CommandMode::default(),
            Some(value) => parse_mode(&value).unwrap_or_else(|| {
                log::warn!("invalid command_type_mode {}; using prefix", value);
                CommandMode::default()
            }),
        };

        let registered = match store.get(REGISTERED_KEY) {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) if !s.trim().is_empty() => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            overrides,
            types,
            default_mode,
            registered,
        }
    }

    fn scopes<'a>(
        &'a self,
        guild_id: Option<&'a str>,
    ) -> impl Iterator<Item = &'a BTreeMap<String, Override>> {
        guild_id
            .into_iter()
            .chain(std::iter::once(GLOBAL_SCOPE))
            .filter_map(move |scope| self.overrides.get(scope))
    }

    fn mode(&self, command: &str, guild_id: Option<&str>) -> CommandMode {
        self.scopes(guild_id)
            .filter_map(|scope| scope.get(command).and_then(|o| o.mode))
            .next()
            .or_else(|| self.types.get(command).copied())
            .unwrap_or(self.default_mode)
    }

    fn trigger(&self, command: &str, guild_id: Option<&str>) -> Option<String> {
        // The closest override present decides, even when it has no trigger.
        self.scopes(guild_id)
            .find_map(|scope| scope.get(command))
            .and_then(|o| o.trigger.clone())
    }
}

fn parse_mode(value: &Value) -> Option<CommandMode> {
    value.as_str().and_then(|s| s.parse().ok())
}

fn parse_override(command: &str, entry: &Value) -> Option<Override> {
    let Value::Object(fields) = entry else {
        log::warn!("ignoring command override '{}': not an object", command);
        return None;
    };
    let mode = match fields.get("type") {
        None | Some(Value::Null) => None,
        Some(value) => match parse_mode(value) {
            Some(mode) => Some(mode),
            None => {
                log::warn!("ignoring invalid mode {} in override for '{}'", value, command);
                None
            }
        },
    };
    let trigger = fields
        .get("trigger")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string);
    Some(Override { mode, trigger })
}

/// Resolves and administers how each command is invoked.
///
/// # Example
///
/// ```rust
/// use gatehouse_core::{CommandMode, CommandTypeManager, ConfigStore, StoreSettings};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
/// let types = CommandTypeManager::new(store);
///
/// types.set_override("bc.get", "slash", Some("battleconditions"), Some("900")).unwrap();
/// assert_eq!(
///     types.get_effective_trigger("bc.get", Some("900")),
///     (CommandMode::Slash, Some("battleconditions".to_string()))
/// );
/// assert_eq!(types.get_command_type("bc.get", None), CommandMode::Prefix);
/// ```
pub struct CommandTypeManager {
    store: Arc<ConfigStore>,
    cache: Arc<Snapshot<CommandTypes>>,
    listener: ListenerId,
}

impl CommandTypeManager {
    pub fn new(store: Arc<ConfigStore>) -> Self {
        let (cache, listener) = cache::attach(
            &store,
            "command types",
            &[TRIGGERS_KEY, TYPES_KEY, DEFAULT_MODE_KEY, REGISTERED_KEY],
            CommandTypes::from_store,
        );
        Self {
            store,
            cache,
            listener,
        }
    }

    /// Effective mode of a command, in a guild or globally.
    pub fn get_command_type(&self, command: &str, guild_id: Option<&str>) -> CommandMode {
        self.cache.load().mode(command, guild_id)
    }

    /// Effective mode plus the custom trigger, if one is configured.
    pub fn get_effective_trigger(
        &self,
        command: &str,
        guild_id: Option<&str>,
    ) -> (CommandMode, Option<String>) {
        let view = self.cache.load();
        (view.mode(command, guild_id), view.trigger(command, guild_id))
    }

    /// Store an override for a guild, or globally when `guild_id` is `None`.
    ///
    /// Replaces any existing override for the command in that scope.
    pub fn set_override(
        &self,
        command: &str,
        mode: &str,
        trigger: Option<&str>,
        guild_id: Option<&str>,
    ) -> Result<SaveStatus> {
        let mode: CommandMode = mode.parse()?;
        let command = command.trim();
        if command.is_empty() {
            return Err(ValidationError::EmptyName("command").into());
        }

        let mut entry = Map::new();
        entry.insert("type".to_string(), Value::String(mode.to_string()));
        if let Some(trigger) = trigger.map(str::trim).filter(|t| !t.is_empty()) {
            entry.insert("trigger".to_string(), Value::String(trigger.to_string()));
        }
        let entry = Value::Object(entry);

        let scope = guild_id.unwrap_or(GLOBAL_SCOPE);
        self.store.update(TRIGGERS_KEY, |value| {
            let Some(scopes) = ensure_object(value) else {
                return Ok(false);
            };
            let slot = scopes
                .entry(scope.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            let Some(commands) = ensure_object(slot) else {
                return Ok(false);
            };
            if commands.get(command) == Some(&entry) {
                return Ok(false);
            }
            commands.insert(command.to_string(), entry);
            Ok(true)
        })
    }

    /// Drop the override for a command in one scope.
    pub fn remove_override(&self, command: &str, guild_id: Option<&str>) -> Result<SaveStatus> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ValidationError::EmptyName("command").into());
        }
        let scope = guild_id.unwrap_or(GLOBAL_SCOPE);
        self.store.update(TRIGGERS_KEY, |value| {
            Ok(value
                .get_mut(scope)
                .and_then(Value::as_object_mut)
                .is_some_and(|commands| commands.remove(command).is_some()))
        })
    }

    /// Add a command to the list walked by
    /// [`build_guild_sync_payload`](Self::build_guild_sync_payload).
    pub fn register_command(&self, command: &str) -> Result<SaveStatus> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ValidationError::EmptyName("command").into());
        }
        self.store.update(REGISTERED_KEY, |value| {
            if !value.is_array() {
                *value = Value::Array(Vec::new());
            }
            let Some(items) = value.as_array_mut() else {
                return Ok(false);
            };
            if items.iter().any(|v| v.as_str() == Some(command)) {
                return Ok(false);
            }
            items.push(Value::String(command.to_string()));
            Ok(true)
        })
    }

    /// Registered command names.
    pub fn registered_commands(&self) -> Vec<String> {
        self.cache.load().registered.clone()
    }

    /// Slash-command specs for every registered command whose mode in this
    /// guild includes slash.
    ///
    /// The name is the custom trigger, or else the last word of the command
    /// name.
    pub fn build_guild_sync_payload(&self, guild_id: Option<&str>) -> Vec<SlashCommandSpec> {
        let view = self.cache.load();
        view.registered
            .iter()
            .filter(|cmd| view.mode(cmd, guild_id).includes_slash())
            .map(|cmd| {
                let name = view.trigger(cmd, guild_id).unwrap_or_else(|| {
                    cmd.split_whitespace().last().unwrap_or(cmd).to_string()
                });
                SlashCommandSpec {
                    name,
                    description: format!("{} (auto)", cmd),
                }
            })
            .collect()
    }
}

impl Drop for CommandTypeManager {
    fn drop(&mut self) {
        self.store.unregister_listener(self.listener);
    }
}

impl std::fmt::Debug for CommandTypeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.cache.load();
        f.debug_struct("CommandTypeManager")
            .field("default_mode", &view.default_mode)
            .field("registered", &view.registered.len())
            .finish()
    }
}

/// Replace a non-object value with an empty object and borrow it.
fn ensure_object(value: &mut Value) -> Option<&mut Map<String, Value>> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    value.as_object_mut()
}

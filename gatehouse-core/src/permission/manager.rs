//! Permission checks and grant administration.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use super::directory::{format_subject_label, Directory, OwnerResolver, SubjectKind};
use super::edit;
use super::grant::{extract_id, ChannelSet};
use super::model::{validate_pattern, CommandPermissionEntry, GuildPermissions, PermissionTree};
use super::resolver::{resolve, Decision, Subject};
use crate::cache::{self, Snapshot};
use crate::config::{ConfigStore, SaveStatus};
use crate::error::{Result, ValidationError};
use crate::events::ListenerId;

/// Document key holding the permissions subtree.
pub const PERMISSIONS_KEY: &str = "permissions";

/// Fail-closed authorization over the `permissions` subtree.
///
/// Checks run against a typed snapshot that is rebuilt whenever a save
/// touches `permissions`, so [`check`](Self::check) never reads the disk and
/// sees every mutation made through this manager immediately.
///
/// # Example
///
/// ```rust
/// use gatehouse_core::permission::{ChannelSet, GrantReason, PermissionManager, Subject};
/// use gatehouse_core::{ConfigStore, StoreSettings};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
/// let perms = PermissionManager::new(store);
///
/// let member = Subject::member("500001", ["700001"]);
/// assert!(!perms.check(&member, "roles.update", Some("900"), Some("999")).allowed);
///
/// perms
///     .add_role_grant("900", "roles.update", "<@&700001>", Some(ChannelSet::public()))
///     .unwrap();
/// let decision = perms.check(&member, "roles.update", Some("900"), Some("999"));
/// assert_eq!(decision.reason, Some(GrantReason::RoleGrant));
/// ```
pub struct PermissionManager {
    store: Arc<ConfigStore>,
    cache: Arc<Snapshot<PermissionTree>>,
    bot_owner: RwLock<Option<String>>,
    listener: ListenerId,
}

impl PermissionManager {
    /// Create a manager, adding an empty `permissions` root if missing.
    pub fn new(store: Arc<ConfigStore>) -> Self {
        if store.get(PERMISSIONS_KEY).map_or(true, |v| v.is_null()) {
            let status = store.set(
                PERMISSIONS_KEY,
                json!({"global": {"users": [], "roles": []}, "guilds": {}}),
            );
            log::debug!("created permissions root ({:?})", status);
        }

        let (cache, listener) = cache::attach(&store, "permissions", &[PERMISSIONS_KEY], |s| {
            PermissionTree::from_value(&s.get_or(PERMISSIONS_KEY, Value::Null))
        });

        Self {
            store,
            cache,
            bot_owner: RwLock::new(None),
            listener,
        }
    }

    /// Set the bot owner up front, for hosts that already know it.
    pub fn with_bot_owner(self, owner_id: impl Into<String>) -> Self {
        self.set_bot_owner(Some(owner_id.into()));
        self
    }

    pub fn set_bot_owner(&self, owner_id: Option<String>) {
        *self.bot_owner.write() = owner_id;
    }

    pub fn bot_owner(&self) -> Option<String> {
        self.bot_owner.read().clone()
    }

    /// Resolve the bot owner and warm the cache.
    ///
    /// Call once after the host has logged in. A failed lookup is logged and
    /// leaves the owner unset; there is no timeout.
    ///
    /// # Example
    ///
    /// ```rust
    /// use async_trait::async_trait;
    /// use gatehouse_core::permission::{LookupError, OwnerResolver, PermissionManager};
    /// use gatehouse_core::{ConfigStore, StoreSettings};
    ///
    /// struct ApplicationInfo;
    ///
    /// #[async_trait]
    /// impl OwnerResolver for ApplicationInfo {
    ///     async fn bot_owner_id(&self) -> Result<Option<String>, LookupError> {
    ///         Ok(Some("100000000000000001".to_string()))
    ///     }
    /// }
    ///
    /// # tokio_test::block_on(async {
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
    /// let perms = PermissionManager::new(store);
    ///
    /// perms.initialize(&ApplicationInfo).await;
    /// assert_eq!(perms.bot_owner().as_deref(), Some("100000000000000001"));
    /// # });
    /// ```
    pub async fn initialize(&self, resolver: &dyn OwnerResolver) {
        match resolver.bot_owner_id().await {
            Ok(Some(owner)) => {
                log::debug!("resolved bot owner {}", owner);
                self.set_bot_owner(Some(owner));
            }
            Ok(None) => log::debug!("owner resolver returned no bot owner"),
            Err(e) => log::warn!("unable to resolve bot owner: {}", e),
        }
        self.reload();
    }

    /// Rebuild the cached snapshot from the store.
    pub fn reload(&self) {
        self.cache.refresh(|| {
            PermissionTree::from_value(&self.store.get_or(PERMISSIONS_KEY, Value::Null))
        });
        log::debug!("reloaded permissions cache");
    }

    /// Decide whether `subject` may run `command`.
    ///
    /// `guild` is `None` outside a guild and `channel` is `None` for a direct
    /// message. Never fails: anything unexpected resolves to a deny.
    pub fn check(
        &self,
        subject: &Subject,
        command: &str,
        guild: Option<&str>,
        channel: Option<&str>,
    ) -> Decision {
        let tree = self.cache.load();
        let owner = self.bot_owner.read().clone();

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            resolve(&tree, owner.as_deref(), subject, command, guild, channel)
        }));
        match outcome {
            Ok(decision) => decision,
            Err(_) => {
                log::error!("permission check for '{}' failed; denying", command);
                Decision::deny()
            }
        }
    }

    /// Current permissions snapshot.
    pub fn permissions(&self) -> Arc<PermissionTree> {
        self.cache.load()
    }

    // ===== Per-command grants =====

    /// Grant a user access to a command in a guild.
    ///
    /// A new grant with `channels` of `None` applies nowhere until channels
    /// are set. Re-adding an existing user only replaces its channels when
    /// `channels` is given.
    pub fn add_user_grant(
        &self,
        guild_id: &str,
        command: &str,
        user: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let command = require_name(command, "command")?;
        let user_id = extract_id(user)?;
        self.upsert_at(&["guilds", guild_id, "commands", command], "users", &user_id, channels)
    }

    pub fn remove_user_grant(
        &self,
        guild_id: &str,
        command: &str,
        user: &str,
    ) -> Result<SaveStatus> {
        let command = require_name(command, "command")?;
        let user_id = extract_id(user)?;
        self.remove_at(&["guilds", guild_id, "commands", command], "users", &user_id)
    }

    /// Grant a role access to a command in a guild. See
    /// [`add_user_grant`](Self::add_user_grant) for channel handling.
    pub fn add_role_grant(
        &self,
        guild_id: &str,
        command: &str,
        role: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let command = require_name(command, "command")?;
        let role_id = extract_id(role)?;
        self.upsert_at(&["guilds", guild_id, "commands", command], "roles", &role_id, channels)
    }

    pub fn remove_role_grant(
        &self,
        guild_id: &str,
        command: &str,
        role: &str,
    ) -> Result<SaveStatus> {
        let command = require_name(command, "command")?;
        let role_id = extract_id(role)?;
        self.remove_at(&["guilds", guild_id, "commands", command], "roles", &role_id)
    }

    /// Set the public flags of a command.
    ///
    /// `public_channels` replaces the scoped public channel list when given
    /// and is left untouched otherwise.
    pub fn set_command_public(
        &self,
        guild_id: &str,
        command: &str,
        public: bool,
        public_in_dms: bool,
        public_channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let command = require_name(command, "command")?;
        self.mutate(|root| {
            let Some(entry) = edit::object_at(root, &["guilds", guild_id, "commands", command])
            else {
                return Ok(());
            };
            edit::set_flag(entry, "public", public);
            edit::set_flag(entry, "public_in_dms", public_in_dms);
            if let Some(channels) = &public_channels {
                edit::set_channels(entry, "public_channels", channels)?;
            }
            Ok(())
        })
    }

    /// Grants configured for a command, empty when there are none.
    pub fn list_command_grants(&self, guild_id: &str, command: &str) -> CommandPermissionEntry {
        self.cache
            .load()
            .command(guild_id, command.trim())
            .cloned()
            .unwrap_or_default()
    }

    /// Create an empty guild section if missing.
    pub fn ensure_guild_permissions(&self, guild_id: &str) -> Result<GuildPermissions> {
        if let Some(existing) = self.cache.load().guild(guild_id) {
            return Ok(existing.clone());
        }
        self.mutate(|root| {
            if let Some(guild) = edit::object_at(root, &["guilds", guild_id]) {
                for section in ["commands", "bot_roles", "bot_role_map"] {
                    guild
                        .entry(section)
                        .or_insert_with(|| Value::Object(Map::new()));
                }
            }
            Ok(())
        })?;
        Ok(self
            .cache
            .load()
            .guild(guild_id)
            .cloned()
            .unwrap_or_default())
    }

    // ===== Bot-role bundles =====

    /// Bind command patterns (`name` or `prefix.*`) to a bundle.
    pub fn authorize_bundle<I, S>(
        &self,
        guild_id: &str,
        bundle: &str,
        patterns: I,
    ) -> Result<SaveStatus>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let bundle = require_name(bundle, "bundle")?;
        let patterns = patterns
            .into_iter()
            .map(|p| validate_pattern(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        self.mutate(|root| {
            if let Some(grants) = edit::object_at(root, &["guilds", guild_id, "bot_roles", bundle])
            {
                for field in ["users", "roles"] {
                    grants
                        .entry(field)
                        .or_insert_with(|| Value::Array(Vec::new()));
                }
            }
            if let Some(map) = edit::object_at(root, &["guilds", guild_id, "bot_role_map"]) {
                edit::append_patterns(map, bundle, &patterns);
            }
            Ok(())
        })
    }

    /// Unbind one pattern from a bundle, or all of them when `pattern` is
    /// `None`. The bundle's grants are kept.
    pub fn revoke_bundle(
        &self,
        guild_id: &str,
        bundle: &str,
        pattern: Option<&str>,
    ) -> Result<SaveStatus> {
        let bundle = require_name(bundle, "bundle")?;
        self.mutate(|root| {
            let Some(map) = edit::find_object(root, &["guilds", guild_id, "bot_role_map"]) else {
                return Ok(());
            };
            match pattern {
                None => {
                    map.remove(bundle);
                }
                Some(pattern) => edit::remove_pattern(map, bundle, pattern.trim()),
            }
            Ok(())
        })
    }

    pub fn add_bundle_user(
        &self,
        guild_id: &str,
        bundle: &str,
        user: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let bundle = require_name(bundle, "bundle")?;
        let user_id = extract_id(user)?;
        self.upsert_at(&["guilds", guild_id, "bot_roles", bundle], "users", &user_id, channels)
    }

    pub fn remove_bundle_user(
        &self,
        guild_id: &str,
        bundle: &str,
        user: &str,
    ) -> Result<SaveStatus> {
        let bundle = require_name(bundle, "bundle")?;
        let user_id = extract_id(user)?;
        self.remove_at(&["guilds", guild_id, "bot_roles", bundle], "users", &user_id)
    }

    pub fn add_bundle_role(
        &self,
        guild_id: &str,
        bundle: &str,
        role: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let bundle = require_name(bundle, "bundle")?;
        let role_id = extract_id(role)?;
        self.upsert_at(&["guilds", guild_id, "bot_roles", bundle], "roles", &role_id, channels)
    }

    pub fn remove_bundle_role(
        &self,
        guild_id: &str,
        bundle: &str,
        role: &str,
    ) -> Result<SaveStatus> {
        let bundle = require_name(bundle, "bundle")?;
        let role_id = extract_id(role)?;
        self.remove_at(&["guilds", guild_id, "bot_roles", bundle], "roles", &role_id)
    }

    /// Bundle name to command patterns for a guild.
    pub fn bundles(&self, guild_id: &str) -> Vec<(String, Vec<String>)> {
        self.cache
            .load()
            .guild(guild_id)
            .map(|g| {
                g.bot_role_map
                    .iter()
                    .map(|(name, patterns)| (name.clone(), patterns.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ===== Global grants =====

    pub fn add_global_user_grant(
        &self,
        user: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let user_id = extract_id(user)?;
        self.upsert_at(&["global"], "users", &user_id, channels)
    }

    pub fn remove_global_user_grant(&self, user: &str) -> Result<SaveStatus> {
        let user_id = extract_id(user)?;
        self.remove_at(&["global"], "users", &user_id)
    }

    pub fn add_global_role_grant(
        &self,
        role: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        let role_id = extract_id(role)?;
        self.upsert_at(&["global"], "roles", &role_id, channels)
    }

    pub fn remove_global_role_grant(&self, role: &str) -> Result<SaveStatus> {
        let role_id = extract_id(role)?;
        self.remove_at(&["global"], "roles", &role_id)
    }

    /// Label a subject for display. See [`format_subject_label`].
    pub fn format_subject_label(
        &self,
        kind: SubjectKind,
        id: &str,
        directory: Option<&dyn Directory>,
        guild_id: Option<&str>,
    ) -> String {
        format_subject_label(kind, id, directory, guild_id)
    }

    fn upsert_at(
        &self,
        path: &[&str],
        field: &str,
        subject_id: &str,
        channels: Option<ChannelSet>,
    ) -> Result<SaveStatus> {
        self.mutate(|root| match edit::object_at(root, path) {
            Some(parent) => edit::upsert_grant(parent, field, subject_id, channels),
            None => Ok(()),
        })
    }

    fn remove_at(&self, path: &[&str], field: &str, subject_id: &str) -> Result<SaveStatus> {
        self.mutate(|root| {
            if let Some(parent) = edit::find_object(root, path) {
                edit::remove_grant(parent, field, subject_id);
            }
            Ok(())
        })
    }

    /// Edit the stored subtree in place and save when it changed.
    ///
    /// The edit runs on the document's current contents, not the cache, so
    /// it also sees writes made directly through the store. Nodes the edit
    /// does not touch are saved exactly as they were read.
    fn mutate<F>(&self, apply: F) -> Result<SaveStatus>
    where
        F: FnOnce(&mut Value) -> Result<()>,
    {
        self.store.update(PERMISSIONS_KEY, |value| {
            let before = value.clone();
            apply(value)?;
            Ok(*value != before)
        })
    }
}

impl Drop for PermissionManager {
    fn drop(&mut self) {
        self.store.unregister_listener(self.listener);
    }
}

impl std::fmt::Debug for PermissionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionManager")
            .field("bot_owner", &*self.bot_owner.read())
            .field("guilds", &self.cache.load().guilds.len())
            .finish()
    }
}

fn require_name<'a>(
    name: &'a str,
    what: &'static str,
) -> std::result::Result<&'a str, ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName(what));
    }
    Ok(trimmed)
}

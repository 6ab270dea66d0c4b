//! Typed view of the `permissions` subtree.
//!
//! Parsing is lenient and fail-closed: an entry that cannot be understood
//! (a `*` channel, a grant without an id, a non-object command entry) is
//! logged and dropped, so it can only ever take permissions away.

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::grant::{ChannelSet, Grant};
use crate::error::ValidationError;

/// Grants in document order, one per subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GrantList(Vec<Grant>);

impl GrantList {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grant> {
        self.0.iter()
    }

    /// Grant for a subject, if any.
    pub fn get(&self, subject_id: &str) -> Option<&Grant> {
        self.0.iter().find(|g| g.subject_id == subject_id)
    }

    /// Whether `user_id` holds a grant admitting `channel`.
    pub fn admits_user(&self, user_id: &str, channel: Option<&str>) -> bool {
        self.0
            .iter()
            .any(|g| g.subject_id == user_id && g.allows(channel))
    }

    /// Whether any of `role_ids` holds a grant admitting `channel`.
    pub fn admits_any_role<'a, I>(&self, role_ids: I, channel: Option<&str>) -> bool
    where
        I: IntoIterator<Item = &'a String> + Clone,
    {
        self.0.iter().any(|g| {
            g.allows(channel) && role_ids.clone().into_iter().any(|r| *r == g.subject_id)
        })
    }
}

impl<'de> Deserialize<'de> for GrantList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = match Value::deserialize(deserializer)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                log::warn!("ignoring grant list that is not an array: {}", other);
                Vec::new()
            }
        };

        let mut grants: Vec<Grant> = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_value::<Grant>(item.clone()) {
                Ok(grant) if grants.iter().any(|g| g.subject_id == grant.subject_id) => {
                    log::debug!("ignoring duplicate grant for {}", grant.subject_id);
                }
                Ok(grant) => grants.push(grant),
                Err(e) => log::warn!("ignoring invalid grant {}: {}", item, e),
            }
        }
        Ok(Self(grants))
    }
}

/// User and role grants, used globally and by bot-role bundles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectGrants {
    #[serde(default)]
    pub users: GrantList,
    #[serde(default)]
    pub roles: GrantList,
}

/// Permissions for one command in one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPermissionEntry {
    #[serde(default)]
    pub users: GrantList,
    #[serde(default)]
    pub roles: GrantList,
    /// Anyone may run the command in any channel.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub public: bool,
    /// Anyone may run the command in these channels.
    #[serde(
        default,
        deserialize_with = "lenient_channels",
        skip_serializing_if = "ChannelSet::is_empty"
    )]
    pub public_channels: ChannelSet,
    /// Public access extends to direct messages.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub public_in_dms: bool,
}

impl CommandPermissionEntry {
    /// Whether the command is public anywhere.
    pub fn is_public(&self) -> bool {
        self.public || !self.public_channels.is_empty()
    }

    /// Whether public access admits `channel` (`None` for a direct message).
    pub fn public_admits(&self, channel: Option<&str>) -> bool {
        if !self.is_public() {
            return false;
        }
        match channel {
            None => self.public_in_dms,
            Some(_) if self.public => true,
            Some(_) => self.public_channels.allows(channel),
        }
    }
}

/// Everything configured for one guild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildPermissions {
    #[serde(default, deserialize_with = "lenient_map")]
    pub commands: BTreeMap<String, CommandPermissionEntry>,
    /// Grants per bot-role bundle.
    #[serde(default, deserialize_with = "lenient_map")]
    pub bot_roles: BTreeMap<String, SubjectGrants>,
    /// Command patterns per bot-role bundle.
    #[serde(default, deserialize_with = "lenient_map")]
    pub bot_role_map: BTreeMap<String, Vec<String>>,
}

impl GuildPermissions {
    /// Bundles whose patterns cover `command`, in name order.
    pub fn bundles_for<'a>(
        &'a self,
        command: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a SubjectGrants)> + 'a {
        self.bot_role_map
            .iter()
            .filter(move |(_, patterns)| patterns.iter().any(|p| pattern_matches(p, command)))
            .filter_map(move |(name, _)| {
                self.bot_roles
                    .get(name)
                    .map(|grants| (name.as_str(), grants))
            })
    }
}

/// The whole `permissions` subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionTree {
    #[serde(default)]
    pub global: SubjectGrants,
    #[serde(default, deserialize_with = "lenient_map")]
    pub guilds: BTreeMap<String, GuildPermissions>,
}

impl PermissionTree {
    /// Build from the raw subtree. Anything unusable yields an empty tree.
    pub fn from_value(value: &Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        match serde_json::from_value(value.clone()) {
            Ok(tree) => tree,
            Err(e) => {
                log::warn!("permissions subtree is malformed; treating it as empty: {}", e);
                Self::default()
            }
        }
    }

    pub fn guild(&self, guild_id: &str) -> Option<&GuildPermissions> {
        self.guilds.get(guild_id)
    }

    pub fn command(&self, guild_id: &str, command: &str) -> Option<&CommandPermissionEntry> {
        self.guild(guild_id).and_then(|g| g.commands.get(command))
    }
}

/// Whether a bundle pattern covers a command.
///
/// `ns.*` covers every command in the `ns.` namespace; anything else must
/// match exactly. `roles.*` does not cover `roles` or `rolesadmin`. Bundles
/// written by older bots that relied on a bare prefix match need an extra
/// exact pattern for those commands.
pub fn pattern_matches(pattern: &str, command: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') => command.starts_with(prefix),
        _ => pattern == command,
    }
}

/// Check a bundle pattern: an exact name or `prefix.*`.
pub fn validate_pattern(pattern: &str) -> std::result::Result<String, ValidationError> {
    let trimmed = pattern.trim();
    let invalid = || ValidationError::InvalidPattern(pattern.to_string());
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    match trimmed.find('*') {
        None => Ok(trimmed.to_string()),
        Some(pos) if pos == trimmed.len() - 1 && pos >= 2 && trimmed[..pos].ends_with('.') => {
            Ok(trimmed.to_string())
        }
        Some(_) => Err(invalid()),
    }
}

fn lenient_map<'de, D, T>(deserializer: D) -> std::result::Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        Value::Null => return Ok(BTreeMap::new()),
        other => {
            log::warn!("ignoring permissions section that is not an object: {}", other);
            return Ok(BTreeMap::new());
        }
    };

    let mut out = BTreeMap::new();
    for (key, value) in raw {
        match serde_json::from_value::<T>(value) {
            Ok(parsed) => {
                out.insert(key, parsed);
            }
            Err(e) => log::warn!("ignoring invalid permissions entry '{}': {}", key, e),
        }
    }
    Ok(out)
}

fn lenient_channels<'de, D>(deserializer: D) -> std::result::Result<ChannelSet, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(ChannelSet::new());
    }
    Ok(serde_json::from_value(value).unwrap_or_else(|e| {
        log::warn!("ignoring invalid public_channels: {}", e);
        ChannelSet::new()
    }))
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Null => Ok(false),
        other => {
            log::warn!("expected a boolean flag, found {}; treating as false", other);
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("roles.*", "roles.update"));
        assert!(pattern_matches("roles.*", "roles.sync.all"));
        assert!(!pattern_matches("roles.*", "roles"));
        assert!(!pattern_matches("roles.*", "roles_admin.update"));
        assert!(pattern_matches("bc.get", "bc.get"));
        assert!(!pattern_matches("bc.get", "bc.get_all"));
    }

    #[test]
    fn test_validate_pattern() {
        assert_eq!(validate_pattern(" roles.* ").unwrap(), "roles.*");
        assert_eq!(validate_pattern("bc.get").unwrap(), "bc.get");
        for bad in ["", "*", ".*", "roles*", "ro*les.x", "roles.**", "a b"] {
            assert!(validate_pattern(bad).is_err(), "pattern {:?}", bad);
        }
    }

    #[test]
    fn test_tree_parses_document_shape() {
        let tree = PermissionTree::from_value(&json!({
            "global": {"users": [{"id": "1", "channels": ["public"]}], "roles": []},
            "guilds": {
                "900": {
                    "commands": {
                        "roles.update": {
                            "users": [],
                            "roles": [{"id": "77", "channels": ["public"]}],
                            "public": false
                        }
                    },
                    "bot_roles": {"mods": {"users": ["5"], "roles": []}},
                    "bot_role_map": {"mods": ["roles.*"]}
                }
            }
        }));

        assert_eq!(tree.global.users.len(), 1);
        let entry = tree.command("900", "roles.update").unwrap();
        assert_eq!(entry.roles.get("77").unwrap().channels, ChannelSet::public());
        let bundles: Vec<_> = tree.guild("900").unwrap().bundles_for("roles.update").collect();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].0, "mods");
    }

    #[test]
    fn test_tree_drops_invalid_entries() {
        let tree = PermissionTree::from_value(&json!({
            "guilds": {
                "900": {
                    "commands": {
                        "a": {"users": [
                            {"id": "1", "channels": ["*"]},
                            {"id": "2", "channels": ["111"]},
                            {"channels": ["111"]}
                        ]},
                        "b": "not an entry",
                        "c": {"public": "yes", "public_channels": ["*"]}
                    }
                },
                "901": 5
            }
        }));

        let guild = tree.guild("900").unwrap();
        let a = &guild.commands["a"];
        assert_eq!(a.users.len(), 1);
        assert!(a.users.get("2").is_some());
        assert!(!guild.commands.contains_key("b"));
        let c = &guild.commands["c"];
        assert!(!c.public);
        assert!(c.public_channels.is_empty());
        assert!(tree.guild("901").is_none());
    }

    #[test]
    fn test_malformed_root_is_empty() {
        assert_eq!(PermissionTree::from_value(&json!([1, 2])), PermissionTree::default());
        assert_eq!(PermissionTree::from_value(&Value::Null), PermissionTree::default());
    }

    #[test]
    fn test_public_admits() {
        let mut entry = CommandPermissionEntry::default();
        assert!(!entry.public_admits(Some("1")));

        entry.public = true;
        assert!(entry.public_admits(Some("1")));
        assert!(!entry.public_admits(None));

        entry.public_in_dms = true;
        assert!(entry.public_admits(None));

        let scoped = CommandPermissionEntry {
            public_channels: ChannelSet::parse(["111"]).unwrap(),
            ..Default::default()
        };
        assert!(scoped.public_admits(Some("111")));
        assert!(!scoped.public_admits(Some("222")));
        assert!(!scoped.public_admits(None));
    }

    #[test]
    fn test_grant_list_keeps_first_grant_per_subject() {
        let list: GrantList = serde_json::from_value(json!([
            {"id": "1", "channels": ["111"]},
            {"id": "1", "channels": ["public"]},
            {"id": 2, "channels": ["public"]}
        ]))
        .unwrap();
        assert_eq!(list.len(), 2);
        assert!(list.admits_user("1", Some("111")));
        assert!(!list.admits_user("1", Some("222")));
        assert!(list.admits_user("2", None));
    }
}

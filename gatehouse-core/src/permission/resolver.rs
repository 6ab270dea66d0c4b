//! Precedence resolution over a permissions snapshot.

use std::collections::BTreeSet;

use super::model::PermissionTree;

/// The caller being authorized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    /// Normalized user id
    pub user_id: String,
    /// Role ids held in the guild being checked
    pub role_ids: BTreeSet<String>,
    /// Whether the user owns the guild being checked
    pub is_guild_owner: bool,
}

impl Subject {
    /// A user with no roles, e.g. in a direct message.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// A guild member holding `role_ids`.
    pub fn member<I, S>(user_id: impl Into<String>, role_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            role_ids: role_ids.into_iter().map(Into::into).collect(),
            is_guild_owner: false,
        }
    }

    /// Mark the subject as owner of the guild being checked.
    pub fn as_guild_owner(mut self) -> Self {
        self.is_guild_owner = true;
        self
    }
}

/// Which rule admitted a caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrantReason {
    BotOwner,
    GuildOwner,
    Public,
    PublicInDms,
    UserGrant,
    RoleGrant,
    /// User grant on the named bundle
    BundleUser(String),
    /// Role grant on the named bundle
    BundleRole(String),
    GlobalUser,
    GlobalRole,
}

impl std::fmt::Display for GrantReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrantReason::BotOwner => f.write_str("bot_owner"),
            GrantReason::GuildOwner => f.write_str("guild_owner"),
            GrantReason::Public => f.write_str("public"),
            GrantReason::PublicInDms => f.write_str("public_in_dms"),
            GrantReason::UserGrant => f.write_str("user_grant"),
            GrantReason::RoleGrant => f.write_str("role_grant"),
            GrantReason::BundleUser(name) => write!(f, "bot_role:{}:user", name),
            GrantReason::BundleRole(name) => write!(f, "bot_role:{}:role", name),
            GrantReason::GlobalUser => f.write_str("global_user"),
            GrantReason::GlobalRole => f.write_str("global_role"),
        }
    }
}

/// Outcome of a permission check.
///
/// A denial never carries a reason, so nothing about the evaluated rules
/// leaks to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<GrantReason>,
}

impl Decision {
    pub fn allow(reason: GrantReason) -> Self {
        Self {
            allowed: true,
            reason: Some(reason),
        }
    }

    pub fn deny() -> Self {
        Self {
            allowed: false,
            reason: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

/// Resolve a check against a snapshot. First matching rule wins.
///
/// Guild-scoped rules are skipped when `guild` is `None`; only the bot owner
/// and global grants apply outside a guild.
pub(crate) fn resolve(
    tree: &PermissionTree,
    bot_owner: Option<&str>,
    subject: &Subject,
    command: &str,
    guild: Option<&str>,
    channel: Option<&str>,
) -> Decision {
    if bot_owner.is_some_and(|owner| owner == subject.user_id) {
        return Decision::allow(GrantReason::BotOwner);
    }

    if let Some(guild_id) = guild {
        if subject.is_guild_owner {
            return Decision::allow(GrantReason::GuildOwner);
        }

        if let Some(section) = tree.guild(guild_id) {
            if let Some(entry) = section.commands.get(command) {
                if entry.public_admits(channel) {
                    return Decision::allow(if channel.is_none() {
                        GrantReason::PublicInDms
                    } else {
                        GrantReason::Public
                    });
                }
                if entry.users.admits_user(&subject.user_id, channel) {
                    return Decision::allow(GrantReason::UserGrant);
                }
                if entry.roles.admits_any_role(&subject.role_ids, channel) {
                    return Decision::allow(GrantReason::RoleGrant);
                }
            }

            for (name, grants) in section.bundles_for(command) {
                if grants.users.admits_user(&subject.user_id, channel) {
                    return Decision::allow(GrantReason::BundleUser(name.to_string()));
                }
                if grants.roles.admits_any_role(&subject.role_ids, channel) {
                    return Decision::allow(GrantReason::BundleRole(name.to_string()));
                }
            }
        }
    }

    if tree.global.users.admits_user(&subject.user_id, channel) {
        return Decision::allow(GrantReason::GlobalUser);
    }
    if tree.global.roles.admits_any_role(&subject.role_ids, channel) {
        return Decision::allow(GrantReason::GlobalRole);
    }

    Decision::deny()
}

//! Host-supplied identity lookups.

use std::str::FromStr;

use async_trait::async_trait;

/// Boxed error type for host lookups.
pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

/// Display-name lookups backed by the host's user and role caches.
///
/// Every method defaults to `None`, so an implementation only needs the
/// lookups it can answer.
pub trait Directory: Send + Sync {
    /// Display name of a guild member.
    fn member_name(&self, _guild_id: &str, _user_id: &str) -> Option<String> {
        None
    }

    /// Display name of a user, outside any guild.
    fn user_name(&self, _user_id: &str) -> Option<String> {
        None
    }

    /// Name of a role in a guild.
    fn role_name(&self, _guild_id: &str, _role_id: &str) -> Option<String> {
        None
    }
}

/// Resolves the bot owner's user id, typically from the application info
/// returned after login.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn bot_owner_id(&self) -> Result<Option<String>, LookupError>;
}

/// Kind of subject a grant refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubjectKind {
    User,
    Role,
}

impl FromStr for SubjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "users" => Ok(SubjectKind::User),
            "role" | "roles" => Ok(SubjectKind::Role),
            other => Err(format!("unknown subject kind '{}'", other)),
        }
    }
}

impl std::fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectKind::User => write!(f, "user"),
            SubjectKind::Role => write!(f, "role"),
        }
    }
}

/// Label a subject as `Name (id)`, or just `id` when no name is known.
///
/// Users are looked up as guild members first (when `guild_id` is given) and
/// then globally. Roles need a guild.
pub fn format_subject_label(
    kind: SubjectKind,
    id: &str,
    directory: Option<&dyn Directory>,
    guild_id: Option<&str>,
) -> String {
    let name = directory.and_then(|dir| match kind {
        SubjectKind::User => guild_id
            .and_then(|g| dir.member_name(g, id))
            .or_else(|| dir.user_name(id)),
        SubjectKind::Role => guild_id.and_then(|g| dir.role_name(g, id)),
    });

    match name {
        Some(name) => format!("{} ({})", name, id),
        None => id.to_string(),
    }
}

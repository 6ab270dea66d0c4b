//! Test doubles for the host-supplied lookups.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! gatehouse-core = { version = "...", features = ["test-utils"] }
//! ```

use std::collections::HashMap;

use async_trait::async_trait;

use crate::permission::{Directory, LookupError, OwnerResolver};

/// A [`Directory`] backed by fixed maps.
///
/// # Example
///
/// ```ignore
/// use gatehouse_core::permission::{format_subject_label, SubjectKind};
/// use gatehouse_core::test_utils::StaticDirectory;
///
/// let dir = StaticDirectory::new().with_role("900", "77", "Moderators");
/// assert_eq!(
///     format_subject_label(SubjectKind::Role, "77", Some(&dir), Some("900")),
///     "Moderators (77)"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    members: HashMap<(String, String), String>,
    users: HashMap<String, String>,
    roles: HashMap<(String, String), String>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, guild_id: &str, user_id: &str, name: &str) -> Self {
        self.members
            .insert((guild_id.to_string(), user_id.to_string()), name.to_string());
        self
    }

    pub fn with_user(mut self, user_id: &str, name: &str) -> Self {
        self.users.insert(user_id.to_string(), name.to_string());
        self
    }

    pub fn with_role(mut self, guild_id: &str, role_id: &str, name: &str) -> Self {
        self.roles
            .insert((guild_id.to_string(), role_id.to_string()), name.to_string());
        self
    }
}

impl Directory for StaticDirectory {
    fn member_name(&self, guild_id: &str, user_id: &str) -> Option<String> {
        self.members
            .get(&(guild_id.to_string(), user_id.to_string()))
            .cloned()
    }

    fn user_name(&self, user_id: &str) -> Option<String> {
        self.users.get(user_id).cloned()
    }

    fn role_name(&self, guild_id: &str, role_id: &str) -> Option<String> {
        self.roles
            .get(&(guild_id.to_string(), role_id.to_string()))
            .cloned()
    }
}

/// An [`OwnerResolver`] returning a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticOwner(pub Option<String>);

impl StaticOwner {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self(Some(owner_id.into()))
    }
}

#[async_trait]
impl OwnerResolver for StaticOwner {
    async fn bot_owner_id(&self) -> Result<Option<String>, LookupError> {
        Ok(self.0.clone())
    }
}

/// An [`OwnerResolver`] whose lookup always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingOwner;

#[async_trait]
impl OwnerResolver for FailingOwner {
    async fn bot_owner_id(&self) -> Result<Option<String>, LookupError> {
        Err("application info unavailable".into())
    }
}

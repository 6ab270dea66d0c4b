//! Dispatch-side permission gate.

use std::sync::Arc;

use thiserror::Error;

use crate::permission::{Decision, PermissionManager, Subject};

/// A command invocation about to be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub subject: Subject,
    /// Command name as registered
    pub name: String,
    /// Owning command group (cog), if any
    pub group: Option<String>,
    pub guild_id: Option<String>,
    /// `None` for a direct message
    pub channel_id: Option<String>,
}

impl Invocation {
    pub fn new(subject: Subject, name: impl Into<String>) -> Self {
        Self {
            subject,
            name: name.into(),
            group: None,
            guild_id: None,
            channel_id: None,
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn in_guild(mut self, guild_id: impl Into<String>) -> Self {
        self.guild_id = Some(guild_id.into());
        self
    }

    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// `group.name`, or `name` outside a group.
    pub fn qualified_name(&self) -> String {
        match self.group.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
            Some(group) => format!("{}.{}", group, self.name),
            None => self.name.clone(),
        }
    }
}

/// Returned for any denied invocation.
///
/// The message is the same for every denial so users learn nothing about
/// which rules exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Permission denied.")]
pub struct AccessDenied;

/// Runs the permission check for each invocation.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use gatehouse_core::permission::{PermissionManager, Subject};
/// use gatehouse_core::{CommandGate, ConfigStore, Invocation, StoreSettings};
///
/// let dir = tempfile::tempdir().unwrap();
/// let store = ConfigStore::open_shared(StoreSettings::new(dir.path())).unwrap();
/// let perms = Arc::new(PermissionManager::new(store));
/// perms.set_command_public("900", "battle.get", true, false, None).unwrap();
///
/// let gate = CommandGate::new(perms);
/// let invocation = Invocation::new(Subject::user("5"), "get")
///     .in_group("battle")
///     .in_guild("900")
///     .in_channel("10");
/// assert!(gate.authorize(&invocation).is_ok());
///
/// let denied = gate.authorize(&Invocation::new(Subject::user("5"), "purge").in_guild("900"));
/// assert_eq!(denied.unwrap_err().to_string(), "Permission denied.");
/// ```
#[derive(Debug, Clone)]
pub struct CommandGate {
    permissions: Arc<PermissionManager>,
}

impl CommandGate {
    pub fn new(permissions: Arc<PermissionManager>) -> Self {
        Self { permissions }
    }

    pub fn permissions(&self) -> &Arc<PermissionManager> {
        &self.permissions
    }

    /// Check an invocation, returning the allowing decision or a generic denial.
    pub fn authorize(&self, invocation: &Invocation) -> Result<Decision, AccessDenied> {
        let command = invocation.qualified_name();
        let decision = self.permissions.check(
            &invocation.subject,
            &command,
            invocation.guild_id.as_deref(),
            invocation.channel_id.as_deref(),
        );

        if decision.allowed {
            if let Some(reason) = &decision.reason {
                log::debug!(
                    "allowed {} for user {} ({})",
                    command,
                    invocation.subject.user_id,
                    reason
                );
            }
            Ok(decision)
        } else {
            log::debug!("denied {} for user {}", command, invocation.subject.user_id);
            Err(AccessDenied)
        }
    }
}

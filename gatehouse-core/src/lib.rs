//! # Gatehouse
//!
//! Access control and configuration for a chat bot.
//!
//! Gatehouse owns the bot's configuration document and decides who may run
//! which command, where. It has three parts:
//!
//! - [`ConfigStore`]: a JSON document persisted with atomic, crash-safe
//!   writes and a rolling backup, with change notification
//! - [`PermissionManager`]: fail-closed permission checks with a fixed rule
//!   precedence, plus the grant administration helpers
//! - [`CommandTypeManager`]: whether each command is invoked by prefix, as a
//!   slash command, both, or not at all
//!
//! [`CommandGate`] ties a dispatched command to a permission check.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use gatehouse_core::permission::{ChannelSet, Subject};
//! use gatehouse_core::{CommandGate, ConfigStore, Invocation, PermissionManager, StoreSettings};
//!
//! # fn main() -> gatehouse_core::Result<()> {
//! # let dir = tempfile::tempdir()?;
//! # std::env::set_var("BOT_DATA_DIR", dir.path());
//! let store = ConfigStore::open_shared(StoreSettings::from_env())?;
//! let perms = Arc::new(PermissionManager::new(Arc::clone(&store)));
//!
//! perms.add_role_grant("900", "roles.update", "<@&700001>", Some(ChannelSet::public()))?;
//!
//! let gate = CommandGate::new(perms);
//! let invocation = Invocation::new(Subject::member("500001", ["700001"]), "update")
//!     .in_group("roles")
//!     .in_guild("900")
//!     .in_channel("999");
//! assert!(gate.authorize(&invocation).is_ok());
//! # Ok(())
//! # }
//! ```
//!
//! ## Sharing
//!
//! Create one [`ConfigStore`] at startup and pass it, as an `Arc`, to every
//! manager. Managers keep a cached view that is refreshed by the store's
//! listeners, so reads never touch the disk.
//!
//! ## Logging
//!
//! Gatehouse logs through the [`log`](https://docs.rs/log) facade; the host
//! chooses the logger.
//!
//! ## Feature Flags
//!
//! - `test-utils`: static [`permission::Directory`] and
//!   [`permission::OwnerResolver`] implementations for tests

mod cache;

pub mod command_type;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod permission;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use command_type::{CommandMode, CommandTypeManager, SlashCommandSpec};
pub use config::{ConfigStore, Document, SaveStatus, StoreSettings};
pub use error::{Error, Result, ValidationError};
pub use events::{AsyncConfigListener, ConfigEvent, ConfigEventKind, ConfigListener, ListenerId};
pub use gate::{AccessDenied, CommandGate, Invocation};
pub use permission::{Decision, GrantReason, PermissionManager, Subject};

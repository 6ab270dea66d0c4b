//! Command authorization.
//!
//! Every command invocation is checked against the `permissions` subtree of
//! the config document. Resolution is fail-closed: a command nobody has been
//! granted is denied.
//!
//! # Overview
//!
//! - **[`PermissionManager`]**: runs checks and administers grants
//! - **[`Subject`]**: the caller (user id, role ids, guild ownership)
//! - **[`Decision`]** / **[`GrantReason`]**: the outcome and which rule allowed it
//! - **[`Grant`]** / **[`ChannelSet`]**: a subject id and the channels it applies in
//! - **[`Directory`]** / **[`OwnerResolver`]**: lookups supplied by the host
//!
//! # Precedence
//!
//! The first matching rule wins:
//!
//! | Step | Rule | Reason |
//! |------|------|--------|
//! | 1 | Caller is the bot owner | `bot_owner` |
//! | 2 | Caller owns the guild | `guild_owner` |
//! | 3 | Command is public in this channel | `public` / `public_in_dms` |
//! | 4 | Guild user grant on the command | `user_grant` |
//! | 5 | Guild role grant on the command | `role_grant` |
//! | 6 | Bot-role bundle covering the command | `bot_role:<name>:user` / `bot_role:<name>:role` |
//! | 7 | Global user grant | `global_user` |
//! | 8 | Global role grant | `global_role` |
//!
//! Anything else is denied without a reason.
//!
//! # Channels
//!
//! A grant's channel set decides where it applies. An empty set applies
//! nowhere, `public` applies everywhere (direct messages included), and
//! otherwise only the listed channel ids match. `*` is not a wildcard and is
//! rejected.

mod directory;
mod edit;
mod grant;
mod manager;
mod model;
mod resolver;

pub use directory::{
    format_subject_label, Directory, LookupError, OwnerResolver, SubjectKind,
};
pub use grant::{extract_id, ChannelSet, ChannelToken, Grant, PUBLIC_CHANNEL};
pub use manager::{PermissionManager, PERMISSIONS_KEY};
pub use model::{
    pattern_matches, validate_pattern, CommandPermissionEntry, GrantList, GuildPermissions,
    PermissionTree, SubjectGrants,
};
pub use resolver::{Decision, GrantReason, Subject};

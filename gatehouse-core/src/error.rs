//! Top-level error types for gatehouse
//!
//! Administrative mutations and store startup are the only operations that
//! return errors. The permission read path never does: it resolves to a deny
//! instead, and persistence failures during a save are reported through
//! [`crate::config::SaveStatus`] rather than as an error.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid input rejected by a mutation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Invocation mode outside `prefix`, `slash`, `both`, `none`.
    #[error("invalid command mode '{0}': expected one of prefix, slash, both, none")]
    InvalidMode(String),

    /// No numeric id could be extracted from a subject identifier.
    #[error("could not parse a numeric id from '{0}'; use a mention or raw id")]
    InvalidIdentifier(String),

    /// The bare `*` channel token. Only `public` acts as a wildcard.
    #[error("invalid channel token '*': use 'public' instead")]
    WildcardChannel,

    /// A channel token that is empty after trimming.
    #[error("channel token must not be empty")]
    EmptyChannel,

    /// Bundle command pattern is neither an exact name nor `prefix.*`.
    #[error("invalid command pattern '{0}': expected an exact name or 'prefix.*'")]
    InvalidPattern(String),

    /// Command or bundle name is empty.
    #[error("{0} name must not be empty")]
    EmptyName(&'static str),
}

/// Top-level error type for gatehouse operations
#[derive(Debug, Error)]
pub enum Error {
    /// Both the primary config file and its backup are unreadable
    #[error("config at {path} is unreadable and no valid backup exists (primary: {primary}; backup: {backup})")]
    ConfigCorruption {
        /// Primary document path
        path: PathBuf,
        /// Why the primary failed to load
        primary: String,
        /// Why the backup failed to load
        backup: String,
    },

    /// Invalid input to a mutation
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Filesystem error outside the save path (e.g. creating the data directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if the stored configuration could not be recovered
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::ConfigCorruption { .. })
    }

    /// Returns true if the caller supplied invalid input
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// The validation failure, if this is one
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for gatehouse operations
pub type Result<T> = std::result::Result<T, Error>;

//! Durable JSON configuration document.
//!
//! - **[`ConfigStore`]**: the document, its atomic persistence, and listener fan-out
//! - **[`StoreSettings`]**: data directory, file name, queue capacity
//! - **[`SaveStatus`]**: what happened to a save
//!
//! # Recovery
//!
//! On open the primary file is parsed first. If it is missing or invalid the
//! rolling backup (`<path>.bak`) is used instead and copied back over the
//! primary. When both are unusable, opening fails with
//! [`crate::Error::ConfigCorruption`].

mod persist;
mod settings;
mod store;

pub use settings::{
    default_document, StoreSettings, DATA_DIR_ENV, DEFAULT_FILE_NAME, DEFAULT_PREFIX,
    LEGACY_DATA_DIR_ENV,
};
pub use store::{ConfigStore, Document, SaveStatus};

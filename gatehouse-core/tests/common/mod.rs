//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core::permission::{LookupError, OwnerResolver};
use gatehouse_core::{ConfigStore, StoreSettings};
use tempfile::TempDir;

pub const GUILD: &str = "900000000000000001";
pub const OWNER: &str = "100000000000000001";
pub const USER: &str = "200000000000000001";
pub const OTHER_USER: &str = "200000000000000002";
pub const ROLE: &str = "300000000000000001";

// ===== Store Fixtures =====

/// A store in a fresh temp directory. Keep the directory alive for the test.
pub fn fresh_store() -> (TempDir, Arc<ConfigStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path());
    (dir, store)
}

pub fn open_store(dir: &Path) -> Arc<ConfigStore> {
    ConfigStore::open_shared(StoreSettings::new(dir)).unwrap()
}

/// Names of `*.tmp` files left in a directory.
pub fn leftover_temps(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect()
}

// ===== Owner Resolvers =====

/// Resolves to a fixed owner id.
pub struct FixedOwner(pub &'static str);

#[async_trait]
impl OwnerResolver for FixedOwner {
    async fn bot_owner_id(&self) -> Result<Option<String>, LookupError> {
        Ok(Some(self.0.to_string()))
    }
}

/// Always fails, like a host that has not logged in yet.
pub struct UnreachableOwner;

#[async_trait]
impl OwnerResolver for UnreachableOwner {
    async fn bot_owner_id(&self) -> Result<Option<String>, LookupError> {
        Err("not logged in".into())
    }
}

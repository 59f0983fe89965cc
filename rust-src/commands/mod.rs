//! CLI command implementations.

use std::path::Path;

use anyhow::{Context, Result};

use crate::storage::Store;

pub mod format;
pub mod ingest;
pub mod refresh;
pub mod settings;
pub mod status;
pub mod usage;
pub mod watch;


/// Open the store, creating the database if needed.
pub async fn open_store(db_path: &Path) -> Result<Store> {
    Store::open(db_path)
        .await
        .with_context(|| format!("Failed to open usage database: {}", db_path.display()))
}

//! Storage layer for usage snapshots and settings.

mod database;

pub use database::{SnapshotStore, StorageError, Store};

//! Ingest command - load a snapshot batch from a file or stdin.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::AsyncReadExt;

use super::format::print_ingest_report;
use super::open_store;
use crate::cache::UsageCache;
use crate::events::EventBus;
use crate::ingest::IngestionPipeline;
use crate::storage::SnapshotStore;


/// Run the ingest command.
pub async fn run(db_path: &Path, file: Option<PathBuf>) -> Result<()> {
    let contents = match &file {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read snapshots from stdin")?;
            buf
        }
    };

    // Rows are converted one by one so a bad row only fails itself
    let rows: Vec<Value> =
        serde_json::from_str(&contents).context("Expected a JSON array of usage snapshots")?;

    if rows.is_empty() {
        println!("No snapshots to ingest.");
        return Ok(());
    }

    let store = open_store(db_path).await?;
    let shared: Arc<dyn SnapshotStore> = Arc::new(store.clone());
    let pipeline = IngestionPipeline::new(shared.clone(), UsageCache::new(shared), EventBus::default());

    let report = pipeline.ingest_rows(&rows).await;
    print_ingest_report(&report);
    if let Err(partial) = report.into_result() {
        eprintln!("\x1b[33mWarning: {partial}\x1b[0m");
    }

    store.close().await?;
    Ok(())
}

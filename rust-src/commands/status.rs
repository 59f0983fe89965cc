//! Status command - summarise what the store holds.

use std::path::Path;

use anyhow::Result;

use super::format::{format_currency, format_number};
use super::open_store;
use crate::models::Provider;


/// Run the status command.
pub async fn run(db_path: &Path) -> Result<()> {
    let store = open_store(db_path).await?;
    let stats = store.stats().await?;

    let location = store.path().unwrap_or(db_path);
    println!("Database: {}", location.display());

    if stats.total_rows == 0 {
        println!("No snapshots stored yet. Run 'ttk ingest' or 'ttk watch' to start tracking.");
        store.close().await?;
        return Ok(());
    }

    println!("  Snapshots:           {:>15}", format_number(stats.total_rows));
    println!("  Days Tracked:        {:>15}", format_number(stats.total_days));
    if let (Some(oldest), Some(newest)) = (&stats.oldest_date, &stats.newest_date) {
        println!("  Date Range:          {} to {}", oldest, newest);
    }
    println!("  Total Cost:          ${:>14}", format_currency(stats.total_cost));
    for provider in Provider::ALL {
        let cost = stats.cost_by_provider.get(provider.as_str()).copied().unwrap_or(0.0);
        println!("    {:<18} ${:>14}", provider, format_currency(cost));
    }

    store.close().await?;
    Ok(())
}

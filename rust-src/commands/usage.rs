//! Usage command - show windowed totals from the local cache.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use super::format::print_view;
use super::open_store;
use crate::aggregation::{DailyTotal, ModelTotal, TodaySummary};
use crate::cache::UsageCache;
use crate::storage::SnapshotStore;


#[derive(Serialize)]
struct UsageReport<'a> {
    window_days: u32,
    cutoff: NaiveDate,
    today: TodaySummary,
    daily_totals: &'a [DailyTotal],
    model_totals: &'a [ModelTotal],
}


/// Run the usage command.
pub async fn run(db_path: &Path, days: u32, json: bool) -> Result<()> {
    let store = open_store(db_path).await?;
    let shared: Arc<dyn SnapshotStore> = Arc::new(store.clone());
    let cache = UsageCache::new(shared);

    let view = cache.get_usage(days).await?;
    let today = cache.today();

    if json {
        let report = UsageReport {
            window_days: view.window_days,
            cutoff: view.cutoff,
            today: view.today(today),
            daily_totals: &view.daily_totals,
            model_totals: &view.model_totals,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_view(&view, today);
    }

    store.close().await?;
    Ok(())
}

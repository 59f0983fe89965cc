//! Refresh command - one manual refresh cycle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::format::{print_ingest_report, print_update, print_view};
use super::open_store;
use super::watch::build_poller;
use crate::alerts::StderrNotifier;
use crate::config::Settings;
use crate::events::EventBus;
use crate::session::{SessionUpdate, Tracker};


/// Run the refresh command.
pub async fn run(db_path: &Path, days: u32, poller_command: Option<&str>, grace: Duration) -> Result<()> {
    let store = open_store(db_path).await?;
    let settings = Settings::load(&store).await;
    let notifier = StderrNotifier::from_settings(&settings);
    let tracker = Arc::new(
        Tracker::open(&store, settings, EventBus::default(), notifier, days).with_refresh_grace(grace),
    );
    let poller = build_poller(poller_command, &tracker);

    // Poller pushes land on the bus; the listener ingests them
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = tracker.listen(tx);

    let deadline = Instant::now() + grace;
    let mut update = tracker.manual_refresh(poller.as_ref()).await?;

    // A poller may print several events; take everything it sends in the grace period
    if poller_command.is_some() {
        while let Ok(Some(pushed)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            let pushed = pushed?;
            if let Some(report) = &pushed.ingest {
                print_ingest_report(report);
            }
            update = SessionUpdate {
                refresh: update.refresh,
                ..pushed
            };
        }
    }
    listener.unsubscribe().await;

    print_update(&update);
    print_view(&update.view, tracker.cache().today());

    store.close().await?;
    Ok(())
}

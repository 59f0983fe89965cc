//! Watch command - long-running session fed by inbound events on stdin.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::BufReader;

use super::format::{print_stale, print_update};
use super::open_store;
use crate::alerts::StderrNotifier;
use crate::config::Settings;
use crate::events::EventBus;
use crate::poller::{CommandPoller, NoopPoller, Poller};
use crate::session::Tracker;


/// Pick the poller for a session: the configured command, or none.
pub fn build_poller(command: Option<&str>, tracker: &Tracker<StderrNotifier>) -> Box<dyn Poller> {
    match command.and_then(|cmd| CommandPoller::from_command_line(cmd, tracker.bus().clone())) {
        Some(poller) => Box::new(poller.with_settings(tracker.settings())),
        None => Box::new(NoopPoller),
    }
}


/// Run the watch command.
pub async fn run(db_path: &Path, days: u32, poller_command: Option<&str>, grace: Duration) -> Result<()> {
    let store = open_store(db_path).await?;
    let settings = Settings::load(&store).await;
    let notifier = StderrNotifier::from_settings(&settings);
    let tracker = Arc::new(
        Tracker::open(&store, settings, EventBus::default(), notifier, days).with_refresh_grace(grace),
    );
    let poller = build_poller(poller_command, &tracker);

    eprintln!(
        "Watching usage for the last {} days (poll interval {}s). Reading events from stdin.",
        tracker.window_days(),
        tracker.settings().poll_interval().as_secs()
    );

    let stdin = BufReader::new(tokio::io::stdin());
    tracker
        .run(stdin, poller.as_ref(), |result| match result {
            Ok(update) => print_update(&update),
            Err(e) => {
                eprintln!("\x1b[33mWarning: {e}\x1b[0m");
                print_stale(&tracker.cache().peek(tracker.window_days()));
            }
        })
        .await;

    store.close().await?;
    Ok(())
}

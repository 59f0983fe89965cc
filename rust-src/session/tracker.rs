//! A running tracking session: one store, one cache, one alert evaluator.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{mpsc, Mutex};

use crate::aggregation::TodaySummary;
use crate::alerts::{AlertEvaluator, AlertOutcome, Notifier};
use crate::cache::{QueryError, UsageCache, UsageView};
use crate::config::{Settings, REFRESH_GRACE};
use crate::events::{EventBus, ListenerHandle, UsageEvent};
use crate::ingest::{IngestReport, IngestionPipeline, RefreshOutcome};
use crate::poller::{parse_poller_line, Poller};
use crate::storage::{SnapshotStore, Store};


/// Inbound line that asks for a manual refresh instead of carrying an event.
pub const REFRESH_COMMAND: &str = "refresh";


/// What changed after handling one signal.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub ingest: Option<IngestReport>,
    pub refresh: Option<RefreshOutcome>,
    pub view: Arc<UsageView>,
    pub today: TodaySummary,
    pub alert: AlertOutcome,
}


pub type UpdateResult = Result<SessionUpdate, QueryError>;


/// Wires the pipeline, cache and alerts around an open store.
pub struct Tracker<N> {
    pipeline: IngestionPipeline,
    settings: Settings,
    alerts: Mutex<AlertEvaluator<N>>,
    window_days: u32,
    refresh_grace: Duration,
}


impl<N: Notifier + 'static> Tracker<N> {
    /// Build a session over `store` with settings loaded by the caller.
    pub fn open(store: &Store, settings: Settings, bus: EventBus, notifier: N, window_days: u32) -> Self {
        let shared: Arc<dyn SnapshotStore> = Arc::new(store.clone());
        let cache = UsageCache::new(Arc::clone(&shared));
        Self::with_parts(IngestionPipeline::new(shared, cache, bus), settings, notifier, window_days)
    }

    pub fn with_parts(
        pipeline: IngestionPipeline,
        settings: Settings,
        notifier: N,
        window_days: u32,
    ) -> Self {
        Self {
            pipeline,
            settings,
            alerts: Mutex::new(AlertEvaluator::new(notifier)),
            window_days,
            refresh_grace: REFRESH_GRACE,
        }
    }

    pub fn with_refresh_grace(mut self, grace: Duration) -> Self {
        self.refresh_grace = grace;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn window_days(&self) -> u32 {
        self.window_days
    }

    pub fn cache(&self) -> &UsageCache {
        self.pipeline.cache()
    }

    pub fn bus(&self) -> &EventBus {
        self.pipeline.bus()
    }

    /// Apply one inbound signal, then re-derive the window and check alerts.
    pub async fn handle_event(&self, event: UsageEvent) -> UpdateResult {
        let ingest = match event {
            UsageEvent::NewSnapshots(rows) => Some(self.pipeline.ingest_rows(&rows).await),
            UsageEvent::UsageUpdated => {
                self.cache().refetch(self.window_days).await?;
                None
            }
        };
        let mut update = self.update().await?;
        update.ingest = ingest;
        Ok(update)
    }

    /// Trigger the poller, give its data up to the grace period to be
    /// ingested, then re-derive.
    pub async fn manual_refresh(&self, poller: &dyn Poller) -> UpdateResult {
        let outcome = self.pipeline.manual_refresh(poller, self.refresh_grace).await;
        let mut update = self.update().await?;
        update.refresh = Some(outcome);
        Ok(update)
    }

    /// Current window view and alert state.
    pub async fn update(&self) -> UpdateResult {
        let view = self.cache().get_usage(self.window_days).await?;
        let today = self.cache().today();
        let alert = self
            .alerts
            .lock()
            .await
            .evaluate(&self.settings, &view, today)
            .await;

        Ok(SessionUpdate {
            ingest: None,
            refresh: None,
            today: view.today(today),
            view,
            alert,
        })
    }

    /// Handle events published on the bus (poller pushes), forwarding each
    /// resulting update to `updates`. Stops when the handle is dropped.
    pub fn listen(self: &Arc<Self>, updates: mpsc::UnboundedSender<UpdateResult>) -> ListenerHandle {
        let tracker = Arc::clone(self);
        self.bus().listen("session", move |event| {
            let tracker = Arc::clone(&tracker);
            let updates = updates.clone();
            async move {
                let _ = updates.send(tracker.handle_event(event).await);
            }
        })
    }

    /// Interpret one inbound line: an event, a bare snapshot array, or `refresh`.
    pub async fn handle_line(&self, line: &str, poller: &dyn Poller) -> Option<UpdateResult> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line == REFRESH_COMMAND {
            return Some(self.manual_refresh(poller).await);
        }
        let event = parse_poller_line(line)?;
        Some(self.handle_event(event).await)
    }

    /// Drive the session from `input` until EOF.
    ///
    /// Bus events are handled for the lifetime of this call only; the listener
    /// is released on return.
    pub async fn run<R, F>(self: &Arc<Self>, input: R, poller: &dyn Poller, mut on_update: F)
    where
        R: AsyncBufRead + Unpin,
        F: FnMut(UpdateResult),
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = self.listen(tx);
        let mut lines = input.lines();

        tracing::debug!(subscribers = self.bus().subscriber_count(), "session started");
        on_update(self.update().await);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(result) = self.handle_line(&line, poller).await {
                            on_update(result);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed reading session input");
                        break;
                    }
                },
                Some(result) = rx.recv() => on_update(result),
            }
        }

        tracing::debug!(
            listener = listener.name(),
            active = listener.is_active(),
            "session input closed, releasing listener"
        );
        listener.unsubscribe().await;
    }
}

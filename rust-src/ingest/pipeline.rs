//! Idempotent ingestion of snapshot batches.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;

use crate::cache::UsageCache;
use crate::events::EventBus;
use crate::models::{row_key, UsageSnapshot};
use crate::poller::Poller;
use crate::storage::SnapshotStore;


/// One row of a batch that could not be stored.
#[derive(Debug, Clone, Serialize)]
pub struct FailedSnapshot {
    /// `provider/model/date`, as far as the row could be read.
    pub key: String,
    pub reason: String,
}


/// Raised when some rows of a batch were rejected. The rest were applied.
#[derive(Debug, Error)]
#[error("{} of {total} snapshots failed to ingest", failed.len())]
pub struct IngestionPartialFailure {
    pub total: usize,
    pub failed: Vec<FailedSnapshot>,
}


/// Outcome of one `ingest` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub applied: usize,
    pub failed: Vec<FailedSnapshot>,
}


impl IngestReport {
    pub fn total(&self) -> usize {
        self.applied + self.failed.len()
    }

    fn reject(&mut self, key: String, reason: String) {
        tracing::warn!(%key, %reason, "snapshot rejected");
        self.failed.push(FailedSnapshot { key, reason });
    }

    pub fn into_result(self) -> Result<usize, IngestionPartialFailure> {
        if self.failed.is_empty() {
            Ok(self.applied)
        } else {
            Err(IngestionPartialFailure {
                total: self.total(),
                failed: self.failed,
            })
        }
    }
}


/// Result of a manual refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A pushed batch was ingested within the grace period.
    Pushed,
    /// Nothing arrived in time; the cache was refetched anyway.
    TimedOut,
}


/// Writes snapshot batches to the store and invalidates the cache afterwards.
pub struct IngestionPipeline {
    store: Arc<dyn SnapshotStore>,
    cache: UsageCache,
    bus: EventBus,
    batches: watch::Sender<u64>,
}


impl IngestionPipeline {
    pub fn new(store: Arc<dyn SnapshotStore>, cache: UsageCache, bus: EventBus) -> Self {
        let (batches, _) = watch::channel(0);
        Self {
            store,
            cache,
            bus,
            batches,
        }
    }

    pub fn cache(&self) -> &UsageCache {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Upsert every snapshot in list order, so the last entry for a key wins.
    ///
    /// A failing row does not stop the batch; it is reported in the returned
    /// [`IngestReport`]. The cache is invalidated once the batch is done.
    pub async fn ingest(&self, batch: &[UsageSnapshot]) -> IngestReport {
        let mut report = IngestReport::default();
        for snapshot in batch {
            self.apply(snapshot, &mut report).await;
        }
        self.finish(report)
    }

    /// Like [`ingest`](Self::ingest), for raw rows off the wire. Rows that do
    /// not convert into a snapshot are reported under their raw key.
    pub async fn ingest_rows(&self, rows: &[Value]) -> IngestReport {
        let mut report = IngestReport::default();
        for row in rows {
            match UsageSnapshot::from_row(row) {
                Ok(snapshot) => self.apply(&snapshot, &mut report).await,
                Err(e) => report.reject(row_key(row), e.to_string()),
            }
        }
        self.finish(report)
    }

    async fn apply(&self, snapshot: &UsageSnapshot, report: &mut IngestReport) {
        let result = match snapshot.validate() {
            Ok(()) => self.store.upsert(snapshot).await.map_err(|e| {
                if e.is_constraint_violation() {
                    format!("rejected by store: {e}")
                } else {
                    e.to_string()
                }
            }),
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => report.applied += 1,
            Err(reason) => report.reject(snapshot.key().to_string(), reason),
        }
    }

    fn finish(&self, report: IngestReport) -> IngestReport {
        tracing::info!(
            applied = report.applied,
            failed = report.failed.len(),
            "ingested snapshot batch"
        );
        self.cache.invalidate();
        self.batches.send_modify(|count| *count += 1);
        report
    }

    /// Ask the poller for a fetch cycle, give its push up to `grace` to be
    /// ingested, then invalidate the cache whether or not anything came in.
    ///
    /// Pushes reach the store through whoever listens on the bus, so this
    /// waits for a batch to finish ingesting rather than for the event itself.
    pub async fn manual_refresh(&self, poller: &dyn Poller, grace: Duration) -> RefreshOutcome {
        let mut batches = self.batches.subscribe();
        poller.trigger_refresh().await;

        let outcome = match tokio::time::timeout(grace, batches.changed()).await {
            Ok(Ok(())) => RefreshOutcome::Pushed,
            Ok(Err(_)) | Err(_) => RefreshOutcome::TimedOut,
        };
        tracing::debug!(?outcome, "manual refresh finished waiting");

        self.cache.invalidate();
        outcome
    }
}

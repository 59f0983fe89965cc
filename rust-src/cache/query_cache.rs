//! Per-window cache of derived usage views.
//!
//! Each window size owns one slot. A slot holds the last good view, the state
//! of its most recent fetch, and at most one in-flight fetch that every caller
//! for that window shares. Invalidation bumps the slot's generation; a fetch
//! only lands in the cache if its generation is still current, so a slow,
//! superseded read can never overwrite a fresher one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Days, Local, NaiveDate};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::aggregation::{daily_totals, model_totals, today_summary, DailyTotal, ModelTotal, TodaySummary};
use crate::models::UsageSnapshot;
use crate::storage::{SnapshotStore, StorageError};


/// How many times a caller follows a superseded fetch before settling for it.
const MAX_FOLLOW_UPS: usize = 3;


#[derive(Debug, Error, Clone)]
pub enum QueryError {
    #[error("usage fetch failed: {0}")]
    Storage(Arc<StorageError>),
}


/// Lifecycle of a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheState {
    Empty,
    Loading,
    Ready,
    Error,
}


impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Empty => "empty",
            CacheState::Loading => "loading",
            CacheState::Ready => "ready",
            CacheState::Error => "error",
        }
    }
}


/// First day included in a window of `window_days` ending on `today`.
///
/// Windows reaching past the calendar's start cover everything.
pub fn window_cutoff(today: NaiveDate, window_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(window_days)))
        .unwrap_or(NaiveDate::MIN)
}


/// Snapshots in a window plus the aggregates derived from them.
#[derive(Debug, Clone, Serialize)]
pub struct UsageView {
    pub window_days: u32,
    pub cutoff: NaiveDate,
    pub snapshots: Vec<UsageSnapshot>,
    pub daily_totals: Vec<DailyTotal>,
    pub model_totals: Vec<ModelTotal>,
}


impl UsageView {
    pub fn build(window_days: u32, cutoff: NaiveDate, snapshots: Vec<UsageSnapshot>) -> Self {
        Self {
            window_days,
            cutoff,
            daily_totals: daily_totals(&snapshots),
            model_totals: model_totals(&snapshots),
            snapshots,
        }
    }

    pub fn today(&self, today: NaiveDate) -> TodaySummary {
        today_summary(&self.snapshots, today)
    }
}


/// Non-blocking read of a slot, for renderers.
#[derive(Debug, Clone)]
pub struct UsageData {
    pub view: Option<Arc<UsageView>>,
    pub state: CacheState,
    pub is_loading: bool,
    pub error: Option<String>,
}


pub type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

type FetchResult = Result<Arc<UsageView>, QueryError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;


struct Slot {
    state: CacheState,
    generation: u64,
    view: Option<Arc<UsageView>>,
    view_generation: Option<u64>,
    error: Option<QueryError>,
    in_flight: Option<(u64, SharedFetch)>,
}


impl Default for Slot {
    fn default() -> Self {
        Self {
            state: CacheState::Empty,
            generation: 0,
            view: None,
            view_generation: None,
            error: None,
            in_flight: None,
        }
    }
}


impl Slot {
    fn fresh_view(&self) -> Option<Arc<UsageView>> {
        match (self.state, self.view_generation) {
            (CacheState::Ready, Some(generation)) if generation == self.generation => self.view.clone(),
            _ => None,
        }
    }
}


struct Inner {
    store: Arc<dyn SnapshotStore>,
    clock: Clock,
    slots: Mutex<HashMap<u32, Slot>>,
    fetches: AtomicU64,
}


/// Cached, de-duplicated access to usage views keyed by window size.
#[derive(Clone)]
pub struct UsageCache {
    inner: Arc<Inner>,
}


impl UsageCache {
    /// Cache whose "today" is the local calendar date.
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self::with_clock(store, Arc::new(|| Local::now().date_naive()))
    }

    pub fn with_clock(store: Arc<dyn SnapshotStore>, clock: Clock) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                clock,
                slots: Mutex::new(HashMap::new()),
                fetches: AtomicU64::new(0),
            }),
        }
    }

    pub fn today(&self) -> NaiveDate {
        (self.inner.clock)()
    }

    #[cfg(test)]
    fn fetch_count(&self) -> u64 {
        self.inner.fetches.load(Ordering::Relaxed)
    }

    /// Cached view for `window_days`, fetching it if missing or invalidated.
    ///
    /// Concurrent callers for the same window share one store read. If the
    /// window is invalidated while a caller waits, the caller follows the newer
    /// fetch instead of returning the superseded result.
    pub async fn get_usage(&self, window_days: u32) -> Result<Arc<UsageView>, QueryError> {
        let mut attempt = 0;
        loop {
            let (generation, fetch) = {
                let mut slots = self.inner.slots.lock();
                let slot = slots.entry(window_days).or_default();
                if let Some(view) = slot.fresh_view() {
                    return Ok(view);
                }
                self.join_or_start(window_days, slot)
            };

            let view = fetch.await?;
            attempt += 1;
            if attempt >= MAX_FOLLOW_UPS || self.is_current(window_days, generation) {
                return Ok(view);
            }
            tracing::debug!(window_days, generation, "fetch superseded, following newer one");
        }
    }

    /// Current slot contents without waiting.
    pub fn peek(&self, window_days: u32) -> UsageData {
        let slots = self.inner.slots.lock();
        match slots.get(&window_days) {
            Some(slot) => UsageData {
                view: slot.view.clone(),
                state: slot.state,
                is_loading: slot.in_flight.is_some(),
                error: slot.error.as_ref().map(|e| e.to_string()),
            },
            None => UsageData {
                view: None,
                state: CacheState::Empty,
                is_loading: false,
                error: None,
            },
        }
    }

    /// Mark every known window stale and start refetching it in the background.
    pub fn invalidate(&self) {
        let windows: Vec<u32> = self.inner.slots.lock().keys().copied().collect();
        for window_days in windows {
            self.invalidate_window(window_days);
        }
    }

    /// Mark one window stale and start refetching it in the background.
    pub fn invalidate_window(&self, window_days: u32) {
        let fetch = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(window_days).or_default();
            slot.generation += 1;
            let (_, fetch) = self.join_or_start(window_days, slot);
            fetch
        };
        tracing::debug!(window_days, "invalidated usage window");

        tokio::spawn(async move {
            // Errors are recorded on the slot
            let _ = fetch.await;
        });
    }

    /// Invalidate everything and wait until `window_days` has been re-derived.
    pub async fn refetch(&self, window_days: u32) -> Result<Arc<UsageView>, QueryError> {
        self.invalidate();
        self.get_usage(window_days).await
    }

    fn is_current(&self, window_days: u32, generation: u64) -> bool {
        self.inner
            .slots
            .lock()
            .get(&window_days)
            .map_or(false, |slot| slot.generation == generation)
    }

    fn join_or_start(&self, window_days: u32, slot: &mut Slot) -> (u64, SharedFetch) {
        if let Some((generation, fetch)) = &slot.in_flight {
            if *generation == slot.generation {
                return (*generation, fetch.clone());
            }
        }

        let generation = slot.generation;
        let fetch = Self::fetch(Arc::clone(&self.inner), window_days, generation);
        slot.in_flight = Some((generation, fetch.clone()));
        slot.state = CacheState::Loading;
        (generation, fetch)
    }

    fn fetch(inner: Arc<Inner>, window_days: u32, generation: u64) -> SharedFetch {
        async move {
            let fetch = inner.fetches.fetch_add(1, Ordering::Relaxed) + 1;
            let cutoff = window_cutoff((inner.clock)(), window_days);
            tracing::debug!(window_days, generation, fetch, %cutoff, "fetching usage window");

            let result = inner
                .store
                .select_since(cutoff)
                .await
                .map(|snapshots| Arc::new(UsageView::build(window_days, cutoff, snapshots)))
                .map_err(|e| QueryError::Storage(Arc::new(e)));

            commit(&inner, window_days, generation, &result);
            result
        }
        .boxed()
        .shared()
    }
}


fn commit(inner: &Inner, window_days: u32, generation: u64, result: &FetchResult) {
    let mut slots = inner.slots.lock();
    let slot = slots.entry(window_days).or_default();

    if matches!(&slot.in_flight, Some((g, _)) if *g == generation) {
        slot.in_flight = None;
    }
    if generation != slot.generation {
        tracing::debug!(window_days, generation, "discarding superseded fetch");
        return;
    }

    match result {
        Ok(view) => {
            slot.view = Some(Arc::clone(view));
            slot.view_generation = Some(generation);
            slot.error = None;
            slot.state = CacheState::Ready;
            tracing::debug!(window_days, rows = view.snapshots.len(), "usage window ready");
        }
        Err(e) => {
            tracing::warn!(window_days, error = %e, "usage fetch failed");
            slot.error = Some(e.clone());
            slot.state = CacheState::Error;
        }
    }
}

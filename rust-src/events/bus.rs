//! Broadcast bus for inbound usage signals.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::UsageSnapshot;


/// Signals consumed by the ingestion and cache layers.
///
/// On the wire these are JSON objects tagged by `event`:
/// `{"event":"new-snapshots","payload":[...]}` or `{"event":"usage-updated"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum UsageEvent {
    /// Ordered batch pushed by the poller. Rows stay raw JSON so one
    /// malformed row is rejected on its own during ingestion.
    NewSnapshots(Vec<Value>),
    /// Store contents may have changed; re-derive everything.
    UsageUpdated,
}


impl UsageEvent {
    #[cfg(test)]
    pub fn new_snapshots(batch: &[UsageSnapshot]) -> Self {
        Self::NewSnapshots(batch.iter().filter_map(|s| serde_json::to_value(s).ok()).collect())
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NewSnapshots(_) => "new-snapshots",
            Self::UsageUpdated => "usage-updated",
        }
    }

    /// Parse one JSON line of the inbound event stream.
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}


/// Fan-out channel for [`UsageEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<UsageEvent>,
}


impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns how many subscribers will see it.
    pub fn publish(&self, event: UsageEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Receive all events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `handler` for every event, one at a time, until the returned handle
    /// is dropped or unsubscribed.
    ///
    /// The subscription is taken before this returns, so nothing published
    /// afterwards is missed.
    pub fn listen<F, Fut>(&self, name: &'static str, mut handler: F) -> ListenerHandle
    where
        F: FnMut(UsageEvent) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        tracing::trace!(listener = name, event = event.event_type(), "dispatching event");
                        handler(event).await
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(listener = name, skipped, "listener lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!(listener = name, "listener stopped");
        });

        ListenerHandle { name, task: Some(task) }
    }
}


impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::config::EVENT_BUS_CAPACITY)
    }
}


/// Registration returned by [`EventBus::listen`]. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ListenerHandle {
    name: &'static str,
    task: Option<JoinHandle<()>>,
}


impl ListenerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the listener and wait until its subscription is released.
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}


impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

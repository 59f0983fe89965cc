//! Application settings and path constants.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::storage::{StorageError, Store};


/// Default poll interval handed to the poller (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Default trailing window for usage queries.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// How long a manual refresh waits for the poller's push before refetching anyway.
pub const REFRESH_GRACE: Duration = Duration::from_secs(1);

/// Buffered events per subscriber before slow listeners start lagging.
pub const EVENT_BUS_CAPACITY: usize = 64;

pub const ANTHROPIC_KEY: &str = "anthropic_key";
pub const OPENAI_KEY: &str = "openai_key";
pub const POLL_INTERVAL_SECS: &str = "poll_interval_secs";
pub const ALERT_DAILY_USD: &str = "alert_daily_usd";
pub const ALERT_MONTHLY_USD: &str = "alert_monthly_usd";
/// Set to `off` to stop alert notifications without clearing the threshold.
pub const NOTIFICATIONS: &str = "notifications";


/// Get the database path.
pub fn get_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("token-tracker")
        .join("token_tracker.db")
}


/// Read every persisted setting.
pub async fn get_settings(store: &Store) -> Result<HashMap<String, String>, StorageError> {
    store.all_settings().await
}


/// Persist the non-empty entries of `settings`. Blank values are skipped so a
/// partial form never wipes a value saved earlier.
pub async fn save_settings(
    store: &Store,
    settings: &HashMap<String, String>,
) -> Result<usize, StorageError> {
    let mut written = 0;
    for (key, value) in settings {
        if value.is_empty() {
            continue;
        }
        store.put_setting(key, value).await?;
        written += 1;
    }
    Ok(written)
}


/// Session configuration. Loaded once at startup and changed only through `save`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    pub anthropic_key: String,
    pub openai_key: String,
    pub poll_interval_secs: String,
    pub alert_daily_usd: String,
    pub alert_monthly_usd: String,
    /// Keys this crate does not interpret, passed through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            anthropic_key: String::new(),
            openai_key: String::new(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS.to_string(),
            alert_daily_usd: String::new(),
            alert_monthly_usd: String::new(),
            extra: BTreeMap::new(),
        }
    }
}


impl Settings {
    /// Load from the store, falling back to defaults if the read fails.
    pub async fn load(store: &Store) -> Self {
        match get_settings(store).await {
            Ok(map) => Self::from_map(map),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load settings, using defaults");
                Self::default()
            }
        }
    }

    /// Merge `updates` into this value, then persist the non-empty fields.
    pub async fn save(
        &mut self,
        store: &Store,
        updates: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        for (key, value) in updates {
            self.set(key, value);
        }
        let written = save_settings(store, &self.to_map()).await?;
        tracing::debug!(written, "saved settings");
        Ok(())
    }

    pub fn from_map(map: HashMap<String, String>) -> Self {
        let mut settings = Self::default();
        for (key, value) in map {
            settings.set(key, value);
        }
        settings
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = self.extra.clone().into_iter().collect();
        map.insert(ANTHROPIC_KEY.to_string(), self.anthropic_key.clone());
        map.insert(OPENAI_KEY.to_string(), self.openai_key.clone());
        map.insert(POLL_INTERVAL_SECS.to_string(), self.poll_interval_secs.clone());
        map.insert(ALERT_DAILY_USD.to_string(), self.alert_daily_usd.clone());
        map.insert(ALERT_MONTHLY_USD.to_string(), self.alert_monthly_usd.clone());
        map
    }

    fn set(&mut self, key: String, value: String) {
        match key.as_str() {
            ANTHROPIC_KEY => self.anthropic_key = value,
            OPENAI_KEY => self.openai_key = value,
            POLL_INTERVAL_SECS => self.poll_interval_secs = value,
            ALERT_DAILY_USD => self.alert_daily_usd = value,
            ALERT_MONTHLY_USD => self.alert_monthly_usd = value,
            _ => {
                self.extra.insert(key, value);
            }
        }
    }

    /// Poll interval, falling back to the default when unset or not a positive integer.
    pub fn poll_interval(&self) -> Duration {
        let secs = self
            .poll_interval_secs
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
        Duration::from_secs(secs)
    }

    /// Daily alert threshold in USD. `None` means alerting is disabled.
    pub fn daily_threshold(&self) -> Option<f64> {
        parse_threshold(&self.alert_daily_usd)
    }

    pub fn monthly_threshold(&self) -> Option<f64> {
        parse_threshold(&self.alert_monthly_usd)
    }

    pub fn notifications_enabled(&self) -> bool {
        !matches!(
            self.extra.get(NOTIFICATIONS).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("off" | "false" | "0" | "no")
        )
    }

    /// The stored key for each provider, if configured.
    pub fn provider_keys(&self) -> Vec<(&'static str, &str)> {
        [(ANTHROPIC_KEY, &self.anthropic_key), (OPENAI_KEY, &self.openai_key)]
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| (key, value.as_str()))
            .collect()
    }
}


fn parse_threshold(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|threshold| threshold.is_finite() && *threshold > 0.0)
}


/// Hide all but the last four characters of a secret.
pub fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        return "(not set)".to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(8), tail)
}

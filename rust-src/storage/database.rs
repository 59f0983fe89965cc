//! SQLite persistence for usage snapshots and settings.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::models::{format_date, parse_date, Provider, UsageSnapshot};


/// Errors raised by the persistent store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open database {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("store is closed")]
    Closed,
}


impl StorageError {
    /// True when SQLite rejected the row itself (CHECK, NOT NULL, UNIQUE).
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}


const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS usage_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    provider TEXT NOT NULL,
    model TEXT NOT NULL,
    date TEXT NOT NULL,
    input_tokens INTEGER NOT NULL DEFAULT 0 CHECK (input_tokens >= 0),
    output_tokens INTEGER NOT NULL DEFAULT 0 CHECK (output_tokens >= 0),
    cache_tokens INTEGER NOT NULL DEFAULT 0 CHECK (cache_tokens >= 0),
    cost_usd REAL NOT NULL DEFAULT 0 CHECK (cost_usd >= 0),
    fetched_at TEXT NOT NULL,
    UNIQUE(provider, model, date)
);

CREATE INDEX IF NOT EXISTS idx_usage_snapshots_date ON usage_snapshots(date);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const UPSERT_SQL: &str = "
INSERT INTO usage_snapshots (
    provider, model, date, input_tokens, output_tokens, cache_tokens, cost_usd, fetched_at
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(provider, model, date) DO UPDATE SET
    input_tokens = excluded.input_tokens,
    output_tokens = excluded.output_tokens,
    cache_tokens = excluded.cache_tokens,
    cost_usd = excluded.cost_usd,
    fetched_at = excluded.fetched_at";


/// Read/write access to snapshot rows.
///
/// The cache and ingestion layers only see this trait, so tests can swap in
/// an instrumented store.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert the snapshot, or overwrite the counters of the existing row with
    /// the same (provider, model, date).
    async fn upsert(&self, snapshot: &UsageSnapshot) -> Result<(), StorageError>;

    /// All snapshots dated on or after `cutoff`, ascending by date.
    async fn select_since(&self, cutoff: NaiveDate) -> Result<Vec<UsageSnapshot>, StorageError>;
}


/// Summary of what the store holds.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total_rows: i64,
    pub total_days: i64,
    pub oldest_date: Option<String>,
    pub newest_date: Option<String>,
    pub cost_by_provider: BTreeMap<String, f64>,
    pub total_cost: f64,
}


/// Handle to the SQLite database.
///
/// Cloning shares the underlying connection. Calls run on the blocking pool so
/// every operation is a suspension point for the caller.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}


impl Store {
    /// Open (creating if needed) the database at `db_path` and ensure the schema.
    pub async fn open(db_path: &Path) -> Result<Self, StorageError> {
        let path = db_path.to_path_buf();
        let conn = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || open_connection(&path)).await??
        };

        let store = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path),
        };
        store.ensure_schema().await?;
        tracing::debug!(path = %db_path.display(), "opened usage store");
        Ok(store)
    }

    /// Open a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the connection. Idempotent; later operations fail with `Closed`.
    pub async fn close(&self) -> Result<(), StorageError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let taken = conn.lock().take();
            match taken {
                Some(conn) => conn.close().map_err(|(_, e)| StorageError::from(e)),
                None => Ok(()),
            }
        })
        .await?
    }

    /// Create tables and indexes if absent. Safe on every start.
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.with_conn(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            Ok(())
        })
        .await
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM settings WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
        .await
    }

    pub async fn put_setting(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let (key, value) = (key.to_string(), value.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn all_settings(&self) -> Result<HashMap<String, String>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            let map = rows.collect::<Result<HashMap<String, String>, _>>()?;
            Ok(map)
        })
        .await
    }

    /// Row counts, date range and cost totals over the whole table.
    pub async fn stats(&self) -> Result<StoreStats, StorageError> {
        self.with_conn(|conn| {
            let (total_rows, total_days, oldest_date, newest_date, total_cost): (
                i64,
                i64,
                Option<String>,
                Option<String>,
                f64,
            ) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT date), MIN(date), MAX(date),
                        COALESCE(SUM(cost_usd), 0)
                 FROM usage_snapshots",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )?;

            let mut cost_by_provider = BTreeMap::new();
            let mut stmt = conn.prepare(
                "SELECT provider, SUM(cost_usd) FROM usage_snapshots GROUP BY provider",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?;
            for row in rows {
                let (provider, cost) = row?;
                cost_by_provider.insert(provider, cost);
            }

            Ok(StoreStats {
                total_rows,
                total_days,
                oldest_date,
                newest_date,
                cost_by_provider,
                total_cost,
            })
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard.as_mut().ok_or(StorageError::Closed)?;
            f(conn)
        })
        .await?
    }
}


#[async_trait]
impl SnapshotStore for Store {
    async fn upsert(&self, snapshot: &UsageSnapshot) -> Result<(), StorageError> {
        let snapshot = snapshot.clone();
        self.with_conn(move |conn| {
            conn.execute(
                UPSERT_SQL,
                params![
                    snapshot.provider.as_str(),
                    snapshot.model,
                    snapshot.date_key(),
                    snapshot.input_tokens,
                    snapshot.output_tokens,
                    snapshot.cache_tokens,
                    snapshot.cost_usd,
                    snapshot.fetched_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn select_since(&self, cutoff: NaiveDate) -> Result<Vec<UsageSnapshot>, StorageError> {
        let cutoff = format_date(cutoff);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, provider, model, date, input_tokens, output_tokens,
                        cache_tokens, cost_usd, fetched_at
                 FROM usage_snapshots
                 WHERE date >= ?1
                 ORDER BY date ASC, id ASC",
            )?;
            let snapshots = stmt
                .query_map(params![cutoff], snapshot_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(snapshots)
        })
        .await
    }
}


fn open_connection(db_path: &Path) -> Result<Connection, StorageError> {
    // Create parent directory if needed
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path).map_err(|source| StorageError::Open {
        path: db_path.to_path_buf(),
        source,
    })?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}


fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<UsageSnapshot> {
    let provider: String = row.get(1)?;
    let provider = provider
        .parse::<Provider>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    let date: String = row.get(3)?;
    let date = parse_date(&date)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;

    let fetched_at: String = row.get(8)?;
    let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(UsageSnapshot {
        id: Some(row.get(0)?),
        provider,
        model: row.get(2)?,
        date,
        input_tokens: row.get(4)?,
        output_tokens: row.get(5)?,
        cache_tokens: row.get(6)?,
        cost_usd: row.get(7)?,
        fetched_at,
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn snapshot(provider: Provider, model: &str, date: &str, cost: f64) -> UsageSnapshot {
        UsageSnapshot::new(provider, model, day(date))
            .with_tokens(100, 200, 10)
            .with_cost(cost)
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("nested").join("test.db");

        let store = Store::open(&db_path).await.unwrap();
        store.ensure_schema().await.unwrap();
        store.ensure_schema().await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_upsert_same_key_keeps_one_row_with_latest_values() {
        let store = Store::open_in_memory().await.unwrap();

        store.upsert(&snapshot(Provider::Anthropic, "claude", "2024-01-01", 1.0)).await.unwrap();
        store.upsert(&snapshot(Provider::Anthropic, "claude", "2024-01-01", 4.5)).await.unwrap();

        let rows = store.select_since(day("2024-01-01")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].cost_usd, 4.5);
        assert!(rows[0].id.is_some());
    }

    #[tokio::test]
    async fn test_upsert_preserves_row_identity() {
        let store = Store::open_in_memory().await.unwrap();

        store.upsert(&snapshot(Provider::OpenAi, "gpt-4o", "2024-01-01", 1.0)).await.unwrap();
        let first_id = store.select_since(day("2024-01-01")).await.unwrap()[0].id;

        store.upsert(&snapshot(Provider::OpenAi, "gpt-4o", "2024-01-01", 2.0)).await.unwrap();
        let rows = store.select_since(day("2024-01-01")).await.unwrap();
        assert_eq!(rows[0].id, first_id);
    }

    #[tokio::test]
    async fn test_select_since_includes_cutoff_day() {
        let store = Store::open_in_memory().await.unwrap();
        for date in ["2024-01-03", "2024-01-01", "2024-01-02"] {
            store.upsert(&snapshot(Provider::Anthropic, "claude", date, 1.0)).await.unwrap();
        }

        let rows = store.select_since(day("2024-01-02")).await.unwrap();
        let dates: Vec<String> = rows.iter().map(|s| s.date_key()).collect();
        assert_eq!(dates, vec!["2024-01-02", "2024-01-03"]);
    }

    #[tokio::test]
    async fn test_negative_counter_is_constraint_violation() {
        let store = Store::open_in_memory().await.unwrap();
        let bad = snapshot(Provider::Anthropic, "claude", "2024-01-01", 1.0).with_tokens(-1, 0, 0);

        let err = store.upsert(&bad).await.unwrap_err();
        assert!(err.is_constraint_violation(), "unexpected error: {err}");
        assert!(store.select_since(day("2000-01-01")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_settings_put_is_upsert() {
        let store = Store::open_in_memory().await.unwrap();

        assert_eq!(store.get_setting("alert_daily_usd").await.unwrap(), None);
        store.put_setting("alert_daily_usd", "5").await.unwrap();
        store.put_setting("alert_daily_usd", "10.00").await.unwrap();

        assert_eq!(
            store.get_setting("alert_daily_usd").await.unwrap().as_deref(),
            Some("10.00")
        );
        assert_eq!(store.all_settings().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_rejects_operations() {
        let store = Store::open_in_memory().await.unwrap();
        store.close().await.unwrap();
        store.close().await.unwrap();

        let err = store.select_since(day("2024-01-01")).await.unwrap_err();
        assert!(matches!(err, StorageError::Closed));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let tmp_dir = TempDir::new().unwrap();
        let db_path = tmp_dir.path().join("test.db");

        let store = Store::open(&db_path).await.unwrap();
        store.upsert(&snapshot(Provider::OpenAi, "gpt-4o", "2024-02-01", 3.25)).await.unwrap();
        store.close().await.unwrap();

        let reopened = Store::open(&db_path).await.unwrap();
        let rows = reopened.select_since(day("2024-01-01")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model, "gpt-4o");
        assert_eq!(rows[0].provider, Provider::OpenAi);
    }

    #[tokio::test]
    async fn test_stats() {
        let store = Store::open_in_memory().await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_rows, 0);

        store.upsert(&snapshot(Provider::Anthropic, "claude", "2024-01-01", 1.0)).await.unwrap();
        store.upsert(&snapshot(Provider::OpenAi, "gpt-4o", "2024-01-01", 2.0)).await.unwrap();
        store.upsert(&snapshot(Provider::OpenAi, "gpt-4o", "2024-01-03", 0.5)).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.total_days, 2);
        assert_eq!(stats.oldest_date.as_deref(), Some("2024-01-01"));
        assert_eq!(stats.newest_date.as_deref(), Some("2024-01-03"));
        assert!((stats.total_cost - 3.5).abs() < 1e-9);
        assert!((stats.cost_by_provider["openai"] - 2.5).abs() < 1e-9);
    }
}

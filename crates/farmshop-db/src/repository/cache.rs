//! # Local Cache Repository
//!
//! Last known snapshot of each table, for offline and local-mode reads.
//!
//! ## Storage Layout
//! ```text
//! cache_entries
//! ┌────────────┬──────────────────────────────┬──────────────────────────┐
//! │ table_key  │ data (JSON array of records) │ cached_at                │
//! ├────────────┼──────────────────────────────┼──────────────────────────┤
//! │ orders     │ [{"id":"o-1",...},...]       │ 2026-10-19T08:00:00Z     │
//! │ customers  │ [...]                        │ 2026-10-19T07:55:12Z     │
//! └────────────┴──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! One row per table; every write replaces the whole snapshot.
//!
//! ## Write Serialisation
//! Writes to the same table key are serialised through a per-table async
//! lock, so a read-modify-write ([`CacheRepository::update`]) never
//! interleaves with another write to that table. Writes to different tables
//! proceed independently.

use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use farmshop_core::record::apply_operation;
use farmshop_core::{CacheEntry, Operation, Record};

use crate::error::{DbError, DbResult};
use crate::pool::Database;

// =============================================================================
// Per-table locks
// =============================================================================

/// Registry of one async mutex per table key.
#[derive(Debug, Clone, Default)]
pub struct TableLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TableLocks {
    /// Acquires the lock for `table`, creating it on first use.
    pub async fn lock(&self, table: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            map.entry(table.to_string()).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for cached table snapshots.
#[derive(Debug, Clone)]
pub struct CacheRepository {
    db: Database,
    locks: TableLocks,
}

impl CacheRepository {
    /// Creates a new CacheRepository.
    pub fn new(db: Database, locks: TableLocks) -> Self {
        CacheRepository { db, locks }
    }

    /// Replaces the snapshot for `table`, timestamped now.
    pub async fn set(&self, table: &str, data: &[Record]) -> DbResult<()> {
        self.set_at(table, data, Utc::now()).await
    }

    /// Replaces the snapshot for `table` with an explicit timestamp.
    pub async fn set_at(
        &self,
        table: &str,
        data: &[Record],
        timestamp: DateTime<Utc>,
    ) -> DbResult<()> {
        let _guard = self.locks.lock(table).await;
        self.write_locked(table, data, timestamp).await
    }

    /// Returns the cached rows, or `None` if the table was never cached.
    pub async fn get(&self, table: &str) -> DbResult<Option<Vec<Record>>> {
        Ok(self.get_entry(table).await?.map(|entry| entry.data))
    }

    /// Returns the full cache entry, or `None` if the table was never cached.
    pub async fn get_entry(&self, table: &str) -> DbResult<Option<CacheEntry>> {
        let pool = self.db.pool().await?;

        let row = sqlx::query("SELECT data, cached_at FROM cache_entries WHERE table_key = ?1")
            .bind(table)
            .fetch_optional(pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("data")?;
        let timestamp: DateTime<Utc> = row.try_get("cached_at")?;
        let data: Vec<Record> = serde_json::from_str(&raw)
            .map_err(|e| DbError::corrupted(format!("cache entry '{}'", table), e))?;

        Ok(Some(CacheEntry {
            key: table.to_string(),
            data,
            timestamp,
        }))
    }

    /// True iff an entry exists and is strictly younger than `max_age`.
    pub async fn is_valid(&self, table: &str, max_age: Duration) -> DbResult<bool> {
        let Some(entry) = self.get_entry(table).await? else {
            return Ok(false);
        };

        // A timestamp in the future counts as age zero.
        let age = (Utc::now() - entry.timestamp)
            .to_std()
            .unwrap_or(Duration::ZERO);

        Ok(age < max_age)
    }

    /// Read-modify-write of a table snapshot under the table's lock.
    ///
    /// A missing entry starts as an empty table. The existing timestamp is
    /// kept so freshness still reflects the last full snapshot.
    pub async fn update<F, R>(&self, table: &str, f: F) -> DbResult<R>
    where
        F: FnOnce(&mut Vec<Record>) -> R,
    {
        let _guard = self.locks.lock(table).await;

        let (mut rows, timestamp) = match self.get_entry(table).await? {
            Some(entry) => (entry.data, entry.timestamp),
            None => (Vec::new(), Utc::now()),
        };

        let result = f(&mut rows);
        self.write_locked(table, &rows, timestamp).await?;
        Ok(result)
    }

    /// Applies an insert/update/delete to the cached snapshot.
    pub async fn apply(&self, table: &str, operation: Operation, payload: &Record) -> DbResult<bool> {
        let changed = self
            .update(table, |rows| apply_operation(rows, operation, payload))
            .await?;

        debug!(table = %table, operation = %operation, changed, "Applied write to cache");
        Ok(changed)
    }

    /// Deletes the entry for one table. Returns true if it existed.
    pub async fn clear(&self, table: &str) -> DbResult<bool> {
        let _guard = self.locks.lock(table).await;
        let pool = self.db.pool().await?;

        let result = sqlx::query("DELETE FROM cache_entries WHERE table_key = ?1")
            .bind(table)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every entry. Returns the number removed.
    pub async fn clear_all(&self) -> DbResult<u64> {
        let pool = self.db.pool().await?;

        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(pool)
            .await?;

        debug!(removed = result.rows_affected(), "Cleared local cache");
        Ok(result.rows_affected())
    }

    /// Lists the cached table keys.
    pub async fn tables(&self) -> DbResult<Vec<String>> {
        let pool = self.db.pool().await?;

        let keys: Vec<String> =
            sqlx::query_scalar("SELECT table_key FROM cache_entries ORDER BY table_key")
                .fetch_all(pool)
                .await?;

        Ok(keys)
    }

    /// Upsert; caller must hold the table lock.
    async fn write_locked(
        &self,
        table: &str,
        data: &[Record],
        timestamp: DateTime<Utc>,
    ) -> DbResult<()> {
        let pool = self.db.pool().await?;
        let raw = serde_json::to_string(data)?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (table_key, data, cached_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(table_key) DO UPDATE SET
                data = excluded.data,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(table)
        .bind(raw)
        .bind(timestamp)
        .execute(pool)
        .await?;

        debug!(table = %table, rows = data.len(), "Cache snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> Vec<Record> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn repo() -> CacheRepository {
        Database::new(DbConfig::in_memory()).cache()
    }

    #[tokio::test]
    async fn test_set_then_get_returns_same_rows() {
        let cache = repo();
        let data = rows(json!([{ "id": "o-1", "total": 1250 }, { "id": "o-2" }]));

        cache.set("orders", &data).await.unwrap();

        assert_eq!(cache.get("orders").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_never_cached_table_is_absent_and_invalid() {
        let cache = repo();

        assert_eq!(cache.get("customers").await.unwrap(), None);
        assert!(!cache.is_valid("customers", Duration::from_secs(3600)).await.unwrap());
        assert!(!cache.is_valid("customers", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_overwrites_whole_entry() {
        let cache = repo();
        cache.set("orders", &rows(json!([{ "id": 1 }, { "id": 2 }]))).await.unwrap();
        cache.set("orders", &rows(json!([{ "id": 3 }]))).await.unwrap();

        let data = cache.get("orders").await.unwrap().unwrap();
        assert_eq!(data, rows(json!([{ "id": 3 }])));
        assert_eq!(cache.tables().await.unwrap(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_is_valid_respects_max_age() {
        let cache = repo();
        let stale = Utc::now() - chrono::Duration::seconds(120);
        cache.set_at("orders", &[], stale).await.unwrap();

        assert!(cache.is_valid("orders", Duration::from_secs(300)).await.unwrap());
        assert!(!cache.is_valid("orders", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_write_through() {
        let cache = repo();
        let order = json!({ "id": "o-1", "status": "new" }).as_object().cloned().unwrap();

        cache.apply("orders", Operation::Insert, &order).await.unwrap();
        let patch = json!({ "id": "o-1", "status": "packed" }).as_object().cloned().unwrap();
        cache.apply("orders", Operation::Update, &patch).await.unwrap();

        let data = cache.get("orders").await.unwrap().unwrap();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["status"], json!("packed"));

        cache.apply("orders", Operation::Delete, &patch).await.unwrap();
        assert_eq!(cache.get("orders").await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_concurrent_updates_do_not_lose_writes() {
        let cache = repo();
        cache.set("orders", &[]).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let row = json!({ "id": i }).as_object().cloned().unwrap();
                cache.apply("orders", Operation::Insert, &row).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.get("orders").await.unwrap().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_clear_and_clear_all() {
        let cache = repo();
        cache.set("orders", &[]).await.unwrap();
        cache.set("customers", &[]).await.unwrap();

        assert!(cache.clear("orders").await.unwrap());
        assert!(!cache.clear("orders").await.unwrap());
        assert_eq!(cache.get("orders").await.unwrap(), None);

        assert_eq!(cache.clear_all().await.unwrap(), 1);
        assert_eq!(cache.get("customers").await.unwrap(), None);
    }
}

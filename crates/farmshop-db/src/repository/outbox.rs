//! # Offline Outbox Repository
//!
//! Durable FIFO of writes recorded while the backend was unreachable.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Lifecycle                                     │
//! │                                                                         │
//! │  WRITE WHILE UNREACHABLE                                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  enqueue(table, op, payload) ──► INSERT sync_outbox (id AUTOINCREMENT)  │
//! │                                                                         │
//! │  DRAIN (owned by the caller)                                           │
//! │       │                                                                 │
//! │       ├── list_pending()          ORDER BY id ASC  (strict FIFO)        │
//! │       ├── replay OK   ──► remove(id)        (no-op if already gone)     │
//! │       ├── replay FAIL ──► record_failure(id, error, next_attempt_at)    │
//! │       └── give up     ──► move_to_dead_letter(id, reason)              │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • ids are monotonic, never reused: id order == enqueue order          │
//! │  • items are never mutated except retry bookkeeping                    │
//! │  • storage failures surface as DbError, never swallowed                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::{debug, info, warn};

use farmshop_core::{DeadLetter, Operation, OutboxItem, Record};

use crate::error::{DbError, DbResult};
use crate::pool::Database;

/// Raw `sync_outbox` row.
#[derive(Debug, FromRow)]
struct OutboxRow {
    id: i64,
    table_name: String,
    operation: String,
    payload: String,
    created_at: DateTime<Utc>,
    retry_count: i64,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxItem {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> DbResult<Self> {
        let what = format!("outbox item {}", row.id);
        let operation: Operation = row
            .operation
            .parse()
            .map_err(|e| DbError::corrupted(&what, e))?;
        let payload: Record =
            serde_json::from_str(&row.payload).map_err(|e| DbError::corrupted(&what, e))?;

        Ok(OutboxItem {
            id: row.id,
            table: row.table_name,
            operation,
            payload,
            timestamp: row.created_at,
            retry_count: u32::try_from(row.retry_count).unwrap_or(u32::MAX),
            last_error: row.last_error,
            next_attempt_at: row.next_attempt_at,
        })
    }
}

/// Raw `sync_dead_letter` row.
#[derive(Debug, FromRow)]
struct DeadLetterRow {
    id: i64,
    table_name: String,
    operation: String,
    payload: String,
    created_at: DateTime<Utc>,
    retry_count: i64,
    last_error: Option<String>,
    reason: String,
    dead_at: DateTime<Utc>,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = DbError;

    fn try_from(row: DeadLetterRow) -> DbResult<Self> {
        let item = OutboxItem::try_from(OutboxRow {
            id: row.id,
            table_name: row.table_name,
            operation: row.operation,
            payload: row.payload,
            created_at: row.created_at,
            retry_count: row.retry_count,
            last_error: row.last_error,
            next_attempt_at: None,
        })?;

        Ok(DeadLetter {
            item,
            reason: row.reason,
            dead_at: row.dead_at,
        })
    }
}

/// Repository for the offline outbox.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    db: Database,
}

impl OutboxRepository {
    /// Creates a new OutboxRepository.
    pub fn new(db: Database) -> Self {
        OutboxRepository { db }
    }

    /// Appends a write with `retry_count = 0`; returns its id.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let id = db.outbox().enqueue("orders", Operation::Insert, &order).await?;
    /// ```
    pub async fn enqueue(&self, table: &str, operation: Operation, payload: &Record) -> DbResult<i64> {
        let pool = self.db.pool().await?;
        let raw = serde_json::to_string(payload)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sync_outbox (table_name, operation, payload, created_at, retry_count)
            VALUES (?1, ?2, ?3, ?4, 0)
            "#,
        )
        .bind(table)
        .bind(operation.as_str())
        .bind(raw)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, table = %table, operation = %operation, "Queued write in outbox");
        Ok(id)
    }

    /// All pending items in enqueue order.
    pub async fn list_pending(&self) -> DbResult<Vec<OutboxItem>> {
        let pool = self.db.pool().await?;

        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, table_name, operation, payload, created_at,
                   retry_count, last_error, next_attempt_at
            FROM sync_outbox
            ORDER BY id ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(OutboxItem::try_from).collect()
    }

    /// Fetches one pending item.
    pub async fn get(&self, id: i64) -> DbResult<Option<OutboxItem>> {
        let pool = self.db.pool().await?;

        let row: Option<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, table_name, operation, payload, created_at,
                   retry_count, last_error, next_attempt_at
            FROM sync_outbox
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        row.map(OutboxItem::try_from).transpose()
    }

    /// Deletes an item. Missing ids are a no-op.
    ///
    /// Returns true if a row was removed.
    pub async fn remove(&self, id: i64) -> DbResult<bool> {
        let pool = self.db.pool().await?;

        let result = sqlx::query("DELETE FROM sync_outbox WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if !removed {
            debug!(id, "Outbox item already removed");
        }
        Ok(removed)
    }

    /// Records a failed replay: bumps `retry_count` and schedules the next try.
    pub async fn record_failure(
        &self,
        id: i64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        let pool = self.db.pool().await?;

        sqlx::query(
            r#"
            UPDATE sync_outbox SET
                retry_count = retry_count + 1,
                last_error = ?2,
                next_attempt_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Moves an item to the dead-letter set in one transaction.
    ///
    /// Returns false if the item no longer exists.
    pub async fn move_to_dead_letter(&self, id: i64, reason: &str) -> DbResult<bool> {
        let pool = self.db.pool().await?;
        let mut tx = pool.begin().await?;

        let copied = sqlx::query(
            r#"
            INSERT INTO sync_dead_letter (
                id, table_name, operation, payload, created_at,
                retry_count, last_error, reason, dead_at
            )
            SELECT id, table_name, operation, payload, created_at,
                   retry_count, last_error, ?2, ?3
            FROM sync_outbox
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM sync_outbox WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let moved = copied.rows_affected() > 0;
        if moved {
            warn!(id, reason = %reason, "Outbox item moved to dead letter");
        }
        Ok(moved)
    }

    /// All dead letters, oldest first.
    pub async fn list_dead_letters(&self) -> DbResult<Vec<DeadLetter>> {
        let pool = self.db.pool().await?;

        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            r#"
            SELECT id, table_name, operation, payload, created_at,
                   retry_count, last_error, reason, dead_at
            FROM sync_dead_letter
            ORDER BY id ASC
            "#,
        )
        .fetch_all(pool)
        .await?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    /// Re-enqueues a dead letter at the end of the outbox with a fresh id.
    ///
    /// Returns the new outbox id, or `None` if the dead letter doesn't exist.
    pub async fn requeue_dead_letter(&self, id: i64) -> DbResult<Option<i64>> {
        let pool = self.db.pool().await?;
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO sync_outbox (table_name, operation, payload, created_at, retry_count)
            SELECT table_name, operation, payload, ?2, 0
            FROM sync_dead_letter
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let new_id = inserted.last_insert_rowid();

        sqlx::query("DELETE FROM sync_dead_letter WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(dead_letter_id = id, outbox_id = new_id, "Dead letter requeued");
        Ok(Some(new_id))
    }

    /// Deletes every dead letter. Returns the number removed.
    pub async fn purge_dead_letters(&self) -> DbResult<u64> {
        let pool = self.db.pool().await?;

        let result = sqlx::query("DELETE FROM sync_dead_letter")
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Counts pending items.
    pub async fn count_pending(&self) -> DbResult<i64> {
        let pool = self.db.pool().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_outbox")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }

    /// Counts dead letters.
    pub async fn count_dead_letters(&self) -> DbResult<i64> {
        let pool = self.db.pool().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_dead_letter")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn repo() -> OutboxRepository {
        Database::new(DbConfig::in_memory()).outbox()
    }

    #[tokio::test]
    async fn test_enqueue_preserves_order_with_increasing_ids() {
        let outbox = repo();
        let ops = [Operation::Insert, Operation::Update, Operation::Delete];

        let mut ids = Vec::new();
        for op in ops {
            ids.push(outbox.enqueue("orders", op, &record(json!({ "id": "o-1" }))).await.unwrap());
        }

        let pending = outbox.list_pending().await.unwrap();
        assert_eq!(pending.iter().map(|i| i.id).collect::<Vec<_>>(), ids);
        assert_eq!(pending.iter().map(|i| i.operation).collect::<Vec<_>>(), ops);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(pending.iter().all(|i| i.retry_count == 0));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let outbox = repo();
        let id = outbox.enqueue("orders", Operation::Insert, &Record::new()).await.unwrap();

        assert!(outbox.remove(id).await.unwrap());
        assert!(!outbox.remove(id).await.unwrap());
        assert!(!outbox.remove(9999).await.unwrap());
        assert_eq!(outbox.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused_after_remove() {
        let outbox = repo();
        let first = outbox.enqueue("orders", Operation::Insert, &Record::new()).await.unwrap();
        outbox.remove(first).await.unwrap();

        let second = outbox.enqueue("orders", Operation::Insert, &Record::new()).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_record_failure_increments_retry_count() {
        let outbox = repo();
        let id = outbox.enqueue("orders", Operation::Update, &Record::new()).await.unwrap();
        let next = Utc::now() + chrono::Duration::seconds(5);

        outbox.record_failure(id, "HTTP 503", Some(next)).await.unwrap();
        outbox.record_failure(id, "HTTP 502", Some(next)).await.unwrap();

        let item = outbox.get(id).await.unwrap().unwrap();
        assert_eq!(item.retry_count, 2);
        assert_eq!(item.last_error.as_deref(), Some("HTTP 502"));
        assert!(!item.is_due(Utc::now()));
    }

    #[tokio::test]
    async fn test_dead_letter_round_trip() {
        let outbox = repo();
        let payload = record(json!({ "id": "c-1", "name": "Ferme du Pré" }));
        let id = outbox.enqueue("customers", Operation::Insert, &payload).await.unwrap();

        assert!(outbox.move_to_dead_letter(id, "HTTP 422").await.unwrap());
        assert!(!outbox.move_to_dead_letter(id, "HTTP 422").await.unwrap());
        assert_eq!(outbox.count_pending().await.unwrap(), 0);

        let dead = outbox.list_dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].item.payload, payload);
        assert_eq!(dead[0].reason, "HTTP 422");

        let new_id = outbox.requeue_dead_letter(id).await.unwrap().unwrap();
        assert!(new_id > id);
        assert_eq!(outbox.count_dead_letters().await.unwrap(), 0);
        assert_eq!(outbox.requeue_dead_letter(id).await.unwrap(), None);
    }
}

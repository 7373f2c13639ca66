//! # SMS Failure Log
//!
//! Records order notifications the SMS gateway refused or never received.
//! Rows are append-only; operators read them back per order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::warn;

use crate::error::DbResult;
use crate::pool::Database;

/// One failed SMS delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SmsFailure {
    pub id: i64,
    pub order_id: Option<String>,
    pub phone_number: String,
    pub message: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Repository for the SMS failure log.
#[derive(Debug, Clone)]
pub struct SmsLogRepository {
    db: Database,
}

impl SmsLogRepository {
    /// Creates a new SmsLogRepository.
    pub fn new(db: Database) -> Self {
        SmsLogRepository { db }
    }

    /// Appends a failure row. Returns its id.
    pub async fn record_failure(
        &self,
        order_id: Option<&str>,
        phone_number: &str,
        message: &str,
        error: &str,
    ) -> DbResult<i64> {
        let pool = self.db.pool().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO sms_failures (order_id, phone_number, message, error, failed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(order_id)
        .bind(phone_number)
        .bind(message)
        .bind(error)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        warn!(order_id = ?order_id, error = %error, "SMS failure recorded");
        Ok(result.last_insert_rowid())
    }

    /// Failures for one order, oldest first.
    pub async fn list_failures(&self, order_id: &str) -> DbResult<Vec<SmsFailure>> {
        let pool = self.db.pool().await?;

        let rows = sqlx::query_as::<_, SmsFailure>(
            r#"
            SELECT id, order_id, phone_number, message, error, failed_at
            FROM sms_failures
            WHERE order_id = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    /// Total number of recorded failures.
    pub async fn count(&self) -> DbResult<i64> {
        let pool = self.db.pool().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sms_failures")
            .fetch_one(pool)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;

    #[tokio::test]
    async fn test_failures_are_listed_per_order() {
        let log = Database::new(DbConfig::in_memory()).sms_log();

        log.record_failure(Some("o-1"), "+33612345678", "Votre commande est prête", "HTTP 503")
            .await
            .unwrap();
        log.record_failure(Some("o-2"), "+33612345678", "Votre commande est prête", "timeout")
            .await
            .unwrap();
        log.record_failure(None, "+33612345678", "test", "HTTP 401").await.unwrap();

        let failures = log.list_failures("o-1").await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error, "HTTP 503");
        assert_eq!(log.count().await.unwrap(), 3);
    }
}

//! # Preference Repository
//!
//! Persisted key/value preferences. The data mode lives here under
//! `farmshop_core::MODE_PREFERENCE_KEY`.

use chrono::Utc;
use tracing::debug;

use crate::error::DbResult;
use crate::pool::Database;

/// Repository for user preferences.
#[derive(Debug, Clone)]
pub struct PreferenceRepository {
    db: Database,
}

impl PreferenceRepository {
    /// Creates a new PreferenceRepository.
    pub fn new(db: Database) -> Self {
        PreferenceRepository { db }
    }

    /// Reads a preference. `None` if never set.
    pub async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let pool = self.db.pool().await?;

        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM preferences WHERE key = ?1")
                .bind(key)
                .fetch_optional(pool)
                .await?;

        Ok(value)
    }

    /// Writes a preference, replacing any previous value.
    pub async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        let pool = self.db.pool().await?;

        sqlx::query(
            r#"
            INSERT INTO preferences (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        debug!(key = %key, value = %value, "Preference saved");
        Ok(())
    }

    /// Removes a preference. Returns true if it existed.
    pub async fn delete(&self, key: &str) -> DbResult<bool> {
        let pool = self.db.pool().await?;

        let result = sqlx::query("DELETE FROM preferences WHERE key = ?1")
            .bind(key)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;

    #[tokio::test]
    async fn test_set_get_delete() {
        let prefs = Database::new(DbConfig::in_memory()).preferences();

        assert_eq!(prefs.get("data_mode").await.unwrap(), None);

        prefs.set("data_mode", "remote").await.unwrap();
        prefs.set("data_mode", "local").await.unwrap();
        assert_eq!(prefs.get("data_mode").await.unwrap().as_deref(), Some("local"));

        assert!(prefs.delete("data_mode").await.unwrap());
        assert!(!prefs.delete("data_mode").await.unwrap());
        assert_eq!(prefs.get("data_mode").await.unwrap(), None);
    }
}

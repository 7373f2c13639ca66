//! # Database Error Types
//!
//! Error types for local persistence.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)        Bad JSON in a stored row             │
//! │       │                                  │                              │
//! │       ▼                                  ▼                              │
//! │  DbError (this module) ← categorised: full / corrupted / query / ...   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SyncError::Storage ← never swallowed: offline durability is broken    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Local storage errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Database connection failed.
    ///
    /// ## When This Occurs
    /// - Database file can't be created
    /// - File permissions issue
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// The disk or database is full.
    ///
    /// ## When This Occurs
    /// - SQLITE_FULL while writing a cache snapshot or outbox item
    #[error("Storage exhausted: {0}")]
    StorageFull(String),

    /// Stored data could not be decoded.
    ///
    /// ## When This Occurs
    /// - Cached snapshot or outbox payload is not valid JSON
    /// - Unknown operation string in the outbox
    /// - SQLite reports a malformed database image
    #[error("Stored data is corrupted: {0}")]
    Corrupted(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a Corrupted error with table context.
    pub fn corrupted(what: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        DbError::Corrupted(format!("{}: {}", what, reason))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::Database "full"       → DbError::StorageFull
/// sqlx::Error::Database "malformed"  → DbError::Corrupted
/// sqlx::Error::Database other        → DbError::QueryFailed
/// sqlx::Error::ColumnDecode/Decode   → DbError::Corrupted
/// sqlx::Error::PoolTimedOut          → DbError::PoolExhausted
/// Other                              → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLITE_FULL: "database or disk is full"
                // SQLITE_CORRUPT: "database disk image is malformed"
                if msg.contains("is full") {
                    DbError::StorageFull(msg.to_string())
                } else if msg.contains("malformed") {
                    DbError::Corrupted(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                DbError::Corrupted(err.to_string())
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Corrupted(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_are_categorised() {
        assert!(matches!(
            DbError::from(sqlx::Error::PoolTimedOut),
            DbError::PoolExhausted
        ));
        assert!(matches!(
            DbError::from(sqlx::Error::PoolClosed),
            DbError::ConnectionFailed(_)
        ));
    }

    #[test]
    fn test_json_errors_are_corruption() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(DbError::from(err), DbError::Corrupted(_)));
    }

    #[test]
    fn test_corrupted_message_has_context() {
        let err = DbError::corrupted("cache entry 'orders'", "expected array");
        assert_eq!(
            err.to_string(),
            "Stored data is corrupted: cache entry 'orders': expected array"
        );
    }
}

//! # Database Pool Management
//!
//! Lazily-initialised SQLite pool shared by every repository.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Lazy Database Initialisation                       │
//! │                                                                         │
//! │  Database::new(config)      ← synchronous, touches nothing on disk      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.cache().get("orders")   ← first use from ANY repository             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  OnceCell::get_or_try_init                                              │
//! │  ├── open SqlitePool (WAL, foreign keys)                                │
//! │  └── run embedded migrations                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  every later call reuses the same pool                                  │
//! │  (concurrent first calls wait for the single initialisation)            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed initialisation is not cached: the next call tries again.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::cache::{CacheRepository, TableLocks};
use crate::repository::outbox::OutboxRepository;
use crate::repository::preference::PreferenceRepository;
use crate::repository::sms_log::SmsLogRepository;

const IN_MEMORY_PATH: &str = ":memory:";

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/farmshop.db")
///     .max_connections(4);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 4
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection. `None` keeps connections.
    /// Default: 10 minutes
    pub idle_timeout: Option<Duration>,

    /// Whether to run migrations when the pool is opened.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    ///
    /// The file is created on first use if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 4,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on open.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// A single connection that never idles out, so the data lives as long
    /// as the [`Database`] handle.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(IN_MEMORY_PATH),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            run_migrations: true,
        }
    }

    /// Returns true if this configuration targets an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_PATH
    }
}

// =============================================================================
// Database
// =============================================================================

/// Shared handle to local storage.
///
/// Cloning is cheap; clones share the pool and the per-table locks.
#[derive(Debug, Clone)]
pub struct Database {
    config: Arc<DbConfig>,
    pool: Arc<OnceCell<SqlitePool>>,
    table_locks: TableLocks,
}

impl Database {
    /// Creates a handle without touching storage.
    pub fn new(config: DbConfig) -> Self {
        Database {
            config: Arc::new(config),
            pool: Arc::new(OnceCell::new()),
            table_locks: TableLocks::default(),
        }
    }

    /// Creates a handle and opens the pool immediately.
    ///
    /// Useful at startup to surface a broken database file early.
    pub async fn connect(config: DbConfig) -> DbResult<Self> {
        let db = Self::new(config);
        db.pool().await?;
        Ok(db)
    }

    /// Returns the pool, opening it (and migrating) on first use.
    pub async fn pool(&self) -> DbResult<&SqlitePool> {
        self.pool
            .get_or_try_init(|| open_pool(self.config.as_ref()))
            .await
    }

    /// Returns true once the pool has been opened.
    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Returns the local cache repository.
    pub fn cache(&self) -> CacheRepository {
        CacheRepository::new(self.clone(), self.table_locks.clone())
    }

    /// Returns the offline outbox repository.
    pub fn outbox(&self) -> OutboxRepository {
        OutboxRepository::new(self.clone())
    }

    /// Returns the preference repository.
    pub fn preferences(&self) -> PreferenceRepository {
        PreferenceRepository::new(self.clone())
    }

    /// Returns the SMS failure log repository.
    pub fn sms_log(&self) -> SmsLogRepository {
        SmsLogRepository::new(self.clone())
    }

    /// Closes the pool if it was opened.
    ///
    /// ## Note
    /// After calling close, all repository operations will fail.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            info!("Closing database connection pool");
            pool.close().await;
        }
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        match self.pool().await {
            Ok(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
            Err(_) => false,
        }
    }
}

/// Opens the pool and applies migrations.
async fn open_pool(config: &DbConfig) -> DbResult<SqlitePool> {
    info!(
        path = %config.database_path.display(),
        "Initializing database connection"
    );

    let base_options = if config.is_in_memory() {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
    } else {
        SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(true)
            // WAL mode: readers don't block the single writer
            .journal_mode(SqliteJournalMode::Wal)
    };

    let connect_options = base_options
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    debug!("Connection options configured");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(if config.is_in_memory() {
            None
        } else {
            Some(Duration::from_secs(1800))
        })
        .connect_with(connect_options)
        .await
        .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

    info!(
        max_connections = config.max_connections,
        "Database pool created"
    );

    if config.run_migrations {
        migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

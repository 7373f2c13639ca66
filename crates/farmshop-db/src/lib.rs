//! # farmshop-db: Local Persistence for FarmShop Sync
//!
//! Everything the sync layer keeps on the device: table snapshots for
//! offline reads, the outbox of writes waiting for the backend, user
//! preferences and the SMS failure log.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        FarmShop Data Flow                               │
//! │                                                                         │
//! │  farmshop-sync (transports, mode controller, outbox drain)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   farmshop-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories  │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                │    │  (embedded)  │  │   │
//! │  │   │               │    │ Cache          │    │ 001_init.sql │  │   │
//! │  │   │ lazy OnceCell │◄───│ Outbox         │    │ 002_sms.sql  │  │   │
//! │  │   │ SqlitePool    │    │ Preference     │    │              │  │   │
//! │  │   │ table locks   │    │ SmsLog         │    │              │  │   │
//! │  │   └───────────────┘    └────────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file (WAL)                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use farmshop_db::{Database, DbConfig};
//!
//! // Nothing is opened yet
//! let db = Database::new(DbConfig::new("farmshop.db"));
//!
//! // First call opens the pool and runs migrations
//! let orders = db.cache().get("orders").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cache::{CacheRepository, TableLocks};
pub use repository::outbox::OutboxRepository;
pub use repository::preference::PreferenceRepository;
pub use repository::sms_log::{SmsFailure, SmsLogRepository};

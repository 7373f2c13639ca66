//! # Repository Module
//!
//! Repositories over the local SQLite store. Each one is obtained from a
//! [`Database`](crate::Database) handle and shares its lazily-opened pool.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  farmshop-sync                                                          │
//! │       │                                                                 │
//! │       │  db.cache().get("orders")                                       │
//! │       │  db.outbox().enqueue("orders", Operation::Insert, &row)         │
//! │       ▼                                                                 │
//! │  CacheRepository       table snapshots, per-table write locks          │
//! │  OutboxRepository      pending writes (FIFO) + dead letters            │
//! │  PreferenceRepository  key/value settings (data mode)                  │
//! │  SmsLogRepository      failed order notifications                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (cache_entries, sync_outbox, sync_dead_letter, preferences,    │
//! │          sms_failures)                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod outbox;
pub mod preference;
pub mod sms_log;

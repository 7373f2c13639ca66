//! # farmshop-core: Pure Types for the FarmShop Sync Layer
//!
//! This crate holds the data model shared by the local store and the sync
//! engine. Everything here is a pure function or a plain type.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FarmShop Sync Architecture                         │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Admin UI (orders, labels, SMS)                  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ read/write(table)                      │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 farmshop-sync (mode + transport)                │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               farmshop-db (cache + outbox + prefs)              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ farmshop-core (THIS CRATE) ★                      │   │
//! │  │   Mode · Operation · Record · CacheEntry · OutboxItem           │   │
//! │  │   TableMap · table-name extraction · record mutation            │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK                             │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Mode, Operation, Record, CacheEntry, OutboxItem, envelopes
//! - [`table`] - Logical/physical table names and request-target parsing
//! - [`record`] - Applying insert/update/delete to a cached table snapshot
//! - [`validation`] - Input validation (phone numbers, SMS text, table keys)
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use farmshop_core::table::{extract_table_name, TableMap};
//!
//! let tables = TableMap::default();
//! assert_eq!(tables.to_remote("customers"), "farm_customers");
//! assert_eq!(extract_table_name("https://api.example.com/tables/orders?limit=1"), "orders");
//! ```

pub mod error;
pub mod record;
pub mod table;
pub mod types;
pub mod validation;

pub use error::{CoreError, ValidationError};
pub use table::{extract_table_name, TableMap, UNKNOWN_TABLE};
pub use types::*;

/// Storage key under which the chosen [`Mode`] is persisted.
pub const MODE_PREFERENCE_KEY: &str = "data_mode";

/// Record field used to match rows for update and delete.
pub const RECORD_ID_FIELD: &str = "id";

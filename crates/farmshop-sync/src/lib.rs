//! # farmshop-sync: Local/Remote Sync Layer for FarmShop
//!
//! Decides, for every table read and write, whether the hosted backend or
//! the local cache answers it; shields callers from backend failures; and
//! replays writes made while the backend was out of reach.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Layer Architecture                          │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncAgent (Main Orchestrator)               │  │
//! │  │                                                                  │  │
//! │  │  fetch_table / write / sync_now / status                         │  │
//! │  │  Background loop: probe + drain every poll interval              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ ModeController │  │OutboxProcessor │  │  ConnectivityProbe     │    │
//! │  │                │  │                │  │                        │    │
//! │  │ local/remote   │  │ FIFO replay    │  │ Bounded GET            │    │
//! │  │ force-local    │  │ backoff +      │  │ Flips reachability     │    │
//! │  │ persisted pref │  │ dead letter    │  │                        │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          │ selects                                                      │
//! │          ▼                                                              │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Transport decorators                         │   │
//! │  │                                                                 │   │
//! │  │  LocalTransport | FallbackTransport  →  AuthTransport  →  Http  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  SHARED STATE: SyncContext (config, storage, table map, emitter,        │
//! │  reachability flag), passed explicitly to every component.              │
//! │                                                                         │
//! │  EVENTS (to the UI): mode, unreachable (once per session), notice,      │
//! │  progress, error                                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`agent`] - Main `SyncAgent` orchestrator
//! - [`config`] - Sync configuration (TOML + environment)
//! - [`context`] - Shared session state and reachability
//! - [`error`] - Sync error types
//! - [`events`] - UI event emitter
//! - [`mode`] - Mode controller
//! - [`transport`] - Transport trait and the reqwest transport
//! - [`auth`], [`fallback`], [`local`] - Transport decorators
//! - [`outbox`] - Outbox replay with retry policy
//! - [`probe`] - Connectivity probe
//! - [`sms`] - Signed SMS notifications
//!
//! ## Usage
//!
//! ```rust,ignore
//! use farmshop_sync::{SyncAgent, SyncConfig};
//! use farmshop_db::{Database, DbConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new("farmshop.db"));
//!
//! let mut agent = SyncAgent::new(config, db)?;
//! agent.start().await?;
//!
//! let orders = agent.fetch_table("orders").await?;
//! let status = agent.status().await?;
//! println!("Mode: {}, pending: {}", status.mode, status.pending_count);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod mode;
pub mod outbox;
pub mod probe;
pub mod sms;

// Transport stack
pub mod auth;
pub mod fallback;
pub mod local;
pub mod transport;

#[cfg(test)]
mod test_support;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentBuilder, SyncAgentHandle, SyncStatus, WriteOutcome};
pub use config::SyncConfig;
pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use events::{ChannelEmitter, NoOpEmitter, SyncEvent, SyncEventEmitter};
pub use mode::ModeController;
pub use outbox::{DrainReport, OutboxProcessor, RetryPolicy};
pub use probe::ConnectivityProbe;
pub use sms::{PayloadSigner, SmsNotifier, SmsOutcome, SmsRequest};
pub use transport::{HttpTransport, Layer, Request, Response, ResponseSource, Transport};

pub use farmshop_core::{Mode, Operation, Record};

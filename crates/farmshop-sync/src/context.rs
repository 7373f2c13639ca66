//! # Sync Context
//!
//! The one explicitly-constructed object every component shares: config,
//! storage, table mapping, the event emitter and the reachability flag.
//!
//! ## Reachability
//! ```text
//!   reachable ──5xx / no response on a table──► unreachable
//!       ▲          (notify UI once per session)       │
//!       └──────── 2xx from backend / probe ok ────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use farmshop_core::TableMap;
use farmshop_db::Database;

use crate::config::SyncConfig;
use crate::events::{NoOpEmitter, SyncEventEmitter};

/// Shared state for one running session.
pub struct SyncContext {
    config: Arc<SyncConfig>,
    db: Database,
    tables: TableMap,
    emitter: Arc<dyn SyncEventEmitter>,
    reachable: AtomicBool,
    unreachable_notified: AtomicBool,
    session_id: Uuid,
}

impl SyncContext {
    /// Creates a context with a no-op emitter.
    pub fn new(config: SyncConfig, db: Database) -> Arc<Self> {
        Self::with_emitter(config, db, Arc::new(NoOpEmitter))
    }

    /// Creates a context with a custom event emitter.
    pub fn with_emitter(
        config: SyncConfig,
        db: Database,
        emitter: Arc<dyn SyncEventEmitter>,
    ) -> Arc<Self> {
        let tables = config.table_map();

        Arc::new(SyncContext {
            config: Arc::new(config),
            db,
            tables,
            emitter,
            reachable: AtomicBool::new(true),
            unreachable_notified: AtomicBool::new(false),
            session_id: Uuid::new_v4(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn tables(&self) -> &TableMap {
        &self.tables
    }

    pub fn emitter(&self) -> &Arc<dyn SyncEventEmitter> {
        &self.emitter
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Current belief about the backend.
    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Flips the flag to unreachable.
    ///
    /// The first call in a session notifies the UI; later calls only log.
    /// Returns true if this call produced the notification.
    pub fn mark_unreachable(&self, table: &str, reason: &str) -> bool {
        self.reachable.store(false, Ordering::SeqCst);

        if self.unreachable_notified.swap(true, Ordering::SeqCst) {
            debug!(table = %table, reason = %reason, "Backend still unreachable");
            return false;
        }

        warn!(
            session = %self.session_id,
            table = %table,
            reason = %reason,
            "Backend unreachable, serving local data"
        );
        self.emitter.emit_unreachable(table, reason);
        true
    }

    /// Flips the flag back to reachable. Returns true on a transition.
    pub fn mark_reachable(&self) -> bool {
        let was_reachable = self.reachable.swap(true, Ordering::SeqCst);
        if !was_reachable {
            info!("Backend reachable again");
        }
        !was_reachable
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("session_id", &self.session_id)
            .field("reachable", &self.is_reachable())
            .field("backend", &self.config.backend_url())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{drain_events, ChannelEmitter, SyncEvent};
    use farmshop_db::DbConfig;

    #[test]
    fn test_unreachable_notifies_once_per_session() {
        let (emitter, mut rx) = ChannelEmitter::new();
        let ctx = SyncContext::with_emitter(
            SyncConfig::default(),
            Database::new(DbConfig::in_memory()),
            Arc::new(emitter),
        );

        assert!(ctx.is_reachable());
        assert!(ctx.mark_unreachable("orders", "HTTP 500"));
        assert!(!ctx.mark_unreachable("customers", "HTTP 500"));
        assert!(!ctx.is_reachable());

        assert!(ctx.mark_reachable());
        assert!(!ctx.mark_reachable());
        assert!(!ctx.mark_unreachable("orders", "connection refused"));

        let events = drain_events(&mut rx);
        assert_eq!(
            events,
            vec![SyncEvent::Unreachable {
                table: "orders".into(),
                reason: "HTTP 500".into()
            }]
        );
    }
}

//! # Remote Fallback Transport
//!
//! Shields callers from a failing backend while in remote mode.
//!
//! ## Failure Handling
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  inner.send(request) on a table target                                  │
//! │                                                                         │
//! │  2xx          → mark reachable, pass through                            │
//! │  5xx          → mark unreachable (notify once per session)              │
//! │                 write? record in outbox + apply to cache                │
//! │                 (update/delete without a record id → error)             │
//! │                 return 200 { data: cached rows, total, message }        │
//! │  no response  → mark unreachable (notify once per session)              │
//! │                 rethrow; the caller consults the cache                  │
//! │  other        → pass through                                            │
//! │                                                                         │
//! │  Requests that don't name a table pass through untouched.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use farmshop_core::record::record_id;
use farmshop_core::{Operation, ResponseEnvelope, UNKNOWN_TABLE};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Layer, Request, Response, ResponseSource, Transport};

/// Substitutes cached data for server failures on table requests.
pub struct FallbackTransport {
    inner: Arc<dyn Transport>,
    ctx: Arc<SyncContext>,
}

impl FallbackTransport {
    /// Wraps `inner`, or returns it unchanged if it already falls back.
    pub fn wrap(inner: Arc<dyn Transport>, ctx: Arc<SyncContext>) -> Arc<dyn Transport> {
        if inner.has_layer(Layer::Fallback) {
            return inner;
        }
        Arc::new(FallbackTransport { inner, ctx })
    }

    /// Records a write the backend failed to take.
    async fn capture_write(&self, table: &str, request: &Request) -> SyncResult<()> {
        let Some(operation) = request.operation() else {
            return Ok(());
        };

        let payload = request.write_payload();
        if operation != Operation::Insert && record_id(&payload).is_none() {
            return Err(SyncError::InvalidInput(format!(
                "{} on {} needs a record id; not queued",
                operation, table
            )));
        }

        let db = self.ctx.db();
        let id = db.outbox().enqueue(table, operation, &payload).await?;
        db.cache().apply(table, operation, &payload).await?;

        info!(id, table = %table, operation = %operation, "Captured failed write in outbox");
        Ok(())
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    async fn send(&self, request: Request) -> SyncResult<Response> {
        let table = self.ctx.tables().local_table_for_target(&request.url);
        if table == UNKNOWN_TABLE {
            return self.inner.send(request).await;
        }

        // The request is consumed by the send; keep what the fallback needs.
        let replay = request.operation().map(|_| request.clone());

        match self.inner.send(request).await {
            Ok(response) if response.status.is_server_error() => {
                let reason = format!("HTTP {}", response.status.as_u16());
                self.ctx.mark_unreachable(&table, &reason);

                if let Some(ref write) = replay {
                    self.capture_write(&table, write).await?;
                }

                let rows = self.ctx.db().cache().get(&table).await?.unwrap_or_default();
                debug!(table = %table, rows = rows.len(), "Serving cached rows for failed request");

                let envelope = ResponseEnvelope::new(
                    rows,
                    format!("Backend unavailable ({}), showing local data", reason),
                );
                Ok(Response::synthetic(&envelope, ResponseSource::Fallback))
            }

            Ok(response) => {
                if response.is_success() {
                    self.ctx.mark_reachable();
                }
                Ok(response)
            }

            Err(e) if e.is_network() => {
                self.ctx.mark_unreachable(&table, &e.to_string());
                Err(e)
            }

            Err(e) => Err(e),
        }
    }

    fn layers(&self) -> Vec<Layer> {
        let mut layers = vec![Layer::Fallback];
        layers.extend(self.inner.layers());
        layers
    }
}

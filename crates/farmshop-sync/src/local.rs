//! # Local-Mode Interceptor
//!
//! Installed by the mode controller in local mode. Table requests never
//! reach the network:
//!
//! ```text
//! GET    tables/<t>      → 200 { data: cache[t] or [], total, message }
//! POST   tables/<t>      → cache[t] += row          ┐
//! PUT    tables/<t>/<id> → cache[t][id] merged      ├─ + outbox entry when
//! PATCH  tables/<t>/<id> → cache[t][id] merged      │  record_local_writes
//! DELETE tables/<t>/<id> → cache[t][id] removed     ┘
//! ```
//!
//! Writes go through to the cache (and outbox) here, so call sites never
//! have to persist local mutations themselves. An update or delete must name
//! its record; one that doesn't is refused rather than queued as a write to
//! the whole table.
//!
//! Requests that don't name a table go to the inner transport, except backend
//! calls while the remote is disabled, which fail without leaving the device.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use farmshop_core::record::record_id;
use farmshop_core::{Operation, ResponseEnvelope, UNKNOWN_TABLE};

use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Layer, Request, Response, ResponseSource, Transport};

/// Serves table requests from local storage.
pub struct LocalTransport {
    inner: Arc<dyn Transport>,
    ctx: Arc<SyncContext>,
}

impl LocalTransport {
    /// Wraps `inner`, or returns it unchanged if it already intercepts.
    pub fn wrap(inner: Arc<dyn Transport>, ctx: Arc<SyncContext>) -> Arc<dyn Transport> {
        if inner.has_layer(Layer::LocalInterceptor) {
            return inner;
        }
        Arc::new(LocalTransport { inner, ctx })
    }

    async fn read(&self, table: &str) -> SyncResult<Response> {
        let rows = self.ctx.db().cache().get(table).await?.unwrap_or_default();
        debug!(table = %table, rows = rows.len(), "Local read");

        let envelope = ResponseEnvelope::new(rows, "Local data");
        Ok(Response::synthetic(&envelope, ResponseSource::Local))
    }

    async fn write(&self, table: &str, operation: Operation, request: &Request) -> SyncResult<Response> {
        let payload = request.write_payload();
        if operation != Operation::Insert && record_id(&payload).is_none() {
            return Err(SyncError::InvalidInput(format!(
                "{} on {} needs a record id in the path or body",
                operation, table
            )));
        }

        let db = self.ctx.db();
        db.cache().apply(table, operation, &payload).await?;

        if self.ctx.config().outbox.record_local_writes {
            db.outbox().enqueue(table, operation, &payload).await?;
        }

        debug!(table = %table, operation = %operation, "Local write");

        let envelope = ResponseEnvelope::new(vec![payload], "Saved locally");
        Ok(Response::synthetic(&envelope, ResponseSource::Local))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, request: Request) -> SyncResult<Response> {
        let table = self.ctx.tables().local_table_for_target(&request.url);
        if table == UNKNOWN_TABLE {
            let config = self.ctx.config();
            if !config.remote_allowed() && config.is_backend_url(&request.url) {
                debug!(url = %request.url, "Backend disabled, request not sent");
                return Err(SyncError::BackendDisabled);
            }
            return self.inner.send(request).await;
        }

        match request.operation() {
            Some(operation) => self.write(&table, operation, &request).await,
            None => self.read(&table).await,
        }
    }

    fn layers(&self) -> Vec<Layer> {
        let mut layers = vec![Layer::LocalInterceptor];
        layers.extend(self.inner.layers());
        layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, test_config, test_context, ScriptedTransport};
    use reqwest::{Method, StatusCode};
    use serde_json::json;

    const ORDERS: &str = "https://backend.example.com/tables/orders";

    #[tokio::test]
    async fn test_get_serves_cache_without_network() {
        let (ctx, _events) = test_context(test_config());
        let stub = ScriptedTransport::unreachable();
        let transport = LocalTransport::wrap(stub.clone(), ctx.clone());

        let response = transport.send(Request::get(ORDERS)).await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body["data"], json!([]));

        ctx.db().cache().set("orders", &[record(json!({ "id": "o-1" }))]).await.unwrap();
        let response = transport.send(Request::get(format!("{}?limit=5", ORDERS))).await.unwrap();
        assert_eq!(response.envelope().total, 1);
        assert!(stub.requests().is_empty());
    }

    #[tokio::test]
    async fn test_writes_go_through_to_cache_and_outbox() {
        let (ctx, _events) = test_context(test_config());
        let transport = LocalTransport::wrap(ScriptedTransport::unreachable(), ctx.clone());

        transport
            .send(Request::post(ORDERS, json!({ "id": "o-1", "status": "new" })))
            .await
            .unwrap();
        transport
            .send(
                Request::new(Method::PATCH, format!("{}/o-1", ORDERS))
                    .with_body(json!({ "status": "packed" })),
            )
            .await
            .unwrap();

        let rows = ctx.db().cache().get("orders").await.unwrap().unwrap();
        assert_eq!(rows, vec![record(json!({ "id": "o-1", "status": "packed" }))]);

        transport
            .send(Request::new(Method::DELETE, format!("{}/o-1", ORDERS)))
            .await
            .unwrap();
        assert_eq!(ctx.db().cache().get("orders").await.unwrap(), Some(vec![]));

        let ops: Vec<Operation> = ctx
            .db()
            .outbox()
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.operation)
            .collect();
        assert_eq!(ops, vec![Operation::Insert, Operation::Update, Operation::Delete]);
    }

    #[tokio::test]
    async fn test_outbox_recording_can_be_disabled() {
        let mut config = test_config();
        config.outbox.record_local_writes = false;
        let (ctx, _events) = test_context(config);
        let transport = LocalTransport::wrap(ScriptedTransport::unreachable(), ctx.clone());

        transport.send(Request::post(ORDERS, json!({ "id": "o-1" }))).await.unwrap();

        assert_eq!(ctx.db().outbox().count_pending().await.unwrap(), 0);
        assert_eq!(ctx.db().cache().get("orders").await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_table_requests_pass_through() {
        let (ctx, _events) = test_context(test_config());
        let stub = ScriptedTransport::always(StatusCode::ACCEPTED);
        let transport = LocalTransport::wrap(stub.clone(), ctx);

        let response = transport
            .send(Request::post("https://sms.example.com/send", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::ACCEPTED);
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_backend_calls_are_bypassed_when_disabled() {
        let mut config = test_config();
        config.backend.disabled = true;
        let (ctx, _events) = test_context(config);
        let stub = ScriptedTransport::always(StatusCode::OK);
        let transport = LocalTransport::wrap(stub.clone(), ctx);

        let err = transport
            .send(Request::get("https://backend.example.com/health"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::BackendDisabled));

        // Other hosts are still reachable.
        transport
            .send(Request::post("https://sms.example.com/send", json!({})))
            .await
            .unwrap();
        assert_eq!(stub.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_without_record_id_is_refused() {
        let (ctx, _events) = test_context(test_config());
        let cached = vec![record(json!({ "id": "o-1" })), record(json!({ "id": "o-2" }))];
        ctx.db().cache().set("orders", &cached).await.unwrap();
        let transport = LocalTransport::wrap(ScriptedTransport::unreachable(), ctx.clone());

        let err = transport
            .send(Request::new(Method::DELETE, format!("{}?id=eq.o-1", ORDERS)))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));

        let err = transport
            .send(Request::new(Method::PATCH, ORDERS).with_body(json!({ "status": "packed" })))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));

        assert_eq!(ctx.db().cache().get("orders").await.unwrap().unwrap(), cached);
        assert_eq!(ctx.db().outbox().count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupted_cache_surfaces_as_storage_error() {
        let (ctx, _events) = test_context(test_config());
        let pool = ctx.db().pool().await.unwrap();
        sqlx::query("INSERT INTO cache_entries (table_key, data, cached_at) VALUES (?1, ?2, ?3)")
            .bind("orders")
            .bind("{not json")
            .bind(chrono::Utc::now())
            .execute(pool)
            .await
            .unwrap();
        let transport = LocalTransport::wrap(ScriptedTransport::unreachable(), ctx.clone());

        let err = transport.send(Request::get(ORDERS)).await.unwrap_err();
        assert!(err.is_storage());

        let err = transport
            .send(Request::post(ORDERS, json!({ "id": "o-1" })))
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert_eq!(ctx.db().outbox().count_pending().await.unwrap(), 0);
    }
}

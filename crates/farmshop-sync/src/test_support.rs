//! Scripted transport and fixtures for unit tests.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use farmshop_core::Record;
use farmshop_db::{Database, DbConfig};

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::events::{ChannelEmitter, SyncEvent};
use crate::transport::{Request, Response, Transport};

type Handler = dyn Fn(&Request) -> SyncResult<Response> + Send + Sync;

/// Answers every request with a handler and remembers what it saw.
pub struct ScriptedTransport {
    handler: Box<Handler>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&Request) -> SyncResult<Response> + Send + Sync + 'static,
    {
        Arc::new(ScriptedTransport {
            handler: Box::new(handler),
            delay: None,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Every request gets `status` with an empty array body.
    pub fn always(status: StatusCode) -> Arc<Self> {
        Self::new(move |_| Ok(Response::new(status, json!([]))))
    }

    /// Every request fails without a response.
    pub fn unreachable() -> Arc<Self> {
        Self::new(|_| Err(SyncError::ConnectionFailed("connection refused".into())))
    }

    /// Every request waits `delay` before answering 200.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(ScriptedTransport {
            handler: Box::new(|_| Ok(Response::new(StatusCode::OK, Value::Null))),
            delay: Some(delay),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<Request> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> SyncResult<Response> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        result
    }
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub fn test_config() -> SyncConfig {
    SyncConfig::for_backend("https://backend.example.com", "anon-123")
}

/// Context over an in-memory database, plus the receiver of its events.
pub fn test_context(
    config: SyncConfig,
) -> (Arc<SyncContext>, tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) {
    let (emitter, rx) = ChannelEmitter::new();
    let ctx = SyncContext::with_emitter(config, Database::new(DbConfig::in_memory()), Arc::new(emitter));
    (ctx, rx)
}

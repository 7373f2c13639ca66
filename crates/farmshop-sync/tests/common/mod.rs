//! Shared fixtures for the scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use farmshop_db::{Database, DbConfig};
use farmshop_sync::{
    ChannelEmitter, Record, Request, Response, SyncAgent, SyncAgentBuilder, SyncConfig, SyncEvent,
    SyncResult, Transport,
};

type Handler = dyn Fn(&Request) -> SyncResult<Response> + Send + Sync;

/// Transport double: answers with a handler and records every request.
pub struct FakeBackend {
    handler: Mutex<Box<Handler>>,
    requests: Mutex<Vec<Request>>,
}

impl FakeBackend {
    pub fn new<F>(handler: F) -> Arc<Self>
    where
        F: Fn(&Request) -> SyncResult<Response> + Send + Sync + 'static,
    {
        Arc::new(FakeBackend {
            handler: Mutex::new(Box::new(handler)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn status(status: StatusCode) -> Arc<Self> {
        Self::new(move |_| Ok(Response::new(status, json!([]))))
    }

    /// Swaps the behaviour mid-test, e.g. to bring the backend back.
    pub fn respond_with<F>(&self, handler: F)
    where
        F: Fn(&Request) -> SyncResult<Response> + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Box::new(handler);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn table_requests(&self) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains("/tables/"))
            .collect()
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, request: Request) -> SyncResult<Response> {
        let result = {
            let handler = self.handler.lock().unwrap();
            (*handler)(&request)
        };
        self.requests.lock().unwrap().push(request);
        result
    }
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

pub fn config() -> SyncConfig {
    SyncConfig::for_backend("https://backend.example.com", "anon-123")
}

/// Agent over an in-memory database and `backend`, plus its event stream.
pub fn agent(
    config: SyncConfig,
    backend: Arc<FakeBackend>,
) -> (SyncAgent, tokio::sync::mpsc::UnboundedReceiver<SyncEvent>) {
    let (emitter, events) = ChannelEmitter::new();
    let agent = SyncAgentBuilder::new(config)
        .with_database(Database::new(DbConfig::in_memory()))
        .with_emitter(Arc::new(emitter))
        .with_transport(backend)
        .build()
        .unwrap();
    (agent, events)
}

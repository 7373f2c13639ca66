//! # Domain Types
//!
//! Core types shared by the local store and the sync engine.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   CacheEntry    │   │   OutboxItem    │   │      Mode       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  key (table)    │   │  id (i64, FIFO) │   │  Local          │       │
//! │  │  data [Record]  │   │  table          │   │  Remote         │       │
//! │  │  timestamp      │   │  operation      │   └─────────────────┘       │
//! │  └─────────────────┘   │  payload        │                              │
//! │                        │  retry_count    │   ┌─────────────────┐       │
//! │                        └─────────────────┘   │   Operation     │       │
//! │                                              │  Insert/Update/ │       │
//! │                                              │  Delete         │       │
//! │                                              └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records are schema-free: this layer never validates a row's shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// One row of a table. Opaque to the sync layer.
pub type Record = Map<String, Value>;

// =============================================================================
// Mode
// =============================================================================

/// Process-wide operating mode.
///
/// ```text
///   LOCAL   reads/writes served by the local cache + outbox
///   REMOTE  reads/writes go to the backend, with cache fallback on failure
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Local storage only.
    Local,
    /// Hosted backend.
    Remote,
}

impl Mode {
    /// Returns the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Local => "local",
            Mode::Remote => "remote",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "offline" => Ok(Mode::Local),
            "remote" | "online" => Ok(Mode::Remote),
            other => Err(CoreError::UnknownMode(other.to_string())),
        }
    }
}

// =============================================================================
// Operation
// =============================================================================

/// A write operation recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// Returns the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Maps an HTTP verb onto the write it performs.
    ///
    /// Returns `None` for read verbs.
    pub fn from_http_method(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(Operation::Insert),
            "PUT" | "PATCH" => Some(Operation::Update),
            "DELETE" => Some(Operation::Delete),
            _ => None,
        }
    }

    /// The HTTP verb used to replay this operation against the backend.
    pub fn http_method(&self) -> &'static str {
        match self {
            Operation::Insert => "POST",
            Operation::Update => "PATCH",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "insert" => Ok(Operation::Insert),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(CoreError::UnknownOperation(other.to_string())),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// Last known snapshot of one table. At most one per table key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Logical table key.
    pub key: String,

    /// Cached rows, replaced wholesale on every write.
    pub data: Vec<Record>,

    /// When the snapshot was written.
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    /// Age of the snapshot relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    /// True iff the entry is strictly younger than `max_age`.
    pub fn is_fresh(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        self.age(now) < max_age
    }
}

// =============================================================================
// Outbox Item
// =============================================================================

/// A write waiting to be replayed against the backend.
///
/// ## Lifecycle
/// ```text
/// enqueue ──► pending ──replay ok──► removed
///                │
///                └──replay failed──► retry_count += 1, next_attempt_at = now + backoff
///                         │
///                         └──retries exhausted / 4xx──► dead letter
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxItem {
    /// Monotonic identifier; also the replay order.
    pub id: i64,

    /// Logical table key.
    pub table: String,

    /// Write to perform.
    pub operation: Operation,

    /// Row payload.
    pub payload: Record,

    /// When the write was recorded.
    pub timestamp: DateTime<Utc>,

    /// Failed replay attempts so far.
    pub retry_count: u32,

    /// Message of the last replay failure.
    pub last_error: Option<String>,

    /// Earliest time the next replay may be attempted.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl OutboxItem {
    /// Returns true if the item's backoff window has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// The record id carried in the payload, if any.
    pub fn record_id(&self) -> Option<String> {
        crate::record::record_id(&self.payload)
    }
}

/// An outbox item that exhausted its retries or was rejected by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item: OutboxItem,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

// =============================================================================
// Response Envelope
// =============================================================================

/// Success envelope returned by list reads: `{ data, total, message }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub data: Vec<Record>,
    pub total: usize,
    #[serde(default)]
    pub message: String,
}

impl ResponseEnvelope {
    /// Wraps rows in an envelope whose total is the row count.
    pub fn new(data: Vec<Record>, message: impl Into<String>) -> Self {
        let total = data.len();
        ResponseEnvelope {
            data,
            total,
            message: message.into(),
        }
    }

    /// Envelope with no rows.
    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(Vec::new(), message)
    }

    /// Serializes the envelope into a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "data": self.data,
            "total": self.total,
            "message": self.message,
        })
    }

    /// The row values of a response body, before any filtering.
    pub fn raw_rows(body: &Value) -> &[Value] {
        match body {
            Value::Array(items) => items.as_slice(),
            Value::Object(map) => match map.get("data") {
                Some(Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => &[],
        }
    }

    /// Reads rows out of a backend response body.
    ///
    /// Accepts either an envelope object or a bare array of records. Non-object
    /// array elements are dropped; compare with [`raw_rows`](Self::raw_rows)
    /// to detect that.
    pub fn from_body(body: &Value) -> Self {
        let data: Vec<Record> = Self::raw_rows(body)
            .iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();

        let total = body
            .get("total")
            .and_then(Value::as_u64)
            .map(|t| t as usize)
            .unwrap_or(data.len());

        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        ResponseEnvelope {
            data,
            total,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("local".parse::<Mode>().unwrap(), Mode::Local);
        assert_eq!("REMOTE".parse::<Mode>().unwrap(), Mode::Remote);
        assert_eq!("offline".parse::<Mode>().unwrap(), Mode::Local);
        assert!("hybrid".parse::<Mode>().is_err());
        assert_eq!(Mode::Remote.to_string(), "remote");
    }

    #[test]
    fn test_operation_http_mapping() {
        assert_eq!(Operation::from_http_method("post"), Some(Operation::Insert));
        assert_eq!(Operation::from_http_method("PUT"), Some(Operation::Update));
        assert_eq!(Operation::from_http_method("PATCH"), Some(Operation::Update));
        assert_eq!(Operation::from_http_method("DELETE"), Some(Operation::Delete));
        assert_eq!(Operation::from_http_method("GET"), None);
        assert_eq!(Operation::Update.http_method(), "PATCH");
    }

    #[test]
    fn test_cache_entry_freshness() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: "orders".into(),
            data: vec![],
            timestamp: now - chrono::Duration::seconds(30),
        };
        assert!(entry.is_fresh(now, chrono::Duration::seconds(60)));
        assert!(!entry.is_fresh(now, chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_outbox_item_due() {
        let now = Utc::now();
        let mut item = OutboxItem {
            id: 1,
            table: "orders".into(),
            operation: Operation::Insert,
            payload: Record::new(),
            timestamp: now,
            retry_count: 0,
            last_error: None,
            next_attempt_at: None,
        };
        assert!(item.is_due(now));

        item.next_attempt_at = Some(now + chrono::Duration::seconds(10));
        assert!(!item.is_due(now));
    }

    #[test]
    fn test_envelope_from_body() {
        let body = json!({ "data": [{ "id": 1 }, 7], "total": 40, "message": "ok" });
        let env = ResponseEnvelope::from_body(&body);
        assert_eq!(env.data.len(), 1);
        assert_eq!(env.total, 40);
        assert_eq!(env.message, "ok");

        let bare = json!([{ "id": 1 }, { "id": 2 }]);
        let env = ResponseEnvelope::from_body(&bare);
        assert_eq!(env.total, 2);
    }

    #[test]
    fn test_envelope_to_value() {
        let mut row = Record::new();
        row.insert("id".into(), json!("o-1"));
        let env = ResponseEnvelope::new(vec![row], "local");
        let value = env.to_value();
        assert_eq!(value["total"], json!(1));
        assert_eq!(value["data"][0]["id"], json!("o-1"));
    }
}

//! # Sync Events
//!
//! Notifications for whatever UI observes the sync layer.
//!
//! ```text
//!  ModeController ──emit_mode──────────┐
//!  SyncContext    ──emit_unreachable───┤   (once per session)
//!  ModeController ──emit_notice────────┼──► SyncEventEmitter ──► UI
//!  OutboxProcessor──emit_progress──────┤
//!  SyncAgent      ──emit_error─────────┘
//! ```

use serde::Serialize;
use tokio::sync::mpsc;

use farmshop_core::Mode;

/// Trait for emitting sync events (implemented by the UI integration).
pub trait SyncEventEmitter: Send + Sync {
    /// The resolved or newly selected mode.
    fn emit_mode(&self, mode: Mode);

    /// The backend stopped answering. Emitted at most once per session.
    fn emit_unreachable(&self, table: &str, reason: &str);

    /// A user-facing explanation, e.g. a rejected mode switch.
    fn emit_notice(&self, message: &str);

    /// Outbox drain progress.
    fn emit_progress(&self, pending: i64, replayed: usize);

    /// A sync failure.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter.
pub struct NoOpEmitter;

impl SyncEventEmitter for NoOpEmitter {
    fn emit_mode(&self, _mode: Mode) {}
    fn emit_unreachable(&self, _table: &str, _reason: &str) {}
    fn emit_notice(&self, _message: &str) {}
    fn emit_progress(&self, _pending: i64, _replayed: usize) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}

/// An emitted event, as forwarded by [`ChannelEmitter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    Mode { mode: Mode },
    Unreachable { table: String, reason: String },
    Notice { message: String },
    Progress { pending: i64, replayed: usize },
    Error { message: String, retryable: bool },
}

/// Forwards every event into an unbounded channel.
///
/// Suits UI bridges that pump events on their own task. Events sent after
/// the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelEmitter {
    /// Creates an emitter and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelEmitter { tx }, rx)
    }

    fn send(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl SyncEventEmitter for ChannelEmitter {
    fn emit_mode(&self, mode: Mode) {
        self.send(SyncEvent::Mode { mode });
    }

    fn emit_unreachable(&self, table: &str, reason: &str) {
        self.send(SyncEvent::Unreachable {
            table: table.to_string(),
            reason: reason.to_string(),
        });
    }

    fn emit_notice(&self, message: &str) {
        self.send(SyncEvent::Notice {
            message: message.to_string(),
        });
    }

    fn emit_progress(&self, pending: i64, replayed: usize) {
        self.send(SyncEvent::Progress { pending, replayed });
    }

    fn emit_error(&self, message: &str, retryable: bool) {
        self.send(SyncEvent::Error {
            message: message.to_string(),
            retryable,
        });
    }
}

/// Drains every event currently buffered in a receiver.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

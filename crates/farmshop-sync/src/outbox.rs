//! # Outbox Processor
//!
//! Replays queued writes against the backend, strictly in enqueue order.
//!
//! ## Drain Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Outbox Drain                                   │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    sync_outbox Table                            │   │
//! │  │                                                                 │   │
//! │  │  id | table  | operation | payload | retry_count | next_attempt │   │
//! │  │  ───┼────────┼───────────┼─────────┼─────────────┼──────────────│   │
//! │  │  1  │ orders │ insert    │ {...}   │ 0           │ NULL         │   │
//! │  │  2  │ orders │ update    │ {...}   │ 0           │ NULL         │   │
//! │  │  3  │ orders │ delete    │ {...}   │ 0           │ NULL         │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               │ list_pending() (id order)               │
//! │                               ▼                                         │
//! │  for each item:                                                         │
//! │    not due yet           → stop (later items wait behind it)            │
//! │    update/delete, no id  → dead letter without sending, continue        │
//! │    2xx                   → remove                                       │
//! │    404 on delete         → remove (already gone)                        │
//! │    retryable failure     → retry_count += 1, next_attempt_at = backoff  │
//! │                            (dead letter once max_retries is reached)    │
//! │                            stop                                         │
//! │    other 4xx             → dead letter, continue                        │
//! │    storage error         → propagate                                    │
//! │                                                                         │
//! │  BACKOFF: initial 1s, x2 per failure, capped at 300s (configurable)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use farmshop_core::{Operation, OutboxItem};

use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::transport::{Request, Transport};

// =============================================================================
// Retry Policy
// =============================================================================

/// When a failed item may be retried, and when it is given up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        RetryPolicy {
            max_retries: config.outbox.max_retries,
            initial: config.initial_backoff(),
            max: config.max_backoff(),
        }
    }

    /// Delay before the next attempt of an item that has failed
    /// `retry_count` times (1 = first failure).
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let mut backoff = self.create_backoff();

        let mut delay = self.initial;
        for _ in 0..retry_count.max(1) {
            match backoff.next_backoff() {
                Some(next) => delay = next,
                None => break,
            }
            if delay >= self.max {
                break;
            }
        }
        delay.min(self.max)
    }

    /// True once an item with `retry_count` failures should be dead-lettered.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial,
            max_interval: self.max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }
}

// =============================================================================
// Drain Report
// =============================================================================

/// Result of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Items acknowledged by the backend and removed.
    pub replayed: usize,
    /// Items that failed and stay queued for a later pass.
    pub failed: usize,
    /// Items moved to the dead-letter set.
    pub dead_lettered: usize,
    /// Items still pending after the pass.
    pub remaining: i64,
    /// The pass stopped at an item still inside its backoff window.
    pub deferred: bool,
    pub last_error: Option<String>,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.dead_lettered == 0 && self.remaining == 0
    }
}

/// What happened to one replayed item.
enum Replay {
    Acked,
    Retry(SyncError),
    Reject(SyncError),
}

// =============================================================================
// Outbox Processor
// =============================================================================

/// Drains the offline outbox through the backend transport.
pub struct OutboxProcessor {
    ctx: Arc<SyncContext>,

    /// Auth+Http stack. Replays must not pass through the fallback layer,
    /// which would capture a failed replay back into the outbox.
    transport: Arc<dyn Transport>,

    policy: RetryPolicy,

    /// One drain at a time.
    drain_lock: Mutex<()>,
}

impl OutboxProcessor {
    pub fn new(ctx: Arc<SyncContext>, transport: Arc<dyn Transport>) -> Self {
        let policy = RetryPolicy::from_config(ctx.config());
        Self::with_policy(ctx, transport, policy)
    }

    pub fn with_policy(ctx: Arc<SyncContext>, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        OutboxProcessor {
            ctx,
            transport,
            policy,
            drain_lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Replays pending items in order until the queue is empty or an item
    /// can't be delivered yet.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let _guard = self.drain_lock.lock().await;
        let outbox = self.ctx.db().outbox();

        let pending = outbox.list_pending().await?;
        let mut report = DrainReport::default();

        if pending.is_empty() {
            debug!("No pending outbox items");
            return Ok(report);
        }

        info!(count = pending.len(), "Draining outbox");
        let now = Utc::now();

        for item in pending {
            if !item.is_due(now) {
                debug!(id = item.id, next_attempt_at = ?item.next_attempt_at, "Outbox item not due yet");
                report.deferred = true;
                break;
            }

            match self.replay(&item).await? {
                Replay::Acked => {
                    outbox.remove(item.id).await?;
                    self.ctx.mark_reachable();
                    report.replayed += 1;
                    debug!(id = item.id, table = %item.table, operation = %item.operation, "Outbox item replayed");
                }

                Replay::Retry(e) => {
                    if e.is_network() {
                        self.ctx.mark_unreachable(&item.table, &e.to_string());
                    }
                    self.schedule_retry(&item, &e, now, &mut report).await?;
                    report.last_error = Some(e.to_string());
                    break;
                }

                Replay::Reject(e) => {
                    let reason = match e.status() {
                        Some(_) => format!("rejected by backend: {}", e),
                        None => format!("not replayable: {}", e),
                    };
                    warn!(id = item.id, table = %item.table, reason = %reason, "Outbox item dead-lettered");
                    outbox.move_to_dead_letter(item.id, &reason).await?;
                    report.dead_lettered += 1;
                    report.last_error = Some(e.to_string());
                }
            }
        }

        report.remaining = outbox.count_pending().await?;
        self.ctx.emitter().emit_progress(report.remaining, report.replayed);

        info!(
            replayed = report.replayed,
            failed = report.failed,
            dead_lettered = report.dead_lettered,
            remaining = report.remaining,
            "Outbox drain finished"
        );
        Ok(report)
    }

    async fn replay(&self, item: &OutboxItem) -> SyncResult<Replay> {
        let config = self.ctx.config();
        let remote_table = self.ctx.tables().to_remote(&item.table);

        // Without an id the URL would address the whole remote table.
        let record_id = match item.operation {
            Operation::Insert => None,
            Operation::Update | Operation::Delete => match item.record_id() {
                Some(id) => Some(id),
                None => {
                    return Ok(Replay::Reject(SyncError::InvalidInput(format!(
                        "{} on {} has no record id",
                        item.operation, item.table
                    ))))
                }
            },
        };
        let url = config.table_url(remote_table, record_id.as_deref());

        let request = Request::for_operation(item.operation, url, &item.payload);
        let result = match self.transport.send(request).await {
            Ok(response) => response.error_for_status().map(|_| ()),
            Err(e) => Err(e),
        };

        Ok(match result {
            Ok(()) => Replay::Acked,
            Err(e) if e.is_storage() => return Err(e),
            Err(e) if item.operation == Operation::Delete && e.status() == Some(404) => {
                debug!(id = item.id, "Delete target already gone on backend");
                Replay::Acked
            }
            Err(e) if e.is_retryable() => Replay::Retry(e),
            Err(e) => Replay::Reject(e),
        })
    }

    async fn schedule_retry(
        &self,
        item: &OutboxItem,
        err: &SyncError,
        now: DateTime<Utc>,
        report: &mut DrainReport,
    ) -> SyncResult<()> {
        let outbox = self.ctx.db().outbox();
        let failures = item.retry_count + 1;

        if self.policy.is_exhausted(failures) {
            outbox.record_failure(item.id, &err.to_string(), None).await?;
            let reason = format!("gave up after {} attempts: {}", failures, err);
            outbox.move_to_dead_letter(item.id, &reason).await?;
            error!(id = item.id, table = %item.table, attempts = failures, "Outbox item exhausted its retries");
            report.dead_lettered += 1;
            return Ok(());
        }

        let delay = self.policy.delay_for(failures);
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d));

        outbox.record_failure(item.id, &err.to_string(), next_attempt_at).await?;
        warn!(
            id = item.id,
            table = %item.table,
            attempt = failures,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "Outbox replay failed"
        );
        report.failed += 1;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

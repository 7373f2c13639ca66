//! # Sync Agent
//!
//! Main entry point of the sync layer. Owns the mode controller, the
//! outbox processor and the connectivity probe, and runs the background
//! probe + drain loop.
//!
//! ## Agent Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        SyncAgent Architecture                           │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                         SyncAgent                                │  │
//! │  │                                                                  │  │
//! │  │  • fetch_table / write: table calls through the active transport │  │
//! │  │  • sync_now: probe, then drain the outbox                        │  │
//! │  │  • start / shutdown: interval loop running sync_now              │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ ModeController │  │OutboxProcessor │  │ ConnectivityProbe      │    │
//! │  │                │  │                │  │                        │    │
//! │  │ local/remote   │  │ FIFO replay of │  │ bounded GET, flips     │    │
//! │  │ transport      │  │ queued writes  │  │ reachability           │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  EVENTS (to the UI): mode, unreachable (once), notice, progress, error  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use farmshop_core::record::{apply_operation, record_id};
use farmshop_core::validation::validate_table_key;
use farmshop_core::{Mode, Operation, Record};
use farmshop_db::Database;

use crate::auth::AuthTransport;
use crate::config::SyncConfig;
use crate::context::SyncContext;
use crate::error::{SyncError, SyncResult};
use crate::events::{NoOpEmitter, SyncEventEmitter};
use crate::mode::ModeController;
use crate::outbox::{DrainReport, OutboxProcessor};
use crate::probe::ConnectivityProbe;
use crate::sms::{PayloadSigner, SmsNotifier};
use crate::transport::{HttpTransport, Layer, Request, ResponseSource, Transport};

// =============================================================================
// Sync Status
// =============================================================================

/// Snapshot of the sync layer for external queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncStatus {
    pub mode: Mode,

    /// Current belief about the backend.
    pub reachable: bool,

    /// Whether the local-mode interceptor is installed.
    pub interceptor_installed: bool,

    pub remote_enabled: bool,

    /// Writes waiting for replay.
    pub pending_count: i64,

    /// Writes given up on.
    pub dead_letter_count: i64,

    pub last_drain_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,

    pub session_id: Uuid,
}

/// How a write was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The backend accepted it.
    Sent,
    /// The backend is unavailable; queued in the outbox for replay.
    Queued,
    /// Local mode; applied to the cache.
    Local,
}

#[derive(Debug, Default)]
struct RunState {
    last_drain_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

// =============================================================================
// Agent internals (shared with the background task)
// =============================================================================

struct AgentInner {
    ctx: Arc<SyncContext>,
    modes: ModeController,
    outbox: OutboxProcessor,
    probe: ConnectivityProbe,
    run: RwLock<RunState>,
}

impl AgentInner {
    async fn sync_now(&self) -> SyncResult<DrainReport> {
        if !self.modes.is_remote_enabled() {
            debug!(mode = %self.modes.current_mode(), "Remote disabled, skipping sync");
            let remaining = self.ctx.db().outbox().count_pending().await?;
            return Ok(DrainReport {
                remaining,
                ..Default::default()
            });
        }

        if !self.probe.check().await {
            let remaining = self.ctx.db().outbox().count_pending().await?;
            let mut run = self.run.write().await;
            run.last_error = Some("backend unreachable".to_string());
            return Ok(DrainReport {
                remaining,
                last_error: run.last_error.clone(),
                ..Default::default()
            });
        }

        let report = self.outbox.drain().await;

        let mut run = self.run.write().await;
        run.last_drain_at = Some(Utc::now());

        match report {
            Ok(report) => {
                if let Some(ref e) = report.last_error {
                    self.ctx.emitter().emit_error(e, report.failed > 0);
                }
                run.last_error = report.last_error.clone();
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Outbox drain failed");
                self.ctx.emitter().emit_error(&e.to_string(), e.is_retryable());
                run.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn status(&self) -> SyncResult<SyncStatus> {
        let outbox = self.ctx.db().outbox();
        let pending_count = outbox.count_pending().await?;
        let dead_letter_count = outbox.count_dead_letters().await?;
        let run = self.run.read().await;

        Ok(SyncStatus {
            mode: self.modes.current_mode(),
            reachable: self.ctx.is_reachable(),
            interceptor_installed: self.modes.is_interceptor_installed(),
            remote_enabled: self.modes.is_remote_enabled(),
            pending_count,
            dead_letter_count,
            last_drain_at: run.last_drain_at,
            last_error: run.last_error.clone(),
            session_id: self.ctx.session_id(),
        })
    }

    /// Background loop: one sync per interval until shutdown.
    async fn run(self: Arc<Self>, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("Sync loop starting");

        let mut interval = tokio::time::interval(self.ctx.config().poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sync_now().await {
                        error!(?e, "Sync cycle failed");
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Sync loop shutting down");
                    break;
                }
            }
        }

        info!("Sync loop stopped");
    }
}

// =============================================================================
// Sync Agent
// =============================================================================

/// Orchestrates table access, mode switching and outbox replay.
pub struct SyncAgent {
    inner: Arc<AgentInner>,

    /// Shutdown sender (set while the loop runs).
    shutdown_tx: Option<mpsc::Sender<()>>,

    /// Background loop task.
    task: Option<JoinHandle<()>>,
}

impl SyncAgent {
    /// Creates an agent that talks to the configured backend over HTTP.
    pub fn new(config: SyncConfig, db: Database) -> SyncResult<Self> {
        SyncAgentBuilder::new(config).with_database(db).build()
    }

    /// Creates an agent over an existing context and innermost transport.
    ///
    /// The auth layer is added here; `transport` should be the raw sender.
    pub fn with_transport(ctx: Arc<SyncContext>, transport: Arc<dyn Transport>) -> SyncResult<Self> {
        let base = AuthTransport::wrap(transport, &ctx.config().backend)?;

        let inner = AgentInner {
            modes: ModeController::new(ctx.clone(), base.clone()),
            outbox: OutboxProcessor::new(ctx.clone(), base.clone()),
            probe: ConnectivityProbe::new(ctx.clone(), base),
            run: RwLock::new(RunState::default()),
            ctx,
        };

        Ok(SyncAgent {
            inner: Arc::new(inner),
            shutdown_tx: None,
            task: None,
        })
    }

    /// Resolves and applies the session mode. Idempotent.
    pub async fn initialize(&self) -> SyncResult<Mode> {
        self.inner.modes.initialize().await
    }

    // =========================================================================
    // Table access
    // =========================================================================

    /// Reads a whole table.
    ///
    /// Remote answers refresh the cache, with writes still waiting in the
    /// outbox applied on top so they stay visible until replayed. When no
    /// response arrives at all the cached rows are returned instead.
    pub async fn fetch_table(&self, table: &str) -> SyncResult<Vec<Record>> {
        validate_table_key(table)?;
        let ctx = &self.inner.ctx;

        let url = ctx.config().table_url(ctx.tables().to_remote(table), None);
        let transport = self.inner.modes.transport();

        match transport.send(Request::get(url)).await {
            Ok(response) => match response.source() {
                ResponseSource::Remote => {
                    let mut rows = response.error_for_status()?.envelope().data;

                    let pending = ctx.db().outbox().list_pending().await?;
                    let mut overlaid = 0;
                    for item in pending.iter().filter(|i| i.table == table) {
                        apply_operation(&mut rows, item.operation, &item.payload);
                        overlaid += 1;
                    }

                    ctx.db().cache().set(table, &rows).await?;
                    debug!(table = %table, rows = rows.len(), overlaid, "Cache refreshed from backend");
                    Ok(rows)
                }
                ResponseSource::Local | ResponseSource::Fallback => Ok(response.envelope().data),
            },

            Err(e) if e.is_network() => {
                warn!(table = %table, error = %e, "Backend unreachable, reading cache");
                Ok(ctx.db().cache().get(table).await?.unwrap_or_default())
            }

            Err(e) => Err(e),
        }
    }

    /// Reads a table from the cache if it is younger than `cache.max_age_secs`,
    /// otherwise like [`fetch_table`](Self::fetch_table).
    pub async fn read_table(&self, table: &str) -> SyncResult<Vec<Record>> {
        let cache = self.inner.ctx.db().cache();

        if cache.is_valid(table, self.inner.ctx.config().cache_max_age()).await? {
            if let Some(rows) = cache.get(table).await? {
                debug!(table = %table, "Serving fresh cache");
                return Ok(rows);
            }
        }

        self.fetch_table(table).await
    }

    /// Performs one write.
    ///
    /// While earlier writes wait in the outbox a new one queues behind them
    /// instead of reaching the backend first.
    pub async fn write(&self, table: &str, operation: Operation, payload: Record) -> SyncResult<WriteOutcome> {
        validate_table_key(table)?;
        let ctx = &self.inner.ctx;

        let id = match operation {
            Operation::Insert => None,
            Operation::Update | Operation::Delete => Some(record_id(&payload).ok_or_else(|| {
                SyncError::InvalidInput(format!("{} on {} needs an id", operation, table))
            })?),
        };

        let transport = self.inner.modes.transport();
        let intercepted = transport.has_layer(Layer::LocalInterceptor);

        if !intercepted && ctx.db().outbox().count_pending().await? > 0 {
            let queued = self.queue_write(table, operation, &payload).await?;
            debug!(id = queued, table = %table, operation = %operation, "Earlier writes pending, write queued behind them");
            return Ok(WriteOutcome::Queued);
        }

        let url = ctx.config().table_url(ctx.tables().to_remote(table), id.as_deref());
        let request = Request::for_operation(operation, url, &payload);

        match transport.send(request).await {
            Ok(response) => match response.source() {
                ResponseSource::Local => Ok(WriteOutcome::Local),
                ResponseSource::Fallback => Ok(WriteOutcome::Queued),
                ResponseSource::Remote => {
                    response.error_for_status()?;
                    ctx.db().cache().apply(table, operation, &payload).await?;
                    Ok(WriteOutcome::Sent)
                }
            },

            Err(e) if e.is_network() => {
                let queued = self.queue_write(table, operation, &payload).await?;
                info!(id = queued, table = %table, operation = %operation, "Backend unreachable, write queued");
                Ok(WriteOutcome::Queued)
            }

            Err(e) => Err(e),
        }
    }

    async fn queue_write(&self, table: &str, operation: Operation, payload: &Record) -> SyncResult<i64> {
        let db = self.inner.ctx.db();
        let id = db.outbox().enqueue(table, operation, payload).await?;
        db.cache().apply(table, operation, payload).await?;
        Ok(id)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Probes the backend and, if it answers, drains the outbox.
    ///
    /// Does nothing in local mode.
    pub async fn sync_now(&self) -> SyncResult<DrainReport> {
        self.inner.sync_now().await
    }

    /// Returns the current sync status.
    pub async fn status(&self) -> SyncResult<SyncStatus> {
        self.inner.status().await
    }

    /// Initializes the mode and spawns the background sync loop.
    pub async fn start(&mut self) -> SyncResult<()> {
        if self.task.is_some() {
            debug!("Sync agent already running");
            return Ok(());
        }

        let mode = self.initialize().await?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(tokio::spawn(self.inner.clone().run(shutdown_rx)));

        info!(
            mode = %mode,
            backend = %self.inner.ctx.config().backend_url(),
            session = %self.inner.ctx.session_id(),
            "Sync agent started"
        );
        Ok(())
    }

    /// Stops the background loop and waits for it to finish.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down sync agent");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| SyncError::Internal(format!("sync loop panicked: {}", e)))?;
        }

        info!("Sync agent stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// A handle for controlling the running loop from elsewhere.
    pub fn handle(&self) -> Option<SyncAgentHandle> {
        self.shutdown_tx
            .clone()
            .map(|shutdown_tx| SyncAgentHandle::new(shutdown_tx, self.inner.clone()))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn mode_controller(&self) -> &ModeController {
        &self.inner.modes
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.inner.ctx
    }

    pub fn outbox_processor(&self) -> &OutboxProcessor {
        &self.inner.outbox
    }

    /// SMS notifier sending through this agent's authenticated transport.
    pub fn sms_notifier(&self, signer: Arc<dyn PayloadSigner>) -> Arc<SmsNotifier> {
        Arc::new(SmsNotifier::new(
            self.inner.ctx.clone(),
            self.inner.modes.base_transport(),
            signer,
        ))
    }
}

// =============================================================================
// Agent Handle (for external control)
// =============================================================================

/// Handle for a running [`SyncAgent`], usable from other tasks.
#[derive(Clone)]
pub struct SyncAgentHandle {
    shutdown_tx: mpsc::Sender<()>,
    inner: Arc<AgentInner>,
}

impl SyncAgentHandle {
    fn new(shutdown_tx: mpsc::Sender<()>, inner: Arc<AgentInner>) -> Self {
        SyncAgentHandle { shutdown_tx, inner }
    }

    pub async fn status(&self) -> SyncResult<SyncStatus> {
        self.inner.status().await
    }

    /// Runs a sync cycle now instead of waiting for the next tick.
    pub async fn sync_now(&self) -> SyncResult<DrainReport> {
        self.inner.sync_now().await
    }

    /// Signals the loop to stop. Does not wait for it.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating a SyncAgent with options.
pub struct SyncAgentBuilder {
    config: SyncConfig,
    db: Option<Database>,
    emitter: Option<Arc<dyn SyncEventEmitter>>,
    transport: Option<Arc<dyn Transport>>,
}

impl SyncAgentBuilder {
    pub fn new(config: SyncConfig) -> Self {
        SyncAgentBuilder {
            config,
            db: None,
            emitter: None,
            transport: None,
        }
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_emitter(mut self, emitter: Arc<dyn SyncEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Replaces the HTTP transport, e.g. with a test double.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validates the config and builds the agent.
    pub fn build(self) -> SyncResult<SyncAgent> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| SyncError::InvalidConfig("Database required".into()))?;

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.request_timeout())?),
        };

        let ctx = SyncContext::with_emitter(self.config, db, emitter);
        SyncAgent::with_transport(ctx, transport)
    }
}

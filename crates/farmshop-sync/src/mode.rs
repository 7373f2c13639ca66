//! # Mode Controller
//!
//! The single authority over the session's [`Mode`]. Every table read and
//! write goes through [`ModeController::transport`], whose outer decorator
//! the controller picks from the current mode.
//!
//! ## Mode State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   initialize()                                                          │
//! │     preference ("data_mode") ─┐                                         │
//! │     or config default         ├─► force-local? ──yes──► LOCAL           │
//! │                               │         │no                            │
//! │                               │         ▼                               │
//! │                               └──────► resolved mode                    │
//! │                                                                         │
//! │   switch_mode(target)                                                   │
//! │     target == REMOTE && force-local ──► false + notice, no change       │
//! │     otherwise ──► persist, apply, emit ──► true                         │
//! │                                                                         │
//! │   apply_mode(mode)           active transport                           │
//! │     LOCAL  ──────────────►   LocalTransport(base)     remote disabled   │
//! │     REMOTE ──────────────►   FallbackTransport(base)  remote enabled    │
//! │                                                                         │
//! │   `base` is the shared Auth+Http stack. The active transport is always  │
//! │   rebuilt from it, so applying a mode twice never stacks interceptors. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use farmshop_core::{Mode, MODE_PREFERENCE_KEY};

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::fallback::FallbackTransport;
use crate::local::LocalTransport;
use crate::transport::{Layer, Transport};

/// Message shown when force-local blocks a switch to remote.
pub const FORCE_LOCAL_NOTICE: &str =
    "Remote mode is disabled on this installation; staying in local mode";

struct ModeState {
    mode: Mode,
    active: Arc<dyn Transport>,
    interceptor_installed: bool,
    remote_enabled: bool,
}

/// Owns the current mode and the transport it selects.
pub struct ModeController {
    ctx: Arc<SyncContext>,
    base: Arc<dyn Transport>,
    state: RwLock<ModeState>,
    /// Serialises initialize/switch so persisted and applied modes agree.
    transition: Mutex<()>,
}

impl ModeController {
    /// Creates a controller over `base`.
    ///
    /// Nothing is applied until [`initialize`](Self::initialize); until
    /// then requests go through `base` in the config's default mode.
    pub fn new(ctx: Arc<SyncContext>, base: Arc<dyn Transport>) -> Self {
        let mode = ctx.config().mode.default;

        ModeController {
            state: RwLock::new(ModeState {
                mode,
                active: base.clone(),
                interceptor_installed: false,
                remote_enabled: false,
            }),
            ctx,
            base,
            transition: Mutex::new(()),
        }
    }

    /// Resolves the session's mode and applies it.
    ///
    /// Safe to call repeatedly; each call re-applies the resolved mode.
    pub async fn initialize(&self) -> SyncResult<Mode> {
        let _guard = self.transition.lock().await;

        let preferred = self.load_preference().await?;
        let resolved = if self.ctx.config().remote_allowed() {
            preferred
        } else {
            if preferred == Mode::Remote {
                info!("Remote access disabled, pinning local mode over stored preference");
            }
            Mode::Local
        };

        let applied = self.apply_mode(resolved);
        self.ctx.emitter().emit_mode(applied);

        info!(mode = %applied, session = %self.ctx.session_id(), "Mode controller initialized");
        Ok(applied)
    }

    /// Switches to `target`. Returns false, changing nothing, if the switch
    /// is not allowed.
    pub async fn switch_mode(&self, target: Mode) -> SyncResult<bool> {
        let _guard = self.transition.lock().await;

        if !self.can_switch_to(target) {
            warn!(target = %target, "Rejected mode switch, remote access disabled");
            self.ctx.emitter().emit_notice(FORCE_LOCAL_NOTICE);
            return Ok(false);
        }

        self.ctx
            .db()
            .preferences()
            .set(MODE_PREFERENCE_KEY, target.as_str())
            .await?;

        let applied = self.apply_mode(target);
        self.ctx.emitter().emit_mode(applied);

        info!(mode = %applied, "Mode switched");
        Ok(true)
    }

    /// Installs the transport for `mode` and returns the mode in effect.
    ///
    /// Remote falls back to local when remote access is not allowed.
    /// Reentrant: the active transport is rebuilt from the base stack.
    pub fn apply_mode(&self, mode: Mode) -> Mode {
        let mode = if mode == Mode::Remote && !self.ctx.config().remote_allowed() {
            Mode::Local
        } else {
            mode
        };

        let active = match mode {
            Mode::Local => LocalTransport::wrap(self.base.clone(), self.ctx.clone()),
            Mode::Remote => FallbackTransport::wrap(self.base.clone(), self.ctx.clone()),
        };

        let mut state = self.write_state();
        let was_installed = state.interceptor_installed;

        state.mode = mode;
        state.interceptor_installed = active.has_layer(Layer::LocalInterceptor);
        state.remote_enabled = mode == Mode::Remote;
        state.active = active;

        match (was_installed, state.interceptor_installed) {
            (false, true) => info!("Local interceptor installed"),
            (true, false) => info!("Local interceptor removed"),
            _ => debug!(mode = %mode, "Mode re-applied"),
        }

        mode
    }

    /// The mode in effect.
    pub fn current_mode(&self) -> Mode {
        self.read_state().mode
    }

    /// True unless `mode` is remote and remote access is disabled.
    pub fn can_switch_to(&self, mode: Mode) -> bool {
        mode == Mode::Local || self.ctx.config().remote_allowed()
    }

    /// The transport table calls go through in the current mode.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.read_state().active.clone()
    }

    /// The undecorated Auth+Http stack, used for replay and probing.
    pub fn base_transport(&self) -> Arc<dyn Transport> {
        self.base.clone()
    }

    pub fn is_interceptor_installed(&self) -> bool {
        self.read_state().interceptor_installed
    }

    pub fn is_remote_enabled(&self) -> bool {
        self.read_state().remote_enabled
    }

    async fn load_preference(&self) -> SyncResult<Mode> {
        let default = self.ctx.config().mode.default;

        let stored = self.ctx.db().preferences().get(MODE_PREFERENCE_KEY).await?;
        let mode = match stored {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!(value = %value, "Ignoring unrecognised stored mode");
                default
            }),
            None => default,
        };

        Ok(mode)
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ModeState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ModeState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ModeController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("ModeController")
            .field("mode", &state.mode)
            .field("interceptor_installed", &state.interceptor_installed)
            .field("remote_enabled", &state.remote_enabled)
            .finish()
    }
}

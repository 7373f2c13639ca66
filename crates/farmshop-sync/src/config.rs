//! # Sync Configuration
//!
//! Configuration management for the sync layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FARMSHOP_FORCE_LOCAL=1                                             │
//! │     FARMSHOP_BACKEND_URL=https://backend.example.com                   │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/farmshop/sync.toml (Linux)                               │
//! │     ~/Library/Application Support/com.farmshop.admin/sync.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     no backend configured → local only                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The persisted mode preference is NOT part of this file: it lives in the
//! local database and is read by the mode controller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use farmshop_core::table::{table_path, TABLES_MARKER};
use farmshop_core::{Mode, TableMap};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Backend
// =============================================================================

/// Connection details for the hosted backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://backend.example.com`.
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Anonymous key sent as `apikey` and as the bearer token.
    #[serde(default)]
    pub anon_key: String,

    /// When true every backend call is bypassed in favour of local storage.
    #[serde(default)]
    pub disabled: bool,

    /// Path under the base URL where table resources live.
    #[serde(default = "default_tables_path")]
    pub tables_path: String,

    /// Per-request timeout (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:54321".to_string()
}

fn default_tables_path() -> String {
    "/tables".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendConfig {
    /// Without a `[backend]` section there is nothing to talk to.
    fn default() -> Self {
        BackendConfig {
            url: default_backend_url(),
            anon_key: String::new(),
            disabled: true,
            tables_path: default_tables_path(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Mode
// =============================================================================

/// Mode selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    /// Mode used when no preference has been persisted yet.
    #[serde(default = "default_mode")]
    pub default: Mode,

    /// Operational kill-switch: pins the session to local mode.
    #[serde(default)]
    pub force_local: bool,
}

fn default_mode() -> Mode {
    Mode::Remote
}

impl Default for ModeSettings {
    fn default() -> Self {
        ModeSettings {
            default: default_mode(),
            force_local: false,
        }
    }
}

// =============================================================================
// Tables, cache, outbox, probe, SMS
// =============================================================================

/// Logical → physical table names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSettings {
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

impl Default for TableSettings {
    fn default() -> Self {
        TableSettings {
            aliases: TableMap::default().aliases().clone(),
        }
    }
}

/// Local cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Age after which a snapshot is considered stale (seconds).
    #[serde(default = "default_cache_max_age")]
    pub max_age_secs: u64,
}

fn default_cache_max_age() -> u64 {
    300
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            max_age_secs: default_cache_max_age(),
        }
    }
}

/// Outbox replay settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Failed replays before an item is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Retry delay cap (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Queue writes made in local mode for later replay.
    #[serde(default = "default_true")]
    pub record_local_writes: bool,

    /// Interval between background probe + drain cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_max_retries() -> u32 {
    8
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
fn default_poll_interval() -> u64 {
    15
}

impl Default for OutboxSettings {
    fn default() -> Self {
        OutboxSettings {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            record_local_writes: true,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

/// Connectivity probe settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSettings {
    /// Path under the backend URL answered by a cheap GET.
    #[serde(default = "default_probe_path")]
    pub path: String,

    /// Bounded wait before the probe counts as failed (seconds).
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_probe_path() -> String {
    "/health".to_string()
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for ProbeSettings {
    fn default() -> Self {
        ProbeSettings {
            path: default_probe_path(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

/// SMS gateway settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmsSettings {
    /// Gateway endpoint. Notifications fail (and are logged) while unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Sender name shown on the handset.
    #[serde(default = "default_sender")]
    pub sender: String,
}

fn default_sender() -> String {
    "FarmShop".to_string()
}

impl Default for SmsSettings {
    fn default() -> Self {
        SmsSettings {
            endpoint: None,
            sender: default_sender(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete sync configuration.
///
/// ## Example Config File
/// ```toml
/// [backend]
/// url = "https://backend.example.com"
/// anon_key = "public-anon-key"
///
/// [mode]
/// default = "remote"
/// force_local = false
///
/// [tables.aliases]
/// customers = "farm_customers"
///
/// [outbox]
/// max_retries = 8
/// initial_backoff_ms = 1000
/// max_backoff_secs = 300
///
/// [probe]
/// path = "/health"
/// timeout_secs = 5
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub mode: ModeSettings,

    #[serde(default)]
    pub tables: TableSettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub outbox: OutboxSettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub sms: SmsSettings,
}

impl SyncConfig {
    /// Creates a config pointing at a backend, with defaults elsewhere.
    pub fn for_backend(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        SyncConfig {
            backend: BackendConfig {
                url: url.into(),
                anon_key: anon_key.into(),
                disabled: false,
                ..BackendConfig::default()
            },
            ..Self::default()
        }
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (sync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = Url::parse(&self.backend.url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SyncError::InvalidUrl(format!(
                "Backend URL must start with http:// or https://, got: {}",
                self.backend.url
            )));
        }

        if !self.backend.disabled && self.backend.anon_key.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "anon_key is required while the backend is enabled".into(),
            ));
        }

        // Table-name extraction keys off the `tables/` marker.
        let marker = TABLES_MARKER.trim_end_matches('/');
        if !self.backend.tables_path.trim_end_matches('/').ends_with(marker) {
            return Err(SyncError::InvalidConfig(format!(
                "tables_path must end with '/{}', got: {}",
                marker, self.backend.tables_path
            )));
        }

        if self.probe.timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "probe.timeout_secs must be greater than 0".into(),
            ));
        }

        if Duration::from_millis(self.outbox.initial_backoff_ms) > self.max_backoff() {
            return Err(SyncError::InvalidConfig(
                "outbox.initial_backoff_ms must not exceed outbox.max_backoff_secs".into(),
            ));
        }

        if let Some(ref endpoint) = self.sms.endpoint {
            Url::parse(endpoint)?;
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup (the process environment in
    /// production).
    pub(crate) fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FARMSHOP_BACKEND_URL") {
            debug!(url = %url, "Overriding backend URL from environment");
            self.backend.url = url;
        }

        if let Some(key) = lookup("FARMSHOP_ANON_KEY") {
            self.backend.anon_key = key;
        }

        if let Some(flag) = lookup("FARMSHOP_BACKEND_DISABLED") {
            match parse_flag(&flag) {
                Some(disabled) => self.backend.disabled = disabled,
                None => warn!(value = %flag, "Ignoring FARMSHOP_BACKEND_DISABLED"),
            }
        }

        if let Some(flag) = lookup("FARMSHOP_FORCE_LOCAL") {
            match parse_flag(&flag) {
                Some(force) => {
                    debug!(force_local = force, "Overriding force-local from environment");
                    self.mode.force_local = force;
                }
                None => warn!(value = %flag, "Ignoring FARMSHOP_FORCE_LOCAL"),
            }
        }

        if let Some(mode) = lookup("FARMSHOP_DEFAULT_MODE") {
            match mode.parse() {
                Ok(parsed) => self.mode.default = parsed,
                Err(e) => warn!(error = %e, "Ignoring FARMSHOP_DEFAULT_MODE"),
            }
        }

        if let Some(secs) = lookup("FARMSHOP_PROBE_TIMEOUT_SECS") {
            if let Ok(s) = secs.parse::<u64>() {
                self.probe.timeout_secs = s;
            }
        }

        if let Some(endpoint) = lookup("FARMSHOP_SMS_ENDPOINT") {
            self.sms.endpoint = Some(endpoint);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "farmshop", "admin").map(|dirs| {
            let config_dir = dirs.config_dir();
            config_dir.join("sync.toml")
        })
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// True unless force-local is set or the backend is disabled.
    pub fn remote_allowed(&self) -> bool {
        !self.mode.force_local && !self.backend.disabled
    }

    /// Backend base URL without a trailing slash.
    pub fn backend_url(&self) -> &str {
        self.backend.url.trim_end_matches('/')
    }

    /// Full URL of a table resource, or of one record in it.
    ///
    /// `remote_table` is the physical name; map logical keys first.
    pub fn table_url(&self, remote_table: &str, record_id: Option<&str>) -> String {
        let prefix = self
            .backend
            .tables_path
            .trim_end_matches('/')
            .trim_end_matches(TABLES_MARKER.trim_end_matches('/'));

        format!(
            "{}{}{}",
            self.backend_url(),
            prefix,
            table_path(remote_table, record_id)
        )
    }

    /// True if `target` has the backend's scheme, host and port.
    pub fn is_backend_url(&self, target: &str) -> bool {
        match (Url::parse(self.backend_url()), Url::parse(target)) {
            (Ok(backend), Ok(target)) => backend.origin() == target.origin(),
            _ => false,
        }
    }

    /// Full URL of the connectivity probe.
    pub fn probe_url(&self) -> String {
        format!("{}/{}", self.backend_url(), self.probe.path.trim_start_matches('/'))
    }

    /// The logical → physical table mapping.
    pub fn table_map(&self) -> TableMap {
        TableMap::from_aliases(self.tables.aliases.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe.timeout_secs)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache.max_age_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.outbox.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.outbox.max_backoff_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.outbox.poll_interval_secs.max(1))
    }
}

/// Parses a boolean flag the way operators write them.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Data                │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connection     │  │  Storage (DbError)      │ │
//! │  │  InvalidUrl     │  │  Timeout        │  │  SerializationFailed    │ │
//! │  │  ConfigLoad/Save│  │  HttpStatus     │  │  InvalidInput           │ │
//! │  │                 │  │  BackendDisabled│  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  HANDLING:                                                             │
//! │  • network (no response)  → reachability flips, caller may use cache   │
//! │  • 5xx on a table         → absorbed by the fallback transport         │
//! │  • storage                → always propagated                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use farmshop_core::{CoreError, ValidationError};
use farmshop_db::DbError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid backend or gateway URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// No response: DNS, refused connection, reset, TLS.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// No response within the allowed time.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    /// A request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The backend is switched off; the request was never sent.
    #[error("Backend is disabled for this session")]
    BackendDisabled,

    // =========================================================================
    // Data Errors
    // =========================================================================
    /// Local storage failed. Offline durability is broken.
    #[error("Local storage error: {0}")]
    Storage(#[from] DbError),

    /// Failed to serialize or parse a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Caller-supplied data was rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // SMS Errors
    // =========================================================================
    /// The SMS gateway rejected or never received a message.
    #[error("SMS delivery failed: {0}")]
    SmsFailed(String),

    /// The payload signer failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal sync agent error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

/// Any error before a status line arrives counts as "no response".
impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            SyncError::HttpStatus {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_builder() {
            SyncError::InvalidRequest(err.to_string())
        } else if err.is_decode() {
            SyncError::SerializationFailed(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        SyncError::InvalidInput(err.to_string())
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidInput(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for fallback and retry logic)
// =============================================================================

impl SyncError {
    /// Creates an HttpStatus error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        SyncError::HttpStatus {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if no response was received at all.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::ConnectionFailed(_) | SyncError::Timeout(_))
    }

    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Network failures and timeouts
    /// - 5xx, 408 Request Timeout, 429 Too Many Requests
    ///
    /// ## Non-Retryable Errors
    /// - Any other 4xx (the backend rejected the write itself)
    /// - Configuration, storage and input errors
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_) | SyncError::Timeout(_) => true,
            SyncError::HttpStatus { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Returns true if local storage failed.
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

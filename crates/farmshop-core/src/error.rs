//! # Error Types
//!
//! Domain-specific error types for farmshop-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  farmshop-core errors (this file)                                      │
//! │  ├── CoreError        - Data model errors                              │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  farmshop-db errors (separate crate)                                   │
//! │  └── DbError          - Storage failures                               │
//! │                                                                         │
//! │  farmshop-sync errors (separate crate)                                 │
//! │  └── SyncError        - Transport, config and storage failures         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → caller                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Data model errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A mode string could not be parsed.
    #[error("Unknown mode: '{0}'. Valid options: local, remote")]
    UnknownMode(String),

    /// An outbox operation string could not be parsed.
    #[error("Unknown operation: '{0}'. Valid options: insert, update, delete")]
    UnknownOperation(String),

    /// A payload was expected to be a JSON object.
    ///
    /// ## When This Occurs
    /// - A request body is an array or scalar where a record is required
    /// - A persisted payload has been corrupted
    #[error("Payload for table '{table}' is not a record: {reason}")]
    InvalidRecord { table: String, reason: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too short.
    #[error("{field} must be at least {min} characters")]
    TooShort { field: String, min: usize },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

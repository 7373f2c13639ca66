//! # Validation Module
//!
//! Input validation for values the sync layer hands to external systems.
//!
//! Records themselves are never validated here; only the few fields this
//! layer interprets (table keys, SMS recipients and text).
//!
//! ## Usage
//! ```rust
//! use farmshop_core::validation::{validate_phone_number, validate_sms_message};
//!
//! assert_eq!(validate_phone_number(" +33 6 12 34 56 78 ").unwrap(), "+33612345678");
//! assert!(validate_sms_message("Your order has shipped").is_ok());
//! ```

use crate::error::ValidationError;
use crate::table::is_valid_table_key;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of an SMS body accepted by the gateway.
pub const MAX_SMS_LENGTH: usize = 640;

/// Validates and normalizes a phone number.
///
/// ## Rules
/// - Must not be empty
/// - Spaces, dots, dashes and parentheses are stripped
/// - An optional leading `+`, then 8 to 15 digits
pub fn validate_phone_number(phone: &str) -> ValidationResult<String> {
    let phone = phone.trim();

    if phone.is_empty() {
        return Err(ValidationError::Required {
            field: "phone_number".to_string(),
        });
    }

    let normalized: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '.' | '-' | '(' | ')'))
        .collect();

    let digits = normalized.strip_prefix('+').unwrap_or(&normalized);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone_number".to_string(),
            reason: "must contain only digits and an optional leading +".to_string(),
        });
    }

    if digits.len() < 8 {
        return Err(ValidationError::TooShort {
            field: "phone_number".to_string(),
            min: 8,
        });
    }

    if digits.len() > 15 {
        return Err(ValidationError::TooLong {
            field: "phone_number".to_string(),
            max: 15,
        });
    }

    Ok(normalized)
}

/// Validates an SMS body.
pub fn validate_sms_message(message: &str) -> ValidationResult<()> {
    if message.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "message".to_string(),
        });
    }

    if message.chars().count() > MAX_SMS_LENGTH {
        return Err(ValidationError::TooLong {
            field: "message".to_string(),
            max: MAX_SMS_LENGTH,
        });
    }

    Ok(())
}

/// Validates a logical table key.
pub fn validate_table_key(key: &str) -> ValidationResult<()> {
    if key.is_empty() {
        return Err(ValidationError::Required {
            field: "table".to_string(),
        });
    }

    if !is_valid_table_key(key) {
        return Err(ValidationError::InvalidFormat {
            field: "table".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

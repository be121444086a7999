//! Request validation utilities.
//!
//! Every engine entry point runs its inputs through these helpers before
//! touching the store, so a [`ValidationError`] always means "nothing was
//! read or written".

use std::fmt;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

/// Upper bound for any credit amount accepted from a caller.
pub const MAX_CREDITS: i64 = 1_000_000_000_000;

/// Upper bound for identity strings (hwid, machine id, issued-to).
pub const MAX_IDENTITY_LEN: usize = 256;

static LICENSE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,128}$").expect("license key regex is valid"));

/// Validation error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate that a string is not empty or whitespace only.
///
/// # Example
/// ```
/// use spectre::validation::validate_not_empty;
///
/// assert!(validate_not_empty("hello", "name").is_ok());
/// assert!(validate_not_empty("", "name").is_err());
/// assert!(validate_not_empty("   ", "name").is_err());
/// ```
pub fn validate_not_empty(value: &str, field_name: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field_name, "cannot be empty"))
    } else {
        Ok(())
    }
}

/// Validate string length (in bytes) is within bounds.
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field_name: &str,
) -> ValidationResult<()> {
    let len = value.len();
    if len < min {
        Err(ValidationError::new(
            field_name,
            format!("must be at least {} characters", min),
        ))
    } else if len > max {
        Err(ValidationError::new(
            field_name,
            format!("must be at most {} characters", max),
        ))
    } else {
        Ok(())
    }
}

/// Validate a license key.
///
/// Keys are opaque tokens of 1-128 characters drawn from `[A-Za-z0-9_-]`.
/// This covers generated keys (`SPK-XXXXX-...`), legacy hex keys and
/// admin-chosen custom keys.
///
/// # Example
/// ```
/// use spectre::validation::validate_license_key;
///
/// assert!(validate_license_key("SPK-A2B3C-D4E5F-G6H7J-K8M9N-P2Q3R", "key").is_ok());
/// assert!(validate_license_key("3f2a9c0d41e84b7aa1c2d3e4f5a6b7c8", "key").is_ok());
/// assert!(validate_license_key("has space", "key").is_err());
/// ```
pub fn validate_license_key(value: &str, field_name: &str) -> ValidationResult<()> {
    if LICENSE_KEY_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field_name,
            "invalid license key (1-128 characters: letters, digits, '-' or '_')",
        ))
    }
}

/// Validate an opaque identity string: hwid, machine id or issued-to.
///
/// Must be non-blank, at most [`MAX_IDENTITY_LEN`] bytes, and free of control
/// characters.
pub fn validate_identity(value: &str, field_name: &str) -> ValidationResult<()> {
    validate_not_empty(value, field_name)?;
    validate_length(value, 1, MAX_IDENTITY_LEN, field_name)?;
    if value.chars().any(char::is_control) {
        return Err(ValidationError::new(
            field_name,
            "must not contain control characters",
        ));
    }
    Ok(())
}

/// Validate a credit balance: `0..=MAX_CREDITS`.
pub fn validate_credits(value: i64, field_name: &str) -> ValidationResult<()> {
    if (0..=MAX_CREDITS).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field_name,
            format!("must be between 0 and {MAX_CREDITS}"),
        ))
    }
}

/// Validate a consumption amount: `1..=MAX_CREDITS`.
pub fn validate_amount(value: i64, field_name: &str) -> ValidationResult<()> {
    if (1..=MAX_CREDITS).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::new(
            field_name,
            format!("must be a positive integer no greater than {MAX_CREDITS}"),
        ))
    }
}

/// Parse an ISO 8601 datetime string into a UTC `NaiveDateTime`.
///
/// Accepts formats:
/// - RFC 3339: `2025-12-31T23:59:59Z`
/// - Without timezone: `2025-12-31T23:59:59`
/// - Date only: `2025-12-31` (end of that day)
pub fn parse_datetime(value: &str, field_name: &str) -> ValidationResult<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_utc());
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }

    if let Some(dt) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(23, 59, 59))
    {
        return Ok(dt);
    }

    Err(ValidationError::new(
        field_name,
        "invalid datetime format (expected: ISO 8601, e.g., '2025-12-31T23:59:59Z' or '2025-12-31')",
    ))
}

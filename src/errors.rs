//! Error types shared by the engine, the stores and the HTTP surface.
//!
//! Expected business outcomes of admin and ledger operations (not found,
//! conflict, insufficient credits, ...) are variants of [`LicenseError`] and
//! travel back as the `Err` side of [`LicenseResult`]. Verification reports its
//! denial reasons inside [`crate::engine::VerifyOutcome`] instead.

use thiserror::Error;

use crate::validation::ValidationError;

/// Result alias used across the crate.
pub type LicenseResult<T> = Result<T, LicenseError>;

#[derive(Debug, Error)]
pub enum LicenseError {
    /// A required field is missing or malformed. Never touches storage.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("license not found: {0}")]
    NotFound(String),

    /// Duplicate license key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A trial was already issued for this machine or identity.
    #[error("a trial license was already issued for this machine or identity")]
    TrialAlreadyIssued,

    /// An edit request carried no fields to change.
    #[error("no fields to update")]
    NoFields,

    #[error("insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },

    /// Admin secret missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// The store could not be reached or refused the operation. Retryable.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A persisted record could not be decoded.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The HTTP server could not bind or stopped serving.
    #[error("server error: {0}")]
    ServerError(String),
}

impl LicenseError {
    /// Returns true if the caller may safely retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LicenseError::StorageUnavailable(_))
    }
}

/// Shared error type used across all agenr crates.
///
/// Every public operation fails with exactly one variant; HTTP status
/// mapping happens once at the API boundary.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or status precondition violated.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Authentication failed. Carries no detail about *which* check failed.
    #[error("unauthorized")]
    Unauthorized,

    /// The authenticated key lacks a required scope. The display form is
    /// the exact body returned to clients.
    #[error("Missing required scope: {0}")]
    MissingScope(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Validation failure (malformed identifier, missing field, bad URL).
    #[error("invalid: {0}")]
    Invalid(String),

    /// Store or upstream IO failure; retryable.
    #[error("transient: {0}")]
    Transient(String),

    /// Tamper evidence: broken audit chain, AEAD tag mismatch. Never retried.
    #[error("integrity: {0}")]
    Integrity(String),

    /// Confirmation token, OAuth state, or session past its lifetime.
    #[error("expired: {0}")]
    Expired(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Identifier normalisation shared by the vault, the adapter registry and
//! the API boundary.
//!
//! Service identifiers and adapter platform names pass through the same
//! gate: trim, lowercase, then validate against `[a-z0-9][a-z0-9_-]{0,63}`.
//! Inputs that fail the gate are rejected with [`Error::Invalid`] so the
//! boundary can answer 400 before any store access happens.

use crate::error::{Error, Result};

/// Maximum identifier length after normalisation.
const MAX_IDENT_LEN: usize = 64;

/// Validates a normalised identifier: `[a-z0-9][a-z0-9_-]{0,63}`.
pub fn is_valid_service_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_IDENT_LEN {
        return false;
    }
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c.is_ascii_digit() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

/// Trim + lowercase, then validate. Returns the normalised identifier.
pub fn normalize_service_id(raw: &str) -> Result<String> {
    let normalized = raw.trim().to_ascii_lowercase();
    if !is_valid_service_id(&normalized) {
        return Err(Error::Invalid(format!(
            "invalid service identifier '{raw}': must match [a-z0-9][a-z0-9_-]{{0,63}}"
        )));
    }
    Ok(normalized)
}

/// Platform names use the same gate as service identifiers.
pub fn normalize_platform(raw: &str) -> Result<String> {
    normalize_service_id(raw)
        .map_err(|_| Error::Invalid(format!("invalid platform name '{raw}'")))
}

//! Confirmation tokens: the two-phase execute protocol.
//!
//! `prepare` binds a short-lived, single-use opaque token to a canonical
//! hash of the exact request. Execute presents the token; any mismatch —
//! missing, unknown, expired, different business, different bytes — fails
//! closed with a distinct reason. The token row is deleted only after the
//! whole validation passes, and a concurrent second consume finds the row
//! gone.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use agenr_domain::canonical::canonical_json;
use agenr_domain::error::{Error, Result};
use agenr_store::{db_err, now_ms, sha256_hex, Store};

/// Token lifetime.
pub const CONFIRMATION_TTL_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationRecord {
    pub token: String,
    pub business_id: String,
    pub request_hash: String,
    pub summary: String,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

impl ConfirmationRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            token: row.get("token")?,
            business_id: row.get("business_id")?,
            request_hash: row.get("request_hash")?,
            summary: row.get("summary")?,
            created_at_ms: row.get("created_at_ms")?,
            expires_at_ms: row.get("expires_at_ms")?,
        })
    }
}

/// What `prepare` returns to the client.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedConfirmation {
    pub confirmation_token: String,
    /// Unix milliseconds.
    pub expires_at: i64,
    pub summary: String,
}

/// Canonical request hash: `sha256(business_id + ":" + canonical_json(request))`.
pub fn request_hash(business_id: &str, request: &Value) -> String {
    sha256_hex(&format!("{business_id}:{}", canonical_json(request)))
}

/// Human-readable line shown to the confirming user.
fn summarize(business_id: &str, request: &Value) -> String {
    let amount = request
        .get("amount_cents")
        .or_else(|| request.get("amount"))
        .and_then(Value::as_i64);
    match amount {
        Some(cents) => format!("execute against {business_id} for {cents} cents"),
        None => format!("execute against {business_id}"),
    }
}

/// Phase one: persist a confirmation bound to the canonical request hash.
/// Sweeps expired tokens opportunistically.
pub fn prepare(store: &Store, business_id: &str, request: &Value) -> Result<PreparedConfirmation> {
    sweep_expired(store)?;

    let token = Uuid::new_v4().simple().to_string();
    let now = now_ms();
    let expires_at_ms = now + CONFIRMATION_TTL_MS;
    let summary = summarize(business_id, request);

    let conn = store.lock();
    conn.execute(
        "INSERT INTO confirmation_tokens
            (token, business_id, request_hash, summary, created_at_ms, expires_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            token,
            business_id,
            request_hash(business_id, request),
            summary,
            now,
            expires_at_ms,
        ],
    )
    .map_err(db_err)?;

    Ok(PreparedConfirmation {
        confirmation_token: token,
        expires_at: expires_at_ms,
        summary,
    })
}

/// Phase two: validate the presented token against the submitted request,
/// then consume it. Distinct failure reasons:
///
/// - unknown / already-used token → `Forbidden("Invalid confirmation token")`
/// - expired → `Expired`
/// - business or request-hash mismatch → `Forbidden(...)`
pub fn validate_and_consume(
    store: &Store,
    token: &str,
    business_id: &str,
    request: &Value,
) -> Result<()> {
    use rusqlite::OptionalExtension;
    let record = {
        let conn = store.lock();
        conn.query_row(
            "SELECT * FROM confirmation_tokens WHERE token = ?1",
            [token],
            ConfirmationRecord::from_row,
        )
        .optional()
        .map_err(db_err)?
    }
    .ok_or_else(|| Error::Forbidden("Invalid confirmation token".into()))?;

    if record.expires_at_ms <= now_ms() {
        sweep_expired(store)?;
        return Err(Error::Expired("Confirmation token expired".into()));
    }
    if record.business_id != business_id {
        return Err(Error::Forbidden(
            "Confirmation token was issued for a different business".into(),
        ));
    }
    if record.request_hash != request_hash(business_id, request) {
        return Err(Error::Forbidden(
            "Confirmation token does not match this request".into(),
        ));
    }

    // Consume only after every check passed. A concurrent consumer that
    // lost the race deletes zero rows and fails closed.
    let conn = store.lock();
    let deleted = conn
        .execute("DELETE FROM confirmation_tokens WHERE token = ?1", [token])
        .map_err(db_err)?;
    if deleted == 0 {
        return Err(Error::Forbidden("Invalid confirmation token".into()));
    }
    drop(conn);
    sweep_expired(store)?;
    Ok(())
}

/// Fetch-and-delete without validation. Returns `None` when already gone.
pub fn consume(store: &Store, token: &str) -> Result<Option<ConfirmationRecord>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    let record = conn
        .query_row(
            "SELECT * FROM confirmation_tokens WHERE token = ?1",
            [token],
            ConfirmationRecord::from_row,
        )
        .optional()
        .map_err(db_err)?;
    if record.is_some() {
        conn.execute("DELETE FROM confirmation_tokens WHERE token = ?1", [token])
            .map_err(db_err)?;
    }
    Ok(record)
}

/// Drop expired tokens. Called from prepare and execute.
pub fn sweep_expired(store: &Store) -> Result<usize> {
    let conn = store.lock();
    conn.execute(
        "DELETE FROM confirmation_tokens WHERE expires_at_ms <= ?1",
        [now_ms()],
    )
    .map_err(db_err)
}

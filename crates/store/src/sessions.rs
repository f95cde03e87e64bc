//! Session rows.
//!
//! The plaintext session token exists only in the create response; the row
//! id is its SHA-256. Validation hashes whatever the caller presents, so
//! presenting the stored id itself can never validate (its hash differs).

use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use agenr_domain::error::Result;

use crate::{db_err, now_rfc3339, sha256_hex, Store};

#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub user_id: String,
    pub expires_at: String,
    pub created_at: String,
    pub last_active_at: String,
}

impl SessionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
            last_active_at: row.get("last_active_at")?,
        })
    }
}

/// Create a session for `user_id` with the given lifetime. Returns the
/// plaintext token (handed to the client exactly once) and the stored row.
pub fn create_session(store: &Store, user_id: &str, ttl_hours: i64) -> Result<(String, SessionRow)> {
    let token = Uuid::new_v4().simple().to_string();
    let now = now_rfc3339();
    let expires_at = (Utc::now() + Duration::hours(ttl_hours))
        .to_rfc3339_opts(SecondsFormat::Micros, true);

    let row = SessionRow {
        id: sha256_hex(&token),
        user_id: user_id.to_string(),
        expires_at,
        created_at: now.clone(),
        last_active_at: now,
    };
    let conn = store.lock();
    conn.execute(
        "INSERT INTO sessions (id, user_id, expires_at, created_at, last_active_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![row.id, row.user_id, row.expires_at, row.created_at, row.last_active_at],
    )
    .map_err(db_err)?;
    Ok((token, row))
}

/// Validate a plaintext token: hash, look up, check expiry, stamp activity.
/// Returns `None` for unknown or expired tokens.
pub fn validate_session(store: &Store, token: &str) -> Result<Option<SessionRow>> {
    use rusqlite::OptionalExtension;
    let id = sha256_hex(token);
    let now = now_rfc3339();

    let conn = store.lock();
    let row = conn
        .query_row("SELECT * FROM sessions WHERE id = ?1", [&id], SessionRow::from_row)
        .optional()
        .map_err(db_err)?;
    let Some(row) = row else {
        return Ok(None);
    };
    if row.expires_at <= now {
        return Ok(None);
    }
    conn.execute(
        "UPDATE sessions SET last_active_at = ?1 WHERE id = ?2",
        rusqlite::params![now, id],
    )
    .map_err(db_err)?;
    Ok(Some(row))
}

/// Delete by plaintext token (hashes first). Returns whether a row existed.
pub fn delete_session(store: &Store, token: &str) -> Result<bool> {
    let id = sha256_hex(token);
    let conn = store.lock();
    let n = conn
        .execute("DELETE FROM sessions WHERE id = ?1", [&id])
        .map_err(db_err)?;
    Ok(n > 0)
}

/// Drop sessions past their expiry. Returns the number removed.
pub fn cleanup_expired_sessions(store: &Store) -> Result<usize> {
    let conn = store.lock();
    conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        [now_rfc3339()],
    )
    .map_err(db_err)
}

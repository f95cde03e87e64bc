//! User rows, keyed by the external identity `(provider, provider_id)`.

use serde::Serialize;
use uuid::Uuid;

use agenr_domain::error::Result;

use crate::{db_err, now_rfc3339, Store};

#[derive(Debug, Clone, Serialize)]
pub struct UserRow {
    pub id: String,
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            provider: row.get("provider")?,
            provider_id: row.get("provider_id")?,
            email: row.get("email")?,
            name: row.get("name")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Insert or refresh a user for an external identity. Existing rows keep
/// their id; email and name are updated in place.
pub fn upsert_user(
    store: &Store,
    provider: &str,
    provider_id: &str,
    email: &str,
    name: Option<&str>,
) -> Result<UserRow> {
    let now = now_rfc3339();
    let conn = store.lock();

    if let Some(existing) = find_by_identity_locked(&conn, provider, provider_id)? {
        conn.execute(
            "UPDATE users SET email = ?1, name = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![email, name, now, existing.id],
        )
        .map_err(db_err)?;
        return Ok(UserRow {
            email: email.to_string(),
            name: name.map(str::to_string),
            updated_at: now,
            ..existing
        });
    }

    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        provider: provider.to_string(),
        provider_id: provider_id.to_string(),
        email: email.to_string(),
        name: name.map(str::to_string),
        created_at: now.clone(),
        updated_at: now,
    };
    conn.execute(
        "INSERT INTO users (id, provider, provider_id, email, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            row.id,
            row.provider,
            row.provider_id,
            row.email,
            row.name,
            row.created_at,
            row.updated_at,
        ],
    )
    .map_err(db_err)?;
    Ok(row)
}

pub fn get_user(store: &Store, id: &str) -> Result<Option<UserRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row("SELECT * FROM users WHERE id = ?1", [id], UserRow::from_row)
        .optional()
        .map_err(db_err)
}

fn find_by_identity_locked(
    conn: &rusqlite::Connection,
    provider: &str,
    provider_id: &str,
) -> Result<Option<UserRow>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT * FROM users WHERE provider = ?1 AND provider_id = ?2",
        [provider, provider_id],
        UserRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

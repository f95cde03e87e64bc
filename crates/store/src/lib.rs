//! SQLite persistence layer.
//!
//! A [`Store`] wraps one `rusqlite::Connection` behind a mutex and is shared
//! by every subsystem. The store is the single source of truth; in-process
//! caches (the adapter registry map) are rebuilt from it on demand. There is
//! no global handle — the composition root opens the store once and passes
//! clones down.

pub mod api_keys;
pub mod migrate;
pub mod schema;
pub mod sessions;
pub mod transactions;
pub mod users;

use std::path::Path;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OpenFlags};

use agenr_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared handle to the SQLite database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests and scratch work.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON").map_err(db_err)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        migrate::migrate(&store)?;
        Ok(store)
    }

    /// Acquire the connection. Callers must not hold the guard across an
    /// await point; every store operation is synchronous and short.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map a rusqlite error onto the shared taxonomy. Constraint violations are
/// [`Error::Conflict`] so uniqueness races surface as 409s, everything else
/// is [`Error::Transient`].
pub fn db_err(e: rusqlite::Error) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(f, msg)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Error::Conflict(
                msg.clone()
                    .unwrap_or_else(|| "constraint violation".into()),
            )
        }
        rusqlite::Error::QueryReturnedNoRows => Error::NotFound("row not found".into()),
        _ => Error::Transient(format!("store: {e}")),
    }
}

/// Current UTC time, RFC 3339 with microseconds. The fixed precision keeps
/// lexicographic TEXT ordering equal to chronological ordering.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current wall time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// SHA-256 of `input`, hex-encoded.
pub fn sha256_hex(input: &str) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(input.as_bytes()))
}

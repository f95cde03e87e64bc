//! Append-only credential audit chain.
//!
//! Every credential touch writes one row. Rows are immutable at the SQL
//! level (UPDATE/DELETE triggers abort) and hash-linked per user: an
//! entry's `prev_hash` commits to the id + timestamp of the same user's
//! previous entry, with `sha256("genesis")` anchoring each user's first
//! entry. Verification recomputes the links in `(timestamp, id)` order.
//!
//! Audit writes are fire-and-forget: a failed insert is logged and
//! swallowed so the business operation it describes never aborts.

pub mod sanitize;
pub mod verify;

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use agenr_domain::error::{Error, Result};
use agenr_store::{db_err, now_rfc3339, sha256_hex, Store};

pub use verify::ChainReport;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CredentialStored,
    CredentialRetrieved,
    CredentialRotated,
    CredentialDeleted,
    ConnectionEstablished,
    ConnectionFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CredentialStored => "credential_stored",
            AuditAction::CredentialRetrieved => "credential_retrieved",
            AuditAction::CredentialRotated => "credential_rotated",
            AuditAction::CredentialDeleted => "credential_deleted",
            AuditAction::ConnectionEstablished => "connection_established",
            AuditAction::ConnectionFailed => "connection_failed",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event to record.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub user_id: String,
    pub service_id: String,
    pub action: AuditAction,
    pub execution_id: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(user_id: &str, service_id: &str, action: AuditAction) -> Self {
        Self {
            user_id: user_id.to_string(),
            service_id: service_id.to_string(),
            action,
            execution_id: None,
            ip_address: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip_address = ip;
        self
    }

    pub fn with_execution(mut self, execution_id: Option<String>) -> Self {
        self.execution_id = execution_id;
        self
    }
}

/// One stored row.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub user_id: String,
    pub service_id: String,
    pub action: String,
    pub execution_id: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<Value>,
    pub timestamp: String,
    pub prev_hash: Option<String>,
}

impl AuditEntry {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let metadata_raw: Option<String> = row.get("metadata")?;
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            service_id: row.get("service_id")?,
            action: row.get("action")?,
            execution_id: row.get("execution_id")?,
            ip_address: row.get("ip_address")?,
            metadata: metadata_raw.and_then(|s| serde_json::from_str(&s).ok()),
            timestamp: row.get("timestamp")?,
            prev_hash: row.get("prev_hash")?,
        })
    }
}

/// Hash committing to an entry's identity: `sha256(id ‖ timestamp)`.
pub fn entry_hash(id: &str, timestamp: &str) -> String {
    sha256_hex(&format!("{id}{timestamp}"))
}

/// Anchor for the first entry of each user's chain.
pub fn genesis_hash() -> String {
    sha256_hex("genesis")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Audit log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct AuditLog {
    store: Store,
}

impl AuditLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record an event. Never fails: store errors are logged and dropped so
    /// the surrounding business operation continues.
    pub fn log(&self, event: AuditEvent) {
        if let Err(e) = self.try_log(&event) {
            tracing::warn!(
                user_id = %event.user_id,
                service_id = %event.service_id,
                action = event.action.as_str(),
                error = %e,
                "audit write failed (swallowed)"
            );
        }
    }

    fn try_log(&self, event: &AuditEvent) -> Result<()> {
        use rusqlite::OptionalExtension;

        let metadata = event.metadata.as_ref().map(sanitize::sanitize_metadata);
        let mut id = Uuid::new_v4().to_string();
        let timestamp = now_rfc3339();

        let mut conn = self.store.lock();
        // SELECT-prev + INSERT inside one transaction so two concurrent
        // writers cannot both chain off the same prior entry.
        let tx = conn.transaction().map_err(db_err)?;
        let prev: Option<(String, String)> = tx
            .query_row(
                "SELECT id, timestamp FROM credential_audit_log
                 WHERE user_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT 1",
                [&event.user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?;
        let prev_hash = match &prev {
            Some((prev_id, prev_ts)) => {
                // Verification replays `(timestamp, id)` order, so this
                // entry must sort after its parent. On a same-microsecond
                // tie, re-mint the id until it breaks the tie upward.
                while *prev_ts == timestamp && id <= *prev_id {
                    id = Uuid::new_v4().to_string();
                }
                entry_hash(prev_id, prev_ts)
            }
            None => genesis_hash(),
        };

        tx.execute(
            "INSERT INTO credential_audit_log
                (id, user_id, service_id, action, execution_id, ip_address, metadata, timestamp, prev_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id,
                event.user_id,
                event.service_id,
                event.action.as_str(),
                event.execution_id,
                event.ip_address,
                metadata.as_ref().map(|v| v.to_string()),
                timestamp,
                prev_hash,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(())
    }

    /// User-scoped activity view for one service, newest first. `before` is
    /// an exclusive RFC 3339 upper bound.
    pub fn list_user_activity(
        &self,
        user_id: &str,
        service_id: &str,
        limit: usize,
        before: Option<&str>,
    ) -> Result<Vec<AuditEntry>> {
        let conn = self.store.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM credential_audit_log
                 WHERE user_id = ?1 AND service_id = ?2 AND (?3 IS NULL OR timestamp < ?3)
                 ORDER BY timestamp DESC, id DESC LIMIT ?4",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![user_id, service_id, before, limit as i64],
                AuditEntry::from_row,
            )
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    /// Run a read-only query against the audit table. Statements that would
    /// mutate (`UPDATE` / `DELETE`) are rejected before touching SQLite.
    pub fn query_raw(&self, sql: &str) -> Result<Vec<AuditEntry>> {
        let head = sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if head == "UPDATE" || head == "DELETE" {
            return Err(Error::Invalid(
                "audit queries must not mutate the log".into(),
            ));
        }
        let conn = self.store.lock();
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map([], AuditEntry::from_row)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log_with_store() -> (AuditLog, Store) {
        let store = Store::open_in_memory().unwrap();
        (AuditLog::new(store.clone()), store)
    }

    #[test]
    fn first_entry_anchors_to_genesis() {
        let (log, store) = log_with_store();
        log.log(AuditEvent::new("u1", "stripe", AuditAction::CredentialStored));

        let conn = store.lock();
        let prev_hash: String = conn
            .query_row("SELECT prev_hash FROM credential_audit_log", [], |r| r.get(0))
            .unwrap();
        assert_eq!(prev_hash, genesis_hash());
    }

    #[test]
    fn entries_chain_per_user() {
        let (log, store) = log_with_store();
        log.log(AuditEvent::new("u1", "stripe", AuditAction::CredentialStored));
        log.log(AuditEvent::new("u2", "toast", AuditAction::CredentialStored));
        log.log(AuditEvent::new("u1", "stripe", AuditAction::CredentialRetrieved));

        let conn = store.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, prev_hash FROM credential_audit_log
                 WHERE user_id = 'u1' ORDER BY timestamp ASC, id ASC",
            )
            .unwrap();
        let rows: Vec<(String, String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].2, genesis_hash());
        assert_eq!(rows[1].2, entry_hash(&rows[0].0, &rows[0].1));

        // u2's single entry anchors to genesis as well: chains are per-user.
        let u2_prev: String = conn
            .query_row(
                "SELECT prev_hash FROM credential_audit_log WHERE user_id = 'u2'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(u2_prev, genesis_hash());
    }

    #[test]
    fn triggers_forbid_update_and_delete() {
        let (log, store) = log_with_store();
        log.log(AuditEvent::new("u1", "stripe", AuditAction::CredentialStored));

        let conn = store.lock();
        let update = conn.execute("UPDATE credential_audit_log SET action = 'x'", []);
        assert!(update.is_err());
        let delete = conn.execute("DELETE FROM credential_audit_log", []);
        assert!(delete.is_err());

        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM credential_audit_log", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn metadata_is_sanitized_before_storage() {
        let (log, store) = log_with_store();
        log.log(
            AuditEvent::new("u1", "stripe", AuditAction::CredentialStored).with_metadata(json!({
                "scopes": ["read"],
                "access_token": "sk-live-verysecret",
                "nested": {"refresh_token": "also-secret", "kept": true}
            })),
        );

        let conn = store.lock();
        let metadata: String = conn
            .query_row("SELECT metadata FROM credential_audit_log", [], |r| r.get(0))
            .unwrap();
        assert!(!metadata.contains("verysecret"));
        assert!(!metadata.contains("also-secret"));
        assert!(metadata.contains("scopes"));
        assert!(metadata.contains("kept"));
    }

    #[test]
    fn query_raw_rejects_mutations() {
        let (log, _store) = log_with_store();
        assert!(log.query_raw("  update credential_audit_log SET action='x'").is_err());
        assert!(log.query_raw("DELETE FROM credential_audit_log").is_err());
        assert!(log
            .query_raw("SELECT * FROM credential_audit_log ORDER BY timestamp ASC, id ASC")
            .is_ok());
    }

    #[test]
    fn activity_listing_is_scoped_and_bounded() {
        let (log, _store) = log_with_store();
        for _ in 0..5 {
            log.log(AuditEvent::new("u1", "stripe", AuditAction::CredentialRetrieved));
        }
        log.log(AuditEvent::new("u2", "stripe", AuditAction::CredentialRetrieved));

        let entries = log.list_user_activity("u1", "stripe", 3, None).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.user_id == "u1"));
        assert!(entries.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }
}

//! Chain verification.
//!
//! Walks the audit table in `(timestamp ASC, id ASC)` order — the same
//! order the writer chains in — and recomputes each entry's expected
//! `prev_hash` from the prior entry of the same user. Legacy rows with a
//! NULL `prev_hash` predate chaining: they are not checked (counted in
//! `unchained_entries`) but still act as chain parents for later rows.

use std::collections::HashMap;

use serde::Serialize;

use agenr_domain::error::Result;

use crate::{entry_hash, genesis_hash, AuditEntry, AuditLog};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Report
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub total_entries: usize,
    pub checked_entries: usize,
    pub unchained_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<BrokenEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrokenEntry {
    pub id: String,
    pub user_id: String,
    pub timestamp: String,
    pub expected_prev_hash: String,
    pub actual_prev_hash: Option<String>,
}

impl AuditLog {
    /// Verify every user's chain across the whole table.
    pub fn verify_chain(&self) -> Result<ChainReport> {
        let entries = self.query_raw(
            "SELECT * FROM credential_audit_log ORDER BY timestamp ASC, id ASC",
        )?;
        Ok(verify_entries(&entries))
    }

    /// Verify a single user's chain.
    pub fn verify_user_chain(&self, user_id: &str) -> Result<ChainReport> {
        let entries = self.query_raw(
            "SELECT * FROM credential_audit_log ORDER BY timestamp ASC, id ASC",
        )?;
        let filtered: Vec<AuditEntry> = entries
            .into_iter()
            .filter(|e| e.user_id == user_id)
            .collect();
        Ok(verify_entries(&filtered))
    }
}

/// Core verification walk over entries already sorted `(timestamp, id)` ASC.
fn verify_entries(entries: &[AuditEntry]) -> ChainReport {
    let mut last_by_user: HashMap<&str, &AuditEntry> = HashMap::new();
    let mut checked = 0usize;
    let mut unchained = 0usize;
    let mut broken_at = None;

    for entry in entries {
        let expected = match last_by_user.get(entry.user_id.as_str()) {
            Some(prev) => entry_hash(&prev.id, &prev.timestamp),
            None => genesis_hash(),
        };
        // Whether checked or legacy, this entry is the parent of the user's
        // next one — the writer never filters by prev_hash.
        last_by_user.insert(entry.user_id.as_str(), entry);

        match &entry.prev_hash {
            None => unchained += 1,
            Some(actual) => {
                checked += 1;
                if broken_at.is_none() && *actual != expected {
                    broken_at = Some(BrokenEntry {
                        id: entry.id.clone(),
                        user_id: entry.user_id.clone(),
                        timestamp: entry.timestamp.clone(),
                        expected_prev_hash: expected,
                        actual_prev_hash: Some(actual.clone()),
                    });
                }
            }
        }
    }

    ChainReport {
        valid: broken_at.is_none(),
        total_entries: entries.len(),
        checked_entries: checked,
        unchained_entries: unchained,
        broken_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AuditAction, AuditEvent};
    use agenr_store::Store;

    fn seeded_log(n: usize, user: &str) -> AuditLog {
        let store = Store::open_in_memory().unwrap();
        let log = AuditLog::new(store);
        for _ in 0..n {
            log.log(AuditEvent::new(user, "stripe", AuditAction::CredentialStored));
        }
        log
    }

    /// Drop the protective triggers, run `f`, reinstall. Test-harness only.
    fn with_triggers_dropped(log: &AuditLog, f: impl FnOnce(&rusqlite::Connection)) {
        let conn = log.store().lock();
        conn.execute_batch(
            "DROP TRIGGER credential_audit_log_no_update;
             DROP TRIGGER credential_audit_log_no_delete;",
        )
        .unwrap();
        f(&conn);
        conn.execute_batch(
            "CREATE TRIGGER credential_audit_log_no_update
                 BEFORE UPDATE ON credential_audit_log
             BEGIN SELECT RAISE(ABORT, 'credential_audit_log is append-only'); END;
             CREATE TRIGGER credential_audit_log_no_delete
                 BEFORE DELETE ON credential_audit_log
             BEGIN SELECT RAISE(ABORT, 'credential_audit_log is append-only'); END;",
        )
        .unwrap();
    }

    #[test]
    fn intact_chain_is_valid() {
        let log = seeded_log(5, "u1");
        let report = log.verify_chain().unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 5);
        assert_eq!(report.checked_entries, 5);
        assert_eq!(report.unchained_entries, 0);
        assert!(report.broken_at.is_none());
    }

    #[test]
    fn tampered_prev_hash_is_detected() {
        let log = seeded_log(3, "u1");

        // Identify the third row, then rewrite its prev_hash.
        let entries = log
            .query_raw("SELECT * FROM credential_audit_log ORDER BY timestamp ASC, id ASC")
            .unwrap();
        let third = entries[2].id.clone();
        with_triggers_dropped(&log, |conn| {
            conn.execute(
                "UPDATE credential_audit_log SET prev_hash = ?1 WHERE id = ?2",
                rusqlite::params!["0".repeat(64), third],
            )
            .unwrap();
        });

        let report = log.verify_chain().unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at.as_ref().unwrap().id, third);
    }

    #[test]
    fn legacy_null_rows_are_skipped_but_counted() {
        let log = seeded_log(0, "u1");
        // A pre-chaining legacy row, inserted with the triggers intact
        // (INSERT is always allowed).
        log.store()
            .lock()
            .execute(
                "INSERT INTO credential_audit_log
                    (id, user_id, service_id, action, timestamp, prev_hash)
                 VALUES ('legacy-1', 'u1', 'stripe', 'credential_stored',
                         '2020-01-01T00:00:00.000000+00:00', NULL)",
                [],
            )
            .unwrap();
        log.log(AuditEvent::new("u1", "stripe", AuditAction::CredentialStored));

        let report = log.verify_chain().unwrap();
        assert!(report.valid);
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.checked_entries, 1);
        assert_eq!(report.unchained_entries, 1);
    }

    #[test]
    fn user_scoped_verification_ignores_other_users() {
        let log = seeded_log(3, "u1");
        for _ in 0..2 {
            log.log(AuditEvent::new("u2", "toast", AuditAction::CredentialStored));
        }

        let u1 = log.verify_user_chain("u1").unwrap();
        assert!(u1.valid);
        assert_eq!(u1.total_entries, 3);

        let u2 = log.verify_user_chain("u2").unwrap();
        assert!(u2.valid);
        assert_eq!(u2.total_entries, 2);

        let nobody = log.verify_user_chain("u3").unwrap();
        assert!(nobody.valid);
        assert_eq!(nobody.total_entries, 0);
    }

    #[test]
    fn interleaved_users_verify_globally() {
        let store = Store::open_in_memory().unwrap();
        let log = AuditLog::new(store);
        for i in 0..6 {
            let user = if i % 2 == 0 { "u1" } else { "u2" };
            log.log(AuditEvent::new(user, "stripe", AuditAction::CredentialRetrieved));
        }
        let report = log.verify_chain().unwrap();
        assert!(report.valid);
        assert_eq!(report.checked_entries, 6);
    }
}

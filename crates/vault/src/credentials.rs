//! Credential vault: envelope-encrypted third-party credentials.
//!
//! Each user gets one DEK, minted on first write and wrapped by the KMS.
//! Payloads at rest are AES-256-GCM ciphertext; list responses carry
//! metadata only. Every touch emits an audit event.

use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use agenr_audit::{AuditAction, AuditEvent, AuditLog};
use agenr_domain::error::{Error, Result};
use agenr_domain::ident::normalize_service_id;
use agenr_store::{db_err, now_rfc3339, Store};

use crate::envelope::{self, Sealed};
use crate::kms::Kms;

/// Fixed owner of adapter app OAuth credentials.
pub const SYSTEM_USER_ID: &str = "__system__";

/// Auth type under which app credentials are stored.
pub const APP_OAUTH_TYPE: &str = "app_oauth";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows & summaries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Full credential row, ciphertext included. Internal to the vault.
#[derive(Debug, Clone)]
pub(crate) struct CredentialRow {
    pub user_id: String,
    pub service_id: String,
    pub auth_type: String,
    pub sealed: Sealed,
    pub scopes: Option<Vec<String>>,
    pub expires_at: Option<String>,
    pub last_used_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl CredentialRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let scopes_raw: Option<String> = row.get("scopes")?;
        Ok(Self {
            user_id: row.get("user_id")?,
            service_id: row.get("service_id")?,
            auth_type: row.get("auth_type")?,
            sealed: Sealed {
                ciphertext: row.get("encrypted_payload")?,
                iv: row.get("iv")?,
                auth_tag: row.get("auth_tag")?,
            },
            scopes: scopes_raw.and_then(|s| serde_json::from_str(&s).ok()),
            expires_at: row.get("expires_at")?,
            last_used_at: row.get("last_used_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Metadata-only view for list responses. Secrets never appear here.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    pub service: String,
    pub auth_type: String,
    /// `active`, or `expired` for OAuth credentials past `expires_at`.
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct CredentialVault {
    store: Store,
    audit: AuditLog,
    kms: Arc<dyn Kms>,
}

impl CredentialVault {
    pub fn new(store: Store, audit: AuditLog, kms: Arc<dyn Kms>) -> Self {
        Self { store, audit, kms }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn kms(&self) -> &Arc<dyn Kms> {
        &self.kms
    }

    // ── DEK lifecycle ───────────────────────────────────────────────

    /// Unwrap the user's DEK, minting and wrapping a fresh one on first use.
    async fn user_dek(&self, user_id: &str) -> Result<Vec<u8>> {
        use rusqlite::OptionalExtension;

        let existing: Option<(Vec<u8>, String)> = {
            let conn = self.store.lock();
            conn.query_row(
                "SELECT encrypted_dek, kms_key_id FROM user_keys WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?
        };

        if let Some((wrapped, kms_key_id)) = existing {
            return self.kms.unwrap_dek(&wrapped, &kms_key_id).await;
        }

        let dek = envelope::generate_dek();
        let wrapped = self.kms.wrap_dek(&dek).await?;
        let (stored, key_id): (Vec<u8>, String) = {
            let conn = self.store.lock();
            // A concurrent first write may have won the race; keep the winner.
            conn.execute(
                "INSERT OR IGNORE INTO user_keys (user_id, encrypted_dek, kms_key_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id, wrapped.wrapped, wrapped.kms_key_id, now_rfc3339()],
            )
            .map_err(db_err)?;
            conn.query_row(
                "SELECT encrypted_dek, kms_key_id FROM user_keys WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(db_err)?
        };
        self.kms.unwrap_dek(&stored, &key_id).await
    }

    // ── Credential CRUD ─────────────────────────────────────────────

    /// Upsert a credential. Emits `credential_stored`.
    pub async fn store_credential(
        &self,
        user_id: &str,
        service: &str,
        auth_type: &str,
        payload: &Value,
        scopes: Option<Vec<String>>,
    ) -> Result<()> {
        self.persist_credential(
            user_id,
            service,
            auth_type,
            payload,
            scopes,
            AuditAction::CredentialStored,
        )
        .await
    }

    /// Shared upsert used by store and rotation paths; `action` selects the
    /// audit event.
    pub(crate) async fn persist_credential(
        &self,
        user_id: &str,
        service: &str,
        auth_type: &str,
        payload: &Value,
        scopes: Option<Vec<String>>,
        action: AuditAction,
    ) -> Result<()> {
        let service = normalize_service_id(service)?;
        if !payload.is_object() {
            return Err(Error::Invalid("credential payload must be a JSON object".into()));
        }

        let dek = self.user_dek(user_id).await?;
        let plaintext = serde_json::to_vec(payload)?;
        let sealed = envelope::seal(&dek, &plaintext)?;
        let expires_at = derive_expires_at(payload);
        let now = now_rfc3339();

        {
            let conn = self.store.lock();
            conn.execute(
                "INSERT INTO credentials
                    (user_id, service_id, auth_type, encrypted_payload, iv, auth_tag,
                     scopes, expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                 ON CONFLICT (user_id, service_id) DO UPDATE SET
                     auth_type = excluded.auth_type,
                     encrypted_payload = excluded.encrypted_payload,
                     iv = excluded.iv,
                     auth_tag = excluded.auth_tag,
                     scopes = excluded.scopes,
                     expires_at = excluded.expires_at,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    user_id,
                    service,
                    auth_type,
                    sealed.ciphertext,
                    sealed.iv,
                    sealed.auth_tag,
                    scopes.as_ref().map(|s| serde_json::to_string(s)).transpose()?,
                    expires_at,
                    now,
                ],
            )
            .map_err(db_err)?;
        }

        self.audit.log(
            AuditEvent::new(user_id, &service, action).with_metadata(serde_json::json!({
                "auth_type": auth_type,
                "scopes": scopes,
            })),
        );
        Ok(())
    }

    /// Decrypt and return the payload. Emits `credential_retrieved` (tagged
    /// with the journal row id when retrieval happens inside a platform
    /// operation) and stamps `last_used_at`.
    pub async fn retrieve_credential(
        &self,
        user_id: &str,
        service: &str,
        execution_id: Option<&str>,
    ) -> Result<Option<Value>> {
        let service = normalize_service_id(service)?;
        let Some(row) = self.load_row(user_id, &service)? else {
            return Ok(None);
        };

        let dek = self.user_dek(user_id).await?;
        let plaintext = envelope::open(&dek, &row.sealed)?;
        let payload: Value = serde_json::from_slice(&plaintext)?;

        {
            let conn = self.store.lock();
            conn.execute(
                "UPDATE credentials SET last_used_at = ?1 WHERE user_id = ?2 AND service_id = ?3",
                rusqlite::params![now_rfc3339(), user_id, service],
            )
            .map_err(db_err)?;
        }
        self.audit.log(
            AuditEvent::new(user_id, &service, AuditAction::CredentialRetrieved)
                .with_execution(execution_id.map(str::to_string)),
        );
        Ok(Some(payload))
    }

    /// Existence check; no decryption, no audit row.
    pub fn has_credential(&self, user_id: &str, service: &str) -> Result<bool> {
        let service = normalize_service_id(service)?;
        let conn = self.store.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM credentials WHERE user_id = ?1 AND service_id = ?2",
                [user_id, service.as_str()],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(n > 0)
    }

    /// Delete a credential. Emits `credential_deleted` when a row existed.
    pub fn delete_credential(&self, user_id: &str, service: &str) -> Result<bool> {
        let service = normalize_service_id(service)?;
        let removed = {
            let conn = self.store.lock();
            conn.execute(
                "DELETE FROM credentials WHERE user_id = ?1 AND service_id = ?2",
                [user_id, service.as_str()],
            )
            .map_err(db_err)?
        };
        if removed > 0 {
            self.audit.log(AuditEvent::new(
                user_id,
                &service,
                AuditAction::CredentialDeleted,
            ));
        }
        Ok(removed > 0)
    }

    /// Metadata-only listing. OAuth credentials past `expires_at` report
    /// `expired`; nothing encrypted leaves the vault here.
    pub fn list_credentials(&self, user_id: &str) -> Result<Vec<CredentialSummary>> {
        let rows = {
            let conn = self.store.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT * FROM credentials WHERE user_id = ?1 ORDER BY service_id ASC",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([user_id], CredentialRow::from_row)
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        let now = now_rfc3339();
        Ok(rows
            .into_iter()
            .map(|row| {
                let status = match (&row.auth_type[..], &row.expires_at) {
                    ("oauth2", Some(expires)) if *expires <= now => "expired",
                    _ => "active",
                };
                CredentialSummary {
                    service: row.service_id,
                    auth_type: row.auth_type,
                    status: status.into(),
                    scopes: row.scopes,
                    expires_at: row.expires_at,
                    last_used_at: row.last_used_at,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                }
            })
            .collect())
    }

    // ── App credentials (shared system owner) ───────────────────────

    /// Store an adapter's app OAuth credential under the system owner.
    pub async fn store_app_credential(&self, service: &str, payload: &Value) -> Result<()> {
        self.store_credential(SYSTEM_USER_ID, service, APP_OAUTH_TYPE, payload, None)
            .await
    }

    pub async fn retrieve_app_credential(&self, service: &str) -> Result<Option<Value>> {
        self.retrieve_credential(SYSTEM_USER_ID, service, None).await
    }

    pub fn delete_app_credential(&self, service: &str) -> Result<bool> {
        self.delete_credential(SYSTEM_USER_ID, service)
    }

    // ── Internal row access ─────────────────────────────────────────

    pub(crate) fn load_row(&self, user_id: &str, service: &str) -> Result<Option<CredentialRow>> {
        use rusqlite::OptionalExtension;
        let conn = self.store.lock();
        conn.query_row(
            "SELECT * FROM credentials WHERE user_id = ?1 AND service_id = ?2",
            [user_id, service],
            CredentialRow::from_row,
        )
        .optional()
        .map_err(db_err)
    }

    pub(crate) async fn decrypt_row(&self, row: &CredentialRow) -> Result<Value> {
        let dek = self.user_dek(&row.user_id).await?;
        let plaintext = envelope::open(&dek, &row.sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Derive the `expires_at` column from a payload's `expires_in` seconds.
fn derive_expires_at(payload: &Value) -> Option<String> {
    let secs = payload.get("expires_in")?.as_i64()?;
    Some(
        (Utc::now() + Duration::seconds(secs))
            .to_rfc3339_opts(SecondsFormat::Micros, true),
    )
}

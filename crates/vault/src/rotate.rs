//! DEK rotation: re-encrypt one user's credentials under a fresh key.
//!
//! Rotation decrypts every credential with the old DEK, mints and wraps a
//! new one, re-seals each payload and stamps `rotated_at`. The store
//! mutation happens last and in one transaction, so a failure mid-rotation
//! leaves the old DEK and ciphertexts untouched.

use serde_json::Value;

use agenr_domain::error::{Error, Result};
use agenr_store::{db_err, now_rfc3339};

use crate::credentials::CredentialVault;
use crate::envelope::{self, Sealed};

/// Outcome of a rotation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RotationSummary {
    pub credentials_rewrapped: usize,
}

impl CredentialVault {
    /// Rotate `user_id`'s DEK. No-op error when the user has no key yet.
    pub async fn rotate_user_dek(&self, user_id: &str) -> Result<RotationSummary> {
        use rusqlite::OptionalExtension;

        // Current wrapped DEK.
        let current: Option<(Vec<u8>, String)> = {
            let conn = self.store().lock();
            conn.query_row(
                "SELECT encrypted_dek, kms_key_id FROM user_keys WHERE user_id = ?1",
                [user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(db_err)?
        };
        let (wrapped, kms_key_id) =
            current.ok_or_else(|| Error::NotFound(format!("no key material for '{user_id}'")))?;
        let old_dek = self.kms().unwrap_dek(&wrapped, &kms_key_id).await?;

        // Decrypt every credential under the old DEK first; any integrity
        // failure aborts before a single row is rewritten.
        let rows: Vec<(String, Sealed)> = {
            let conn = self.store().lock();
            let mut stmt = conn
                .prepare(
                    "SELECT service_id, encrypted_payload, iv, auth_tag
                     FROM credentials WHERE user_id = ?1",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        Sealed {
                            ciphertext: row.get(1)?,
                            iv: row.get(2)?,
                            auth_tag: row.get(3)?,
                        },
                    ))
                })
                .map_err(db_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(db_err)?;
            rows
        };

        let mut plaintexts: Vec<(String, Vec<u8>)> = Vec::with_capacity(rows.len());
        for (service, sealed) in &rows {
            let plaintext = envelope::open(&old_dek, sealed)?;
            // Round-trip through JSON to catch corrupt payloads eagerly.
            let _: Value = serde_json::from_slice(&plaintext)?;
            plaintexts.push((service.clone(), plaintext));
        }

        // Fresh DEK, wrapped by the KMS.
        let new_dek = envelope::generate_dek();
        let new_wrapped = self.kms().wrap_dek(&new_dek).await?;
        let resealed: Vec<(String, Sealed)> = plaintexts
            .iter()
            .map(|(service, plaintext)| Ok((service.clone(), envelope::seal(&new_dek, plaintext)?)))
            .collect::<Result<_>>()?;

        // Swap key and ciphertexts atomically.
        {
            let mut conn = self.store().lock();
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "UPDATE user_keys SET encrypted_dek = ?1, kms_key_id = ?2, rotated_at = ?3
                 WHERE user_id = ?4",
                rusqlite::params![new_wrapped.wrapped, new_wrapped.kms_key_id, now_rfc3339(), user_id],
            )
            .map_err(db_err)?;
            for (service, sealed) in &resealed {
                tx.execute(
                    "UPDATE credentials SET encrypted_payload = ?1, iv = ?2, auth_tag = ?3
                     WHERE user_id = ?4 AND service_id = ?5",
                    rusqlite::params![sealed.ciphertext, sealed.iv, sealed.auth_tag, user_id, service],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)?;
        }

        tracing::info!(
            user_id,
            credentials = resealed.len(),
            "user DEK rotated"
        );
        Ok(RotationSummary {
            credentials_rewrapped: resealed.len(),
        })
    }
}

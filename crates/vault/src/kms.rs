//! KMS boundary: wrapping and unwrapping per-user data encryption keys.
//!
//! The real KMS is an external collaborator; [`LocalKms`] is the in-process
//! implementation backing dev and test deployments, wrapping DEKs with
//! AES-256-GCM under a master key supplied via environment.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use agenr_domain::error::{Error, Result};

use crate::envelope::{self, Sealed};

/// A DEK wrapped by the KMS, plus the key id that wrapped it.
#[derive(Debug, Clone)]
pub struct WrappedDek {
    pub wrapped: Vec<u8>,
    pub kms_key_id: String,
}

#[async_trait]
pub trait Kms: Send + Sync {
    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedDek>;
    async fn unwrap_dek(&self, wrapped: &[u8], kms_key_id: &str) -> Result<Vec<u8>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Master-key KMS. Wrapped blobs are `iv (12) ‖ tag (16) ‖ ciphertext`.
pub struct LocalKms {
    master: [u8; 32],
    key_id: String,
}

impl LocalKms {
    pub fn new(master: [u8; 32]) -> Self {
        // Key id derives from the key so rotation is observable in rows.
        let digest = Sha256::digest(master);
        let key_id = format!("local:{}", hex::encode(&digest[..8]));
        Self { master, key_id }
    }

    /// Read the hex-encoded 32-byte master key from `env_var`.
    pub fn from_env(env_var: &str) -> Result<Self> {
        let raw = std::env::var(env_var)
            .map_err(|_| Error::Invalid(format!("{env_var} is not set")))?;
        Self::from_hex(&raw)
    }

    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw.trim())
            .map_err(|_| Error::Invalid("master key must be hex".into()))?;
        let master: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Invalid("master key must be 32 bytes".into()))?;
        Ok(Self::new(master))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

#[async_trait]
impl Kms for LocalKms {
    async fn wrap_dek(&self, dek: &[u8]) -> Result<WrappedDek> {
        let sealed = envelope::seal(&self.master, dek)?;
        let mut wrapped = Vec::with_capacity(12 + 16 + sealed.ciphertext.len());
        wrapped.extend_from_slice(&sealed.iv);
        wrapped.extend_from_slice(&sealed.auth_tag);
        wrapped.extend_from_slice(&sealed.ciphertext);
        Ok(WrappedDek {
            wrapped,
            kms_key_id: self.key_id.clone(),
        })
    }

    async fn unwrap_dek(&self, wrapped: &[u8], kms_key_id: &str) -> Result<Vec<u8>> {
        if kms_key_id != self.key_id {
            return Err(Error::Integrity(format!(
                "DEK wrapped by unknown KMS key '{kms_key_id}'"
            )));
        }
        if wrapped.len() < 28 {
            return Err(Error::Integrity("wrapped DEK blob too short".into()));
        }
        let sealed = Sealed {
            iv: wrapped[..12].to_vec(),
            auth_tag: wrapped[12..28].to_vec(),
            ciphertext: wrapped[28..].to_vec(),
        };
        envelope::open(&self.master, &sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::generate_dek;

    #[tokio::test]
    async fn wrap_unwrap_roundtrip() {
        let kms = LocalKms::new([7u8; 32]);
        let dek = generate_dek();
        let wrapped = kms.wrap_dek(&dek).await.unwrap();
        assert!(wrapped.kms_key_id.starts_with("local:"));

        let unwrapped = kms.unwrap_dek(&wrapped.wrapped, &wrapped.kms_key_id).await.unwrap();
        assert_eq!(unwrapped, dek);
    }

    #[tokio::test]
    async fn unknown_key_id_is_rejected() {
        let kms = LocalKms::new([7u8; 32]);
        let wrapped = kms.wrap_dek(&generate_dek()).await.unwrap();
        let err = kms.unwrap_dek(&wrapped.wrapped, "local:ffffffffffffffff").await;
        assert!(matches!(err, Err(Error::Integrity(_))));
    }

    #[test]
    fn from_hex_validates_length() {
        assert!(LocalKms::from_hex(&"ab".repeat(32)).is_ok());
        assert!(LocalKms::from_hex("abcd").is_err());
        assert!(LocalKms::from_hex("not-hex").is_err());
    }
}

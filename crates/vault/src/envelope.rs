//! AES-256-GCM envelope encryption.
//!
//! Payloads are encrypted under a per-user DEK with a fresh 96-bit IV per
//! write and a 128-bit auth tag, stored as separate columns. A tag mismatch
//! on decrypt surfaces as [`Error::Integrity`] and is never retried.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, KeyInit, Nonce};

use agenr_domain::error::{Error, Result};

/// GCM auth tag length in bytes.
const TAG_LEN: usize = 16;

/// Ciphertext split into its stored columns.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
}

/// Encrypt `plaintext` under `dek` with a random nonce.
pub fn seal(dek: &[u8], plaintext: &[u8]) -> Result<Sealed> {
    let cipher = Aes256Gcm::new_from_slice(dek)
        .map_err(|_| Error::Integrity("DEK must be 32 bytes".into()))?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let mut combined = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Integrity("AEAD encryption failed".into()))?;

    // aes-gcm appends the tag to the ciphertext; the schema stores it apart.
    let auth_tag = combined.split_off(combined.len() - TAG_LEN);
    Ok(Sealed {
        ciphertext: combined,
        iv: nonce.to_vec(),
        auth_tag,
    })
}

/// Decrypt a [`Sealed`] payload. Tag or key mismatch is an integrity error.
pub fn open(dek: &[u8], sealed: &Sealed) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(dek)
        .map_err(|_| Error::Integrity("DEK must be 32 bytes".into()))?;
    let mut combined = sealed.ciphertext.clone();
    combined.extend_from_slice(&sealed.auth_tag);
    cipher
        .decrypt(Nonce::from_slice(&sealed.iv), combined.as_ref())
        .map_err(|_| Error::Integrity("AEAD auth tag mismatch".into()))
}

/// Mint a random 256-bit DEK.
pub fn generate_dek() -> [u8; 32] {
    Aes256Gcm::generate_key(OsRng).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() {
        let dek = generate_dek();
        let sealed = seal(&dek, b"{\"api_key\":\"sk-live-123\"}").unwrap();
        assert_eq!(sealed.iv.len(), 12);
        assert_eq!(sealed.auth_tag.len(), 16);

        let plain = open(&dek, &sealed).unwrap();
        assert_eq!(plain, b"{\"api_key\":\"sk-live-123\"}");
    }

    #[test]
    fn ciphertext_hides_plaintext() {
        let dek = generate_dek();
        let secret = b"super-secret-token-value";
        let sealed = seal(&dek, secret).unwrap();
        // No plaintext window may survive in the ciphertext.
        assert!(!sealed
            .ciphertext
            .windows(secret.len())
            .any(|w| w == secret.as_slice()));
    }

    #[test]
    fn fresh_iv_per_seal() {
        let dek = generate_dek();
        let a = seal(&dek, b"same").unwrap();
        let b = seal(&dek, b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let sealed = seal(&generate_dek(), b"payload").unwrap();
        let err = open(&generate_dek(), &sealed).unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }

    #[test]
    fn tampered_tag_fails_closed() {
        let dek = generate_dek();
        let mut sealed = seal(&dek, b"payload").unwrap();
        sealed.auth_tag[0] ^= 0xff;
        assert!(matches!(open(&dek, &sealed), Err(Error::Integrity(_))));
    }
}

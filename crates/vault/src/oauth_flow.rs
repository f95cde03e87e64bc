//! OAuth connect flow plumbing: single-use state rows and the
//! authorization-code exchange.
//!
//! The consent UI itself is out of scope; the gateway redirects to the
//! provider with a state minted here and finishes the flow at the callback.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use agenr_domain::error::{Error, Result};
use agenr_store::{db_err, now_rfc3339, Store};

/// States older than this are dead on arrival.
pub const STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Serialize)]
pub struct OAuthStateRow {
    pub state: String,
    pub user_id: String,
    pub service: String,
    pub code_verifier: Option<String>,
    pub created_at: String,
}

impl OAuthStateRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            state: row.get("state")?,
            user_id: row.get("user_id")?,
            service: row.get("service")?,
            code_verifier: row.get("code_verifier")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// PKCE pair: the verifier goes into the state row, the S256 challenge
/// into the authorization redirect.
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a PKCE verifier and its S256 challenge.
pub fn generate_pkce() -> PkcePair {
    use base64::Engine;
    use sha2::{Digest, Sha256};

    // 64 hex chars of CSPRNG output — within RFC 7636's 43..128 bounds.
    let verifier = format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    PkcePair {
        verifier,
        challenge,
    }
}

/// Mint a state row for a connect attempt. The opaque state doubles as the
/// CSRF token carried through the provider redirect.
pub fn create_state(
    store: &Store,
    user_id: &str,
    service: &str,
    code_verifier: Option<&str>,
) -> Result<String> {
    let state = Uuid::new_v4().to_string();
    let conn = store.lock();
    conn.execute(
        "INSERT INTO oauth_states (state, user_id, service, code_verifier, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![state, user_id, service, code_verifier, now_rfc3339()],
    )
    .map_err(db_err)?;
    Ok(state)
}

/// Consume a state: look up, delete, then enforce the TTL. Single-use —
/// a second consume of the same state fails with `Invalid`.
pub fn consume_state(store: &Store, state: &str) -> Result<OAuthStateRow> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    let row = conn
        .query_row(
            "SELECT * FROM oauth_states WHERE state = ?1",
            [state],
            OAuthStateRow::from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| Error::Invalid("unknown or already-used OAuth state".into()))?;

    conn.execute("DELETE FROM oauth_states WHERE state = ?1", [state])
        .map_err(db_err)?;

    let created = DateTime::parse_from_rfc3339(&row.created_at)
        .map_err(|_| Error::Integrity("unparseable oauth state timestamp".into()))?
        .with_timezone(&Utc);
    if Utc::now() - created > Duration::minutes(STATE_TTL_MINUTES) {
        return Err(Error::Expired("OAuth state expired".into()));
    }
    Ok(row)
}

/// Drop states past the TTL. Returns the number removed.
pub fn cleanup_expired_states(store: &Store) -> Result<usize> {
    let cutoff = (Utc::now() - Duration::minutes(STATE_TTL_MINUTES))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    let conn = store.lock();
    conn.execute("DELETE FROM oauth_states WHERE created_at < ?1", [cutoff])
        .map_err(db_err)
}

/// Exchange an authorization code for tokens at the provider.
pub async fn exchange_code(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> Result<Value> {
    let mut form: Vec<(&str, &str)> = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", client_id),
        ("client_secret", client_secret),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(verifier) = code_verifier {
        form.push(("code_verifier", verifier));
    }

    let resp = http
        .post(token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
        .map_err(|e| Error::Transient(format!("token endpoint: {e}")))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| Error::Transient(format!("reading token response: {e}")))?;
    if !status.is_success() {
        return Err(Error::Transient(format!(
            "code exchange returned HTTP {}",
            status.as_u16()
        )));
    }
    serde_json::from_str(&body)
        .map_err(|e| Error::Transient(format!("parsing token response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrip_is_single_use() {
        let store = Store::open_in_memory().unwrap();
        let state = create_state(&store, "u1", "square", None).unwrap();

        let row = consume_state(&store, &state).unwrap();
        assert_eq!(row.user_id, "u1");
        assert_eq!(row.service, "square");

        // Second consume fails closed.
        assert!(matches!(
            consume_state(&store, &state),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn unknown_state_is_invalid() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            consume_state(&store, "nope"),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn stale_state_is_expired_and_still_consumed() {
        let store = Store::open_in_memory().unwrap();
        let state = create_state(&store, "u1", "square", None).unwrap();
        {
            let conn = store.lock();
            let old = (Utc::now() - Duration::minutes(11))
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
            conn.execute(
                "UPDATE oauth_states SET created_at = ?1 WHERE state = ?2",
                rusqlite::params![old, state],
            )
            .unwrap();
        }

        assert!(matches!(
            consume_state(&store, &state),
            Err(Error::Expired(_))
        ));
        // Consumed even though expired.
        assert!(matches!(
            consume_state(&store, &state),
            Err(Error::Invalid(_))
        ));
    }

    #[test]
    fn cleanup_drops_only_stale_states() {
        let store = Store::open_in_memory().unwrap();
        let stale = create_state(&store, "u1", "square", None).unwrap();
        let fresh = create_state(&store, "u1", "toast", None).unwrap();
        {
            let conn = store.lock();
            let old = (Utc::now() - Duration::minutes(20))
                .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
            conn.execute(
                "UPDATE oauth_states SET created_at = ?1 WHERE state = ?2",
                rusqlite::params![old, stale],
            )
            .unwrap();
        }

        assert_eq!(cleanup_expired_states(&store).unwrap(), 1);
        assert!(consume_state(&store, &fresh).is_ok());
    }

    #[test]
    fn code_verifier_is_persisted() {
        let store = Store::open_in_memory().unwrap();
        let state = create_state(&store, "u1", "square", Some("verifier-abc")).unwrap();
        let row = consume_state(&store, &state).unwrap();
        assert_eq!(row.code_verifier.as_deref(), Some("verifier-abc"));
    }

    #[test]
    fn pkce_pair_shape() {
        use base64::Engine;
        use sha2::{Digest, Sha256};

        let pair = generate_pkce();
        assert_eq!(pair.verifier.len(), 64);
        assert!(pair.verifier.chars().all(|c| c.is_ascii_hexdigit()));

        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
        // URL-safe, unpadded.
        assert!(!pair.challenge.contains('='));
        assert!(!pair.challenge.contains('+'));

        // Two pairs never collide.
        assert_ne!(generate_pkce().verifier, pair.verifier);
    }
}

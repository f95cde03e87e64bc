//! API-key rows: minting, hash lookup, tier scopes.
//!
//! Raw keys have the form `agenr_<tier>_<32 hex>` and exist only in the
//! response that minted them; at rest the store keeps the SHA-256 hash.

use serde::Serialize;
use uuid::Uuid;

use agenr_domain::error::{Error, Result};

use crate::{db_err, now_rfc3339, sha256_hex, Store};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Paid,
    Admin,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Paid => "paid",
            Tier::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "free" => Ok(Tier::Free),
            "paid" => Ok(Tier::Paid),
            "admin" => Ok(Tier::Admin),
            other => Err(Error::Invalid(format!("unknown tier '{other}'"))),
        }
    }

    /// Default scope set for a freshly minted key of this tier.
    pub fn default_scopes(&self) -> Vec<String> {
        match self {
            Tier::Free => vec!["discover".into(), "query".into(), "execute".into()],
            Tier::Paid => vec![
                "discover".into(),
                "query".into(),
                "execute".into(),
                "generate".into(),
            ],
            Tier::Admin => vec!["*".into()],
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRow {
    pub id: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub tier: Tier,
    pub user_id: Option<String>,
    pub scopes: Vec<String>,
    pub rate_limit_override: Option<i64>,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl ApiKeyRow {
    /// `"*"` (admin) satisfies any required scope.
    pub fn has_scope(&self, required: &str) -> bool {
        self.scopes.iter().any(|s| s == "*" || s == required)
    }

    /// Credential owner for this key: the linked user when present, so
    /// multiple keys of one human converge on one credential set.
    pub fn credential_owner(&self) -> &str {
        self.user_id.as_deref().unwrap_or(&self.id)
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let tier_raw: String = row.get("tier")?;
        let scopes_raw: String = row.get("scopes")?;
        Ok(Self {
            id: row.get("id")?,
            key_hash: row.get("key_hash")?,
            tier: Tier::parse(&tier_raw).unwrap_or(Tier::Free),
            user_id: row.get("user_id")?,
            scopes: serde_json::from_str(&scopes_raw).unwrap_or_default(),
            rate_limit_override: row.get("rate_limit_override")?,
            created_at: row.get("created_at")?,
            last_used_at: row.get("last_used_at")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Minting & lookup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mint a raw key for `tier`. Returns `(raw, key_hash)`; the raw string is
/// never persisted.
pub fn mint_raw_key(tier: Tier) -> (String, String) {
    let raw = format!("agenr_{}_{}", tier.as_str(), Uuid::new_v4().simple());
    let hash = sha256_hex(&raw);
    (raw, hash)
}

/// Insert a new key row and return `(raw key, row)`.
pub fn create_api_key(store: &Store, tier: Tier, user_id: Option<&str>) -> Result<(String, ApiKeyRow)> {
    let (raw, key_hash) = mint_raw_key(tier);
    let row = insert_with_hash(store, &key_hash, tier, user_id)?;
    Ok((raw, row))
}

/// Insert a key row for an externally supplied raw key (bootstrap path).
pub fn insert_with_hash(
    store: &Store,
    key_hash: &str,
    tier: Tier,
    user_id: Option<&str>,
) -> Result<ApiKeyRow> {
    let row = ApiKeyRow {
        id: Uuid::new_v4().to_string(),
        key_hash: key_hash.to_string(),
        tier,
        user_id: user_id.map(str::to_string),
        scopes: tier.default_scopes(),
        rate_limit_override: None,
        created_at: now_rfc3339(),
        last_used_at: None,
    };
    let conn = store.lock();
    conn.execute(
        "INSERT INTO api_keys (id, key_hash, tier, user_id, scopes, rate_limit_override, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            row.id,
            row.key_hash,
            row.tier.as_str(),
            row.user_id,
            serde_json::to_string(&row.scopes)?,
            row.rate_limit_override,
            row.created_at,
        ],
    )
    .map_err(db_err)?;
    Ok(row)
}

/// Hash a raw key the way the store does.
pub fn hash_raw_key(raw: &str) -> String {
    sha256_hex(raw)
}

/// Look up a key by the hash of its raw form.
pub fn find_by_hash(store: &Store, key_hash: &str) -> Result<Option<ApiKeyRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row(
        "SELECT * FROM api_keys WHERE key_hash = ?1",
        [key_hash],
        ApiKeyRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Link a key to a user so its credentials converge on the user's set.
/// Fails with `NotFound` for unknown keys or users.
pub fn link_user(store: &Store, key_id: &str, user_id: &str) -> Result<ApiKeyRow> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    let user_exists: Option<String> = conn
        .query_row("SELECT id FROM users WHERE id = ?1", [user_id], |r| r.get(0))
        .optional()
        .map_err(db_err)?;
    if user_exists.is_none() {
        return Err(Error::NotFound(format!("user '{user_id}'")));
    }
    let updated = conn
        .execute(
            "UPDATE api_keys SET user_id = ?1 WHERE id = ?2",
            [user_id, key_id],
        )
        .map_err(db_err)?;
    if updated == 0 {
        return Err(Error::NotFound(format!("api key '{key_id}'")));
    }
    conn.query_row("SELECT * FROM api_keys WHERE id = ?1", [key_id], ApiKeyRow::from_row)
        .map_err(db_err)
}

/// Stamp `last_used_at`. Called off the request path; failures are logged
/// and dropped.
pub fn touch_last_used(store: &Store, key_id: &str) {
    let conn = store.lock();
    if let Err(e) = conn.execute(
        "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
        rusqlite::params![now_rfc3339(), key_id],
    ) {
        tracing::warn!(key_id, error = %e, "failed to stamp api key last_used_at");
    }
}

/// Resolve a raw key. When `bootstrap_raw` (the `AGENR_API_KEY` value)
/// matches and no row exists yet, an admin row is inserted first — the
/// bootstrap key is otherwise an ordinary admin key.
pub fn resolve_api_key(
    store: &Store,
    raw: &str,
    bootstrap_raw: Option<&str>,
) -> Result<Option<ApiKeyRow>> {
    let hash = hash_raw_key(raw);
    if let Some(row) = find_by_hash(store, &hash)? {
        return Ok(Some(row));
    }
    match bootstrap_raw {
        Some(bootstrap) if !bootstrap.is_empty() && digests_match(bootstrap, raw) => {
            tracing::info!("bootstrapping admin key from AGENR_API_KEY");
            let row = insert_with_hash(store, &hash, Tier::Admin, None)?;
            Ok(Some(row))
        }
        _ => Ok(None),
    }
}

/// Constant-time secret comparison over fixed-length digests, so neither
/// length nor prefix of the bootstrap key leaks through timing.
fn digests_match(a: &str, b: &str) -> bool {
    use sha2::{Digest, Sha256};
    use subtle::ConstantTimeEq;
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    bool::from(da.ct_eq(&db))
}

//! Store-backed idempotency cache.
//!
//! Cache keys compose the authenticated principal with the client-supplied
//! `Idempotency-Key`, so the same client key under two principals executes
//! twice and replays independently. Only successful (2xx) responses are
//! cached; first writer wins via `INSERT OR IGNORE`.

use serde::{Deserialize, Serialize};

use agenr_domain::error::Result;
use agenr_store::{db_err, now_ms, Store};

/// Entries older than this are swept.
pub const IDEMPOTENCY_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// A replayable response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

fn cache_key(principal_id: &str, client_key: &str) -> String {
    format!("{principal_id}:{client_key}")
}

/// Look up a replayable response for `(principal, client key)`.
pub fn lookup(store: &Store, principal_id: &str, client_key: &str) -> Result<Option<CachedResponse>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row(
        "SELECT status, headers, body FROM idempotency_cache WHERE key = ?1",
        [cache_key(principal_id, client_key)],
        |row| {
            let status: i64 = row.get(0)?;
            let headers_raw: String = row.get(1)?;
            Ok(CachedResponse {
                status: status as u16,
                headers: serde_json::from_str(&headers_raw).unwrap_or_default(),
                body: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

/// Record a response for replay. Non-2xx responses are never cached; on a
/// concurrent double-insert the first writer wins.
pub fn record(
    store: &Store,
    principal_id: &str,
    client_key: &str,
    response: &CachedResponse,
) -> Result<()> {
    if !(200..300).contains(&response.status) {
        return Ok(());
    }
    let conn = store.lock();
    conn.execute(
        "INSERT OR IGNORE INTO idempotency_cache
            (key, principal_id, status, headers, body, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            cache_key(principal_id, client_key),
            principal_id,
            response.status as i64,
            serde_json::to_string(&response.headers)?,
            response.body,
            now_ms(),
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Delete entries past the TTL. Idempotent and safe alongside writers.
pub fn cleanup_expired(store: &Store) -> Result<usize> {
    let cutoff = now_ms() - IDEMPOTENCY_TTL_MS;
    let conn = store.lock();
    conn.execute(
        "DELETE FROM idempotency_cache WHERE created_at_ms < ?1",
        [cutoff],
    )
    .map_err(db_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_response(body: &str) -> CachedResponse {
        CachedResponse {
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            body: body.into(),
        }
    }

    #[test]
    fn record_and_replay() {
        let store = Store::open_in_memory().unwrap();
        let resp = ok_response(r#"{"nonce":"n1"}"#);
        record(&store, "key-a", "client-1", &resp).unwrap();

        let hit = lookup(&store, "key-a", "client-1").unwrap().unwrap();
        assert_eq!(hit, resp);
    }

    #[test]
    fn same_client_key_does_not_leak_across_principals() {
        let store = Store::open_in_memory().unwrap();
        record(&store, "key-a", "shared-key", &ok_response("a")).unwrap();

        // Principal B sees a miss for the same client key.
        assert!(lookup(&store, "key-b", "shared-key").unwrap().is_none());

        record(&store, "key-b", "shared-key", &ok_response("b")).unwrap();
        assert_eq!(lookup(&store, "key-a", "shared-key").unwrap().unwrap().body, "a");
        assert_eq!(lookup(&store, "key-b", "shared-key").unwrap().unwrap().body, "b");
    }

    #[test]
    fn non_success_responses_are_not_cached() {
        let store = Store::open_in_memory().unwrap();
        let failed = CachedResponse {
            status: 502,
            headers: Vec::new(),
            body: "upstream".into(),
        };
        record(&store, "key-a", "client-1", &failed).unwrap();
        assert!(lookup(&store, "key-a", "client-1").unwrap().is_none());
    }

    #[test]
    fn first_writer_wins() {
        let store = Store::open_in_memory().unwrap();
        record(&store, "key-a", "client-1", &ok_response("first")).unwrap();
        record(&store, "key-a", "client-1", &ok_response("second")).unwrap();
        assert_eq!(
            lookup(&store, "key-a", "client-1").unwrap().unwrap().body,
            "first"
        );
    }

    #[test]
    fn cleanup_drops_only_expired_rows() {
        let store = Store::open_in_memory().unwrap();
        record(&store, "key-a", "old", &ok_response("old")).unwrap();
        {
            let conn = store.lock();
            conn.execute(
                "UPDATE idempotency_cache SET created_at_ms = ?1",
                [now_ms() - IDEMPOTENCY_TTL_MS - 1],
            )
            .unwrap();
        }
        record(&store, "key-a", "new", &ok_response("new")).unwrap();

        assert_eq!(cleanup_expired(&store).unwrap(), 1);
        assert!(lookup(&store, "key-a", "old").unwrap().is_none());
        assert!(lookup(&store, "key-a", "new").unwrap().is_some());
    }
}

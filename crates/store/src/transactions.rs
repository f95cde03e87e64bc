//! Operation journal: one row per platform operation, scoped to the API key
//! that ran it.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use agenr_domain::error::{Error, Result};

use crate::{db_err, now_rfc3339, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Discover,
    Query,
    Execute,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Discover => "discover",
            Operation::Query => "query",
            Operation::Execute => "execute",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "discover" => Ok(Operation::Discover),
            "query" => Ok(Operation::Query),
            "execute" => Ok(Operation::Execute),
            other => Err(Error::Invalid(format!("unknown operation '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionRow {
    pub id: String,
    pub operation: Operation,
    pub business_id: String,
    pub owner_key_id: String,
    pub status: String,
    pub input: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TransactionRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let op_raw: String = row.get("operation")?;
        let input_raw: Option<String> = row.get("input")?;
        let result_raw: Option<String> = row.get("result")?;
        Ok(Self {
            id: row.get("id")?,
            operation: Operation::parse(&op_raw).unwrap_or(Operation::Discover),
            business_id: row.get("business_id")?,
            owner_key_id: row.get("owner_key_id")?,
            status: row.get("status")?,
            input: input_raw.and_then(|s| serde_json::from_str(&s).ok()),
            result: result_raw.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Open a journal row in `pending` status before dispatching the operation.
pub fn begin_transaction(
    store: &Store,
    operation: Operation,
    business_id: &str,
    owner_key_id: &str,
    input: Option<&Value>,
) -> Result<TransactionRow> {
    let now = now_rfc3339();
    let row = TransactionRow {
        id: Uuid::new_v4().to_string(),
        operation,
        business_id: business_id.to_string(),
        owner_key_id: owner_key_id.to_string(),
        status: "pending".into(),
        input: input.cloned(),
        result: None,
        error: None,
        created_at: now.clone(),
        updated_at: now,
    };
    let conn = store.lock();
    conn.execute(
        "INSERT INTO transactions
            (id, operation, business_id, owner_key_id, status, input, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            row.id,
            row.operation.as_str(),
            row.business_id,
            row.owner_key_id,
            row.status,
            row.input.as_ref().map(|v| v.to_string()),
            row.created_at,
            row.updated_at,
        ],
    )
    .map_err(db_err)?;
    Ok(row)
}

/// Close a journal row with a result or an error.
pub fn complete_transaction(
    store: &Store,
    id: &str,
    result: std::result::Result<&Value, &str>,
) -> Result<()> {
    let now = now_rfc3339();
    let conn = store.lock();
    match result {
        Ok(value) => conn.execute(
            "UPDATE transactions SET status = 'complete', result = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![value.to_string(), now, id],
        ),
        Err(message) => conn.execute(
            "UPDATE transactions SET status = 'failed', error = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![message, now, id],
        ),
    }
    .map_err(db_err)?;
    Ok(())
}

/// Ownership-isolated fetch: only rows journaled by `owner_key_id` return.
pub fn get_transaction(store: &Store, id: &str, owner_key_id: &str) -> Result<Option<TransactionRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row(
        "SELECT * FROM transactions WHERE id = ?1 AND owner_key_id = ?2",
        [id, owner_key_id],
        TransactionRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Recent operations for one key, newest first.
pub fn list_transactions(store: &Store, owner_key_id: &str, limit: usize) -> Result<Vec<TransactionRow>> {
    let conn = store.lock();
    let mut stmt = conn
        .prepare(
            "SELECT * FROM transactions WHERE owner_key_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params![owner_key_id, limit as i64], TransactionRow::from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn journal_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let input = json!({"op": "list_orders"});
        let row = begin_transaction(&store, Operation::Query, "toast", "key-1", Some(&input)).unwrap();
        assert_eq!(row.status, "pending");

        let result = json!({"orders": []});
        complete_transaction(&store, &row.id, Ok(&result)).unwrap();

        let fetched = get_transaction(&store, &row.id, "key-1").unwrap().unwrap();
        assert_eq!(fetched.status, "complete");
        assert_eq!(fetched.result, Some(result));
        assert_eq!(fetched.input, Some(input));
    }

    #[test]
    fn failed_operation_records_error() {
        let store = Store::open_in_memory().unwrap();
        let row = begin_transaction(&store, Operation::Execute, "stripe", "key-1", None).unwrap();
        complete_transaction(&store, &row.id, Err("upstream 502")).unwrap();
        let fetched = get_transaction(&store, &row.id, "key-1").unwrap().unwrap();
        assert_eq!(fetched.status, "failed");
        assert_eq!(fetched.error.as_deref(), Some("upstream 502"));
    }

    #[test]
    fn ownership_isolation() {
        let store = Store::open_in_memory().unwrap();
        let row = begin_transaction(&store, Operation::Discover, "toast", "key-a", None).unwrap();
        // A different key cannot see the row.
        assert!(get_transaction(&store, &row.id, "key-b").unwrap().is_none());
        assert!(get_transaction(&store, &row.id, "key-a").unwrap().is_some());
    }

    #[test]
    fn listing_is_newest_first_and_scoped() {
        let store = Store::open_in_memory().unwrap();
        for _ in 0..3 {
            begin_transaction(&store, Operation::Query, "toast", "key-a", None).unwrap();
        }
        begin_transaction(&store, Operation::Query, "toast", "key-b", None).unwrap();

        let rows = list_transactions(&store, "key-a", 10).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}

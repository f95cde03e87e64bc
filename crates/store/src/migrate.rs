//! Idempotent, forward-only migrations.
//!
//! The base schema is a `CREATE IF NOT EXISTS` batch; column additions are
//! probed with `PRAGMA table_info` and applied with `ALTER TABLE ADD
//! COLUMN`. Widening a CHECK constraint (SQLite cannot alter one in place)
//! rebuilds the table via rename-copy-drop.

use rusqlite::Connection;

use agenr_domain::error::Result;

use crate::{db_err, schema, Store};

/// Apply the schema and every upgrade step. Safe to run on every startup.
pub fn migrate(store: &Store) -> Result<()> {
    let conn = store.lock();
    conn.execute_batch(schema::SCHEMA).map_err(db_err)?;

    add_column_if_missing(&conn, "api_keys", "rate_limit_override", "INTEGER NULL")?;
    add_column_if_missing(&conn, "adapters", "review_feedback", "TEXT NULL")?;
    add_column_if_missing(&conn, "credentials", "last_used_at", "TEXT NULL")?;
    widen_adapter_status_check(&conn)?;

    Ok(())
}

/// `PRAGMA table_info` probe.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(db_err)?;
    let mut rows = stmt.query([]).map_err(db_err)?;
    while let Some(row) = rows.next().map_err(db_err)? {
        let name: String = row.get(1).map_err(db_err)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<()> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))
        .map_err(db_err)?;
    tracing::info!(table, column, "migration: added column");
    Ok(())
}

/// Older databases carry an adapter CHECK constraint without `archived`.
/// SQLite cannot widen a CHECK, so rebuild: rename the old table, recreate
/// from the current schema, copy rows, drop the renamed original.
fn widen_adapter_status_check(conn: &Connection) -> Result<()> {
    let table_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'adapters'",
            [],
            |row| row.get(0),
        )
        .map_err(db_err)?;
    let Some(table_sql) = table_sql else {
        return Ok(());
    };
    if table_sql.contains("'archived'") {
        return Ok(());
    }

    tracing::info!("migration: rebuilding adapters for widened status CHECK");
    conn.execute_batch(
        r#"
        BEGIN;
        ALTER TABLE adapters RENAME TO adapters_old;
        CREATE TABLE adapters (
            id              TEXT PRIMARY KEY,
            platform        TEXT NOT NULL,
            owner_id        TEXT NOT NULL,
            status          TEXT NOT NULL
                CHECK (status IN ('sandbox', 'review', 'public', 'rejected', 'archived')),
            file_path       TEXT NOT NULL,
            source_code     TEXT NULL,
            source_hash     TEXT NULL,
            created_at      TEXT NOT NULL,
            promoted_at     TEXT NULL,
            submitted_at    TEXT NULL,
            reviewed_at     TEXT NULL,
            archived_at     TEXT NULL,
            promoted_by     TEXT NULL,
            review_message  TEXT NULL,
            review_feedback TEXT NULL,
            UNIQUE (platform, owner_id)
        );
        INSERT INTO adapters (
            id, platform, owner_id, status, file_path, source_code, source_hash,
            created_at, promoted_at, submitted_at, reviewed_at, archived_at,
            promoted_by, review_message, review_feedback
        )
        SELECT
            id, platform, owner_id, status, file_path, source_code, source_hash,
            created_at, promoted_at, submitted_at, reviewed_at, archived_at,
            promoted_by, review_message, review_feedback
        FROM adapters_old;
        DROP TABLE adapters_old;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_adapters_one_public
            ON adapters(platform) WHERE status = 'public';
        COMMIT;
        "#,
    )
    .map_err(db_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        migrate(&store).unwrap();
        migrate(&store).unwrap();
    }

    #[test]
    fn adds_missing_columns_to_legacy_tables() {
        let conn = Connection::open_in_memory().unwrap();
        // A pre-rate-limit api_keys shape.
        conn.execute_batch(
            r#"
            CREATE TABLE api_keys (
                id TEXT PRIMARY KEY,
                key_hash TEXT NOT NULL UNIQUE,
                tier TEXT NOT NULL,
                user_id TEXT NULL,
                scopes TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT NULL
            );
            "#,
        )
        .unwrap();
        assert!(!column_exists(&conn, "api_keys", "rate_limit_override").unwrap());
        add_column_if_missing(&conn, "api_keys", "rate_limit_override", "INTEGER NULL").unwrap();
        assert!(column_exists(&conn, "api_keys", "rate_limit_override").unwrap());
        // Second run is a no-op.
        add_column_if_missing(&conn, "api_keys", "rate_limit_override", "INTEGER NULL").unwrap();
    }

    #[test]
    fn rebuilds_adapters_when_check_lacks_archived() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE adapters (
                id              TEXT PRIMARY KEY,
                platform        TEXT NOT NULL,
                owner_id        TEXT NOT NULL,
                status          TEXT NOT NULL
                    CHECK (status IN ('sandbox', 'review', 'public', 'rejected')),
                file_path       TEXT NOT NULL,
                source_code     TEXT NULL,
                source_hash     TEXT NULL,
                created_at      TEXT NOT NULL,
                promoted_at     TEXT NULL,
                submitted_at    TEXT NULL,
                reviewed_at     TEXT NULL,
                archived_at     TEXT NULL,
                promoted_by     TEXT NULL,
                review_message  TEXT NULL,
                review_feedback TEXT NULL,
                UNIQUE (platform, owner_id)
            );
            INSERT INTO adapters (id, platform, owner_id, status, file_path, created_at)
            VALUES ('a1', 'toast', 'owner-1', 'sandbox', '/tmp/x', '2026-01-01T00:00:00Z');
            "#,
        )
        .unwrap();

        widen_adapter_status_check(&conn).unwrap();

        // Row survived and archived is now a legal status.
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM adapters", [], |r| r.get(0))
            .unwrap();
        assert_eq!(n, 1);
        conn.execute("UPDATE adapters SET status = 'archived' WHERE id = 'a1'", [])
            .unwrap();
    }
}

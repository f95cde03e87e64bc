//! Authoritative SQL schema.
//!
//! Everything here is `CREATE … IF NOT EXISTS` so [`crate::migrate`] can run
//! the batch on every startup. Integrity rules live in the schema itself:
//! the partial unique index keeps at most one public adapter per platform,
//! the CHECK constraints pin the status vocabularies, and the audit triggers
//! make the credential audit log append-only at the SQL level.

/// Full schema batch, applied in one `execute_batch`.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    provider    TEXT NOT NULL,
    provider_id TEXT NOT NULL,
    email       TEXT NOT NULL,
    name        TEXT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE (provider, provider_id)
);

CREATE TABLE IF NOT EXISTS api_keys (
    id                  TEXT PRIMARY KEY,
    key_hash            TEXT NOT NULL UNIQUE,
    tier                TEXT NOT NULL CHECK (tier IN ('free', 'paid', 'admin')),
    user_id             TEXT NULL REFERENCES users(id),
    scopes              TEXT NOT NULL,
    rate_limit_override INTEGER NULL,
    created_at          TEXT NOT NULL,
    last_used_at        TEXT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id             TEXT PRIMARY KEY,
    user_id        TEXT NOT NULL,
    expires_at     TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    last_active_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS adapters (
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

CREATE UNIQUE INDEX IF NOT EXISTS idx_adapters_one_public
    ON adapters(platform) WHERE status = 'public';

CREATE TABLE IF NOT EXISTS generation_jobs (
    id           TEXT PRIMARY KEY,
    platform     TEXT NOT NULL,
    owner_key_id TEXT NULL,
    status       TEXT NOT NULL
        CHECK (status IN ('queued', 'running', 'complete', 'failed')),
    logs         TEXT NOT NULL DEFAULT '[]',
    result       TEXT NULL,
    error        TEXT NULL,
    created_at   TEXT NOT NULL,
    started_at   TEXT NULL,
    completed_at TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_generation_jobs_queue
    ON generation_jobs(status, created_at);

CREATE TABLE IF NOT EXISTS credentials (
    user_id           TEXT NOT NULL,
    service_id        TEXT NOT NULL,
    auth_type         TEXT NOT NULL,
    encrypted_payload BLOB NOT NULL,
    iv                BLOB NOT NULL,
    auth_tag          BLOB NOT NULL,
    scopes            TEXT NULL,
    expires_at        TEXT NULL,
    last_used_at      TEXT NULL,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    PRIMARY KEY (user_id, service_id)
);

CREATE TABLE IF NOT EXISTS user_keys (
    user_id       TEXT PRIMARY KEY,
    encrypted_dek BLOB NOT NULL,
    kms_key_id    TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    rotated_at    TEXT NULL
);

CREATE TABLE IF NOT EXISTS oauth_states (
    state         TEXT PRIMARY KEY,
    user_id       TEXT NOT NULL,
    service       TEXT NOT NULL,
    code_verifier TEXT NULL,
    created_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credential_audit_log (
    id           TEXT PRIMARY KEY,
    user_id      TEXT NOT NULL,
    service_id   TEXT NOT NULL,
    action       TEXT NOT NULL,
    execution_id TEXT NULL,
    ip_address   TEXT NULL,
    metadata     TEXT NULL,
    timestamp    TEXT NOT NULL,
    prev_hash    TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_user_time
    ON credential_audit_log(user_id, timestamp, id);

CREATE TRIGGER IF NOT EXISTS credential_audit_log_no_update
    BEFORE UPDATE ON credential_audit_log
BEGIN
    SELECT RAISE(ABORT, 'credential_audit_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS credential_audit_log_no_delete
    BEFORE DELETE ON credential_audit_log
BEGIN
    SELECT RAISE(ABORT, 'credential_audit_log is append-only');
END;

CREATE TABLE IF NOT EXISTS confirmation_tokens (
    token         TEXT PRIMARY KEY,
    business_id   TEXT NOT NULL,
    request_hash  TEXT NOT NULL,
    summary       TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    expires_at_ms INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS idempotency_cache (
    key           TEXT PRIMARY KEY,
    principal_id  TEXT NOT NULL,
    status        INTEGER NOT NULL,
    headers       TEXT NOT NULL,
    body          TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_idempotency_age
    ON idempotency_cache(created_at_ms);

CREATE TABLE IF NOT EXISTS transactions (
    id           TEXT PRIMARY KEY,
    operation    TEXT NOT NULL CHECK (operation IN ('discover', 'query', 'execute')),
    business_id  TEXT NOT NULL,
    owner_key_id TEXT NOT NULL,
    status       TEXT NOT NULL,
    input        TEXT NULL,
    result       TEXT NULL,
    error        TEXT NULL,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_owner
    ON transactions(owner_key_id, created_at);
"#;

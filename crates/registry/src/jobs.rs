//! Generation job queue rows.
//!
//! Jobs are claimed atomically (oldest queued first) so exactly one worker
//! runs each job. Logs are an append-only JSON array updated
//! read-modify-write inside a transaction, so concurrent appends both
//! land. Listing is keyset-paginated on the compound `(created_at, id)`
//! cursor so ties at identical timestamps never lose rows.

use serde::Serialize;
use uuid::Uuid;

use agenr_domain::error::{Error, Result};
use agenr_store::{db_err, now_rfc3339, Store};

/// Stable error recorded for jobs orphaned by a dead worker.
pub const ORPHANED_ERROR: &str = "orphaned";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Invalid(format!("unknown job status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationJobRow {
    pub id: String,
    pub platform: String,
    pub owner_key_id: Option<String>,
    pub status: JobStatus,
    pub logs: Vec<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

impl GenerationJobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status_raw: String = row.get("status")?;
        let logs_raw: String = row.get("logs")?;
        let result_raw: Option<String> = row.get("result")?;
        Ok(Self {
            id: row.get("id")?,
            platform: row.get("platform")?,
            owner_key_id: row.get("owner_key_id")?,
            status: JobStatus::parse(&status_raw).unwrap_or(JobStatus::Failed),
            logs: serde_json::from_str(&logs_raw).unwrap_or_default(),
            result: result_raw.and_then(|s| serde_json::from_str(&s).ok()),
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Enqueue a generation request.
pub fn enqueue(store: &Store, platform: &str, owner_key_id: Option<&str>) -> Result<GenerationJobRow> {
    use agenr_domain::ident::normalize_platform;
    let platform = normalize_platform(platform)?;
    let row = GenerationJobRow {
        id: Uuid::new_v4().to_string(),
        platform,
        owner_key_id: owner_key_id.map(str::to_string),
        status: JobStatus::Queued,
        logs: Vec::new(),
        result: None,
        error: None,
        created_at: now_rfc3339(),
        started_at: None,
        completed_at: None,
    };
    let conn = store.lock();
    conn.execute(
        "INSERT INTO generation_jobs (id, platform, owner_key_id, status, logs, created_at)
         VALUES (?1, ?2, ?3, 'queued', '[]', ?4)",
        rusqlite::params![row.id, row.platform, row.owner_key_id, row.created_at],
    )
    .map_err(db_err)?;
    Ok(row)
}

/// Atomically claim the oldest queued job: flip to `running`, stamp
/// `started_at`, return the claimed row. `None` when the queue is empty.
pub fn claim_next_job(store: &Store) -> Result<Option<GenerationJobRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row(
        "UPDATE generation_jobs SET status = 'running', started_at = ?1
         WHERE id = (
             SELECT id FROM generation_jobs
             WHERE status = 'queued'
             ORDER BY created_at ASC, id ASC
             LIMIT 1
         )
         RETURNING *",
        [now_rfc3339()],
        GenerationJobRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Append one log line, read-modify-write under a transaction so two
/// concurrent appenders both land.
pub fn append_log(store: &Store, job_id: &str, line: &str) -> Result<()> {
    let mut conn = store.lock();
    let tx = conn.transaction().map_err(db_err)?;
    let logs_raw: String = tx
        .query_row("SELECT logs FROM generation_jobs WHERE id = ?1", [job_id], |r| r.get(0))
        .map_err(db_err)?;
    let mut logs: Vec<String> = serde_json::from_str(&logs_raw).unwrap_or_default();
    logs.push(line.to_string());
    tx.execute(
        "UPDATE generation_jobs SET logs = ?1 WHERE id = ?2",
        rusqlite::params![serde_json::to_string(&logs)?, job_id],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;
    Ok(())
}

/// Terminal success.
pub fn complete_job(store: &Store, job_id: &str, result: &serde_json::Value) -> Result<()> {
    let conn = store.lock();
    conn.execute(
        "UPDATE generation_jobs SET status = 'complete', result = ?1, completed_at = ?2
         WHERE id = ?3 AND status = 'running'",
        rusqlite::params![result.to_string(), now_rfc3339(), job_id],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Terminal failure.
pub fn fail_job(store: &Store, job_id: &str, error: &str) -> Result<()> {
    let conn = store.lock();
    conn.execute(
        "UPDATE generation_jobs SET status = 'failed', error = ?1, completed_at = ?2
         WHERE id = ?3 AND status = 'running'",
        rusqlite::params![error, now_rfc3339(), job_id],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Startup recovery: any job still `running` belonged to a dead process.
/// Flip to `failed` with the stable [`ORPHANED_ERROR`]; terminal rows are
/// untouched and a second call is a no-op.
pub fn recover_stale_jobs(store: &Store) -> Result<usize> {
    let conn = store.lock();
    let n = conn
        .execute(
            "UPDATE generation_jobs SET status = 'failed', error = ?1, completed_at = ?2
             WHERE status = 'running'",
            rusqlite::params![ORPHANED_ERROR, now_rfc3339()],
        )
        .map_err(db_err)?;
    if n > 0 {
        tracing::warn!(recovered = n, "orphaned generation jobs marked failed");
    }
    Ok(n)
}

/// Compound keyset cursor for job listing.
#[derive(Debug, Clone)]
pub struct JobCursor {
    pub before_created_at: String,
    pub before_id: String,
}

/// List jobs `(created_at DESC, id DESC)`. `owner` of `None` is the admin
/// view; otherwise only the owner's jobs are visible.
pub fn list_jobs(
    store: &Store,
    owner: Option<&str>,
    limit: usize,
    cursor: Option<&JobCursor>,
) -> Result<Vec<GenerationJobRow>> {
    let conn = store.lock();
    let mut stmt = conn
        .prepare(
            "SELECT * FROM generation_jobs
             WHERE (?1 IS NULL OR owner_key_id = ?1)
               AND (?2 IS NULL OR created_at < ?2
                    OR (created_at = ?2 AND id < ?3))
             ORDER BY created_at DESC, id DESC
             LIMIT ?4",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(
            rusqlite::params![
                owner,
                cursor.map(|c| c.before_created_at.clone()),
                cursor.map(|c| c.before_id.clone()),
                limit as i64,
            ],
            GenerationJobRow::from_row,
        )
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Fetch one job, owner-scoped unless `owner` is `None` (admin).
pub fn get_job(store: &Store, id: &str, owner: Option<&str>) -> Result<Option<GenerationJobRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    let row = conn
        .query_row("SELECT * FROM generation_jobs WHERE id = ?1", [id], GenerationJobRow::from_row)
        .optional()
        .map_err(db_err)?;
    Ok(row.filter(|r| match owner {
        None => true,
        Some(owner) => r.owner_key_id.as_deref() == Some(owner),
    }))
}

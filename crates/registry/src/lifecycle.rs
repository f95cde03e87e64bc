//! Adapter lifecycle: rows, status state machine and the files that shadow
//! them.
//!
//! The store is authoritative; files under the runtime tree are a
//! materialisation of `source_code` and are rebuilt from rows on startup.
//! Status moves:
//!
//! - upload/generate → `sandbox`
//! - `sandbox` → submit → `review` → withdraw → `sandbox`
//! - `review` → reject-with-feedback → `sandbox`; reject without → `rejected`
//! - `sandbox`/`review` → promote → `public` (displacing any previous
//!   public row to `rejected`, its file relocated under `_rejected/`)
//! - `public` → demote → owner's `sandbox`
//! - `sandbox`/`rejected` → archive → `archived` → restore → `sandbox`
//!
//! The partial unique index on `adapters(platform) WHERE status='public'`
//! is the real guarantee of a single public row; these functions never work
//! around it.

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use agenr_domain::error::{Error, Result};
use agenr_domain::ident::normalize_platform;
use agenr_store::{db_err, now_ms, now_rfc3339, sha256_hex, Store};

use crate::manifest::AdapterManifest;

/// Owner id of bundled, system-published adapters.
pub const SYSTEM_OWNER: &str = "system";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status & rows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Sandbox,
    Review,
    Public,
    Rejected,
    Archived,
}

impl AdapterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterStatus::Sandbox => "sandbox",
            AdapterStatus::Review => "review",
            AdapterStatus::Public => "public",
            AdapterStatus::Rejected => "rejected",
            AdapterStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "sandbox" => Ok(AdapterStatus::Sandbox),
            "review" => Ok(AdapterStatus::Review),
            "public" => Ok(AdapterStatus::Public),
            "rejected" => Ok(AdapterStatus::Rejected),
            "archived" => Ok(AdapterStatus::Archived),
            other => Err(Error::Invalid(format!("unknown adapter status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterRow {
    pub id: String,
    pub platform: String,
    pub owner_id: String,
    pub status: AdapterStatus,
    pub file_path: String,
    #[serde(skip_serializing)]
    pub source_code: Option<String>,
    pub source_hash: Option<String>,
    pub created_at: String,
    pub promoted_at: Option<String>,
    pub submitted_at: Option<String>,
    pub reviewed_at: Option<String>,
    pub archived_at: Option<String>,
    pub promoted_by: Option<String>,
    pub review_message: Option<String>,
    pub review_feedback: Option<String>,
}

impl AdapterRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let status_raw: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            platform: row.get("platform")?,
            owner_id: row.get("owner_id")?,
            status: AdapterStatus::parse(&status_raw).unwrap_or(AdapterStatus::Sandbox),
            file_path: row.get("file_path")?,
            source_code: row.get("source_code")?,
            source_hash: row.get("source_hash")?,
            created_at: row.get("created_at")?,
            promoted_at: row.get("promoted_at")?,
            submitted_at: row.get("submitted_at")?,
            reviewed_at: row.get("reviewed_at")?,
            archived_at: row.get("archived_at")?,
            promoted_by: row.get("promoted_by")?,
            review_message: row.get("review_message")?,
            review_feedback: row.get("review_feedback")?,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Layout of the runtime adapter tree.
#[derive(Debug, Clone)]
pub struct AdapterPaths {
    runtime_dir: PathBuf,
}

impl AdapterPaths {
    pub fn new(runtime_dir: PathBuf) -> Self {
        Self { runtime_dir }
    }

    pub fn sandbox_path(&self, owner_id: &str, platform: &str) -> PathBuf {
        self.runtime_dir
            .join("sandbox")
            .join(owner_id)
            .join(format!("{platform}.toml"))
    }

    pub fn public_path(&self, platform: &str) -> PathBuf {
        self.runtime_dir.join("public").join(format!("{platform}.toml"))
    }

    /// Timestamped so successive displacements never collide.
    pub fn rejected_path(&self, platform: &str) -> PathBuf {
        self.runtime_dir
            .join("_rejected")
            .join(format!("{platform}.{}.toml", now_ms()))
    }

    /// Whether `path` is inside the runtime tree. Rows pointing elsewhere
    /// are skipped during restore.
    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.runtime_dir)
    }

    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }
}

fn write_source(path: &Path, source: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, source)?;
    Ok(())
}

fn move_file(from: &str, to: &Path) -> Result<()> {
    let from = Path::new(from);
    if !from.exists() {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(from, to)?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lookups
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn get(store: &Store, platform: &str, owner_id: &str) -> Result<Option<AdapterRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row(
        "SELECT * FROM adapters WHERE platform = ?1 AND owner_id = ?2",
        [platform, owner_id],
        AdapterRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

pub fn get_public(store: &Store, platform: &str) -> Result<Option<AdapterRow>> {
    use rusqlite::OptionalExtension;
    let conn = store.lock();
    conn.query_row(
        "SELECT * FROM adapters WHERE platform = ?1 AND status = 'public'",
        [platform],
        AdapterRow::from_row,
    )
    .optional()
    .map_err(db_err)
}

pub fn all_rows(store: &Store) -> Result<Vec<AdapterRow>> {
    let conn = store.lock();
    let mut stmt = conn
        .prepare("SELECT * FROM adapters ORDER BY platform ASC, owner_id ASC")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], AdapterRow::from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

/// Visibility rules: admins see everything; owners see their own rows in
/// any status plus every public row.
pub fn list_visible(store: &Store, owner_id: Option<&str>) -> Result<Vec<AdapterRow>> {
    let rows = all_rows(store)?;
    Ok(match owner_id {
        None => rows,
        Some(owner) => rows
            .into_iter()
            .filter(|r| r.owner_id == owner || r.status == AdapterStatus::Public)
            .collect(),
    })
}

pub fn list_by_status(store: &Store, status: AdapterStatus) -> Result<Vec<AdapterRow>> {
    let conn = store.lock();
    let mut stmt = conn
        .prepare("SELECT * FROM adapters WHERE status = ?1 ORDER BY platform ASC, owner_id ASC")
        .map_err(db_err)?;
    let rows = stmt
        .query_map([status.as_str()], AdapterRow::from_row)
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upload adapter source into the owner's sandbox slot.
///
/// Re-uploads over `sandbox`/`rejected` rows reset them to `sandbox`; rows
/// in `review`, `public` or `archived` must leave that state first.
pub fn upload(
    store: &Store,
    paths: &AdapterPaths,
    platform: &str,
    owner_id: &str,
    source: &str,
) -> Result<AdapterRow> {
    let platform = normalize_platform(platform)?;
    let manifest = AdapterManifest::parse(source)?;
    if manifest.adapter.platform != platform {
        return Err(Error::Invalid(format!(
            "manifest platform '{}' does not match upload target '{platform}'",
            manifest.adapter.platform
        )));
    }

    let source_hash = sha256_hex(source);
    let file_path = paths.sandbox_path(owner_id, &platform);
    let now = now_rfc3339();

    let existing = get(store, &platform, owner_id)?;
    let row = match existing {
        Some(row)
            if matches!(row.status, AdapterStatus::Sandbox | AdapterStatus::Rejected) =>
        {
            let conn = store.lock();
            conn.execute(
                "UPDATE adapters SET status = 'sandbox', source_code = ?1, source_hash = ?2,
                        file_path = ?3, review_feedback = NULL
                 WHERE id = ?4",
                rusqlite::params![source, source_hash, file_path.display().to_string(), row.id],
            )
            .map_err(db_err)?;
            AdapterRow {
                status: AdapterStatus::Sandbox,
                source_code: Some(source.to_string()),
                source_hash: Some(source_hash),
                file_path: file_path.display().to_string(),
                review_feedback: None,
                ..row
            }
        }
        Some(row) => {
            return Err(Error::Conflict(format!(
                "adapter '{platform}' is {}; it cannot be overwritten",
                row.status.as_str()
            )))
        }
        None => {
            let row = AdapterRow {
                id: Uuid::new_v4().to_string(),
                platform: platform.clone(),
                owner_id: owner_id.to_string(),
                status: AdapterStatus::Sandbox,
                file_path: file_path.display().to_string(),
                source_code: Some(source.to_string()),
                source_hash: Some(source_hash),
                created_at: now,
                promoted_at: None,
                submitted_at: None,
                reviewed_at: None,
                archived_at: None,
                promoted_by: None,
                review_message: None,
                review_feedback: None,
            };
            let conn = store.lock();
            conn.execute(
                "INSERT INTO adapters
                    (id, platform, owner_id, status, file_path, source_code, source_hash, created_at)
                 VALUES (?1, ?2, ?3, 'sandbox', ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.id,
                    row.platform,
                    row.owner_id,
                    row.file_path,
                    row.source_code,
                    row.source_hash,
                    row.created_at,
                ],
            )
            .map_err(db_err)?;
            row
        }
    };

    write_source(&file_path, source)?;
    tracing::info!(platform = %platform, owner = owner_id, "adapter uploaded to sandbox");
    Ok(row)
}

/// `sandbox` → `review`.
pub fn submit(store: &Store, platform: &str, owner_id: &str, message: Option<&str>) -> Result<AdapterRow> {
    transition(
        store,
        platform,
        owner_id,
        &[AdapterStatus::Sandbox],
        AdapterStatus::Review,
        |conn, row| {
            conn.execute(
                "UPDATE adapters SET status = 'review', submitted_at = ?1, review_message = ?2
                 WHERE id = ?3",
                rusqlite::params![now_rfc3339(), message, row.id],
            )
            .map_err(db_err)
        },
    )
}

/// `review` → `sandbox` (owner pulls it back).
pub fn withdraw(store: &Store, platform: &str, owner_id: &str) -> Result<AdapterRow> {
    transition(
        store,
        platform,
        owner_id,
        &[AdapterStatus::Review],
        AdapterStatus::Sandbox,
        |conn, row| {
            conn.execute(
                "UPDATE adapters SET status = 'sandbox', submitted_at = NULL WHERE id = ?1",
                rusqlite::params![row.id],
            )
            .map_err(db_err)
        },
    )
}

/// Review decision against a submitted adapter. With feedback the row goes
/// back to the owner's sandbox; without, it lands in `rejected`.
pub fn reject(
    store: &Store,
    platform: &str,
    owner_id: &str,
    feedback: Option<&str>,
) -> Result<AdapterRow> {
    let target = if feedback.is_some() {
        AdapterStatus::Sandbox
    } else {
        AdapterStatus::Rejected
    };
    transition(
        store,
        platform,
        owner_id,
        &[AdapterStatus::Review],
        target,
        |conn, row| {
            conn.execute(
                "UPDATE adapters SET status = ?1, reviewed_at = ?2, review_feedback = ?3
                 WHERE id = ?4",
                rusqlite::params![target.as_str(), now_rfc3339(), feedback, row.id],
            )
            .map_err(db_err)
        },
    )
}

/// Promote an owner's `sandbox`/`review` adapter to the single public slot.
///
/// Any previously public row for the platform is displaced: status
/// `rejected`, file relocated under `_rejected/`. Both row updates happen
/// in one transaction so the partial unique index is never violated.
pub fn promote(
    store: &Store,
    paths: &AdapterPaths,
    platform: &str,
    owner_id: &str,
    promoted_by: &str,
) -> Result<AdapterRow> {
    let platform = normalize_platform(platform)?;
    let target = get(store, &platform, owner_id)?
        .ok_or_else(|| Error::NotFound(format!("adapter '{platform}' for owner '{owner_id}'")))?;
    if !matches!(target.status, AdapterStatus::Sandbox | AdapterStatus::Review) {
        return Err(Error::Conflict(format!(
            "adapter '{platform}' is {}; only sandbox or review adapters can be promoted",
            target.status.as_str()
        )));
    }

    let displaced = get_public(store, &platform)?;
    let public_path = paths.public_path(&platform);
    let rejected_path = displaced.as_ref().map(|_| paths.rejected_path(&platform));
    let now = now_rfc3339();

    {
        let mut conn = store.lock();
        let tx = conn.transaction().map_err(db_err)?;
        if let (Some(old), Some(rejected_path)) = (&displaced, &rejected_path) {
            tx.execute(
                "UPDATE adapters SET status = 'rejected', reviewed_at = ?1, file_path = ?2
                 WHERE id = ?3",
                rusqlite::params![now, rejected_path.display().to_string(), old.id],
            )
            .map_err(db_err)?;
        }
        tx.execute(
            "UPDATE adapters SET status = 'public', promoted_at = ?1, promoted_by = ?2,
                    file_path = ?3
             WHERE id = ?4",
            rusqlite::params![now, promoted_by, public_path.display().to_string(), target.id],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
    }

    // File materialisation follows the committed rows.
    if let (Some(old), Some(rejected_path)) = (&displaced, &rejected_path) {
        if let Err(e) = move_file(&old.file_path, rejected_path) {
            tracing::warn!(platform = %platform, error = %e, "failed to relocate displaced public file");
        }
    }
    if let Some(source) = &target.source_code {
        write_source(&public_path, source)?;
    } else if let Err(e) = move_file(&target.file_path, &public_path) {
        tracing::warn!(platform = %platform, error = %e, "failed to move promoted file");
    }
    // The sandbox copy moved to the public slot.
    if target.file_path != public_path.display().to_string() {
        let _ = std::fs::remove_file(&target.file_path);
    }

    tracing::info!(platform = %platform, owner = owner_id, promoted_by, "adapter promoted to public");
    get(store, &platform, owner_id)?
        .ok_or_else(|| Error::Integrity("adapter row vanished mid-update".into()))
}

/// `public` → the owner's `sandbox` slot.
pub fn demote(store: &Store, paths: &AdapterPaths, platform: &str) -> Result<AdapterRow> {
    let platform = normalize_platform(platform)?;
    let row = get_public(store, &platform)?
        .ok_or_else(|| Error::NotFound(format!("no public adapter for '{platform}'")))?;
    let sandbox_path = paths.sandbox_path(&row.owner_id, &platform);

    {
        let conn = store.lock();
        conn.execute(
            "UPDATE adapters SET status = 'sandbox', promoted_at = NULL, promoted_by = NULL,
                    file_path = ?1
             WHERE id = ?2",
            rusqlite::params![sandbox_path.display().to_string(), row.id],
        )
        .map_err(db_err)?;
    }
    if let Err(e) = move_file(&row.file_path, &sandbox_path) {
        tracing::warn!(platform = %platform, error = %e, "failed to move demoted file");
    }

    tracing::info!(platform = %platform, owner = %row.owner_id, "adapter demoted to sandbox");
    get(store, &platform, &row.owner_id)?
        .ok_or_else(|| Error::Integrity("adapter row vanished mid-update".into()))
}

/// Soft-delete: `sandbox`/`rejected` → `archived`.
pub fn archive(store: &Store, platform: &str, owner_id: &str) -> Result<AdapterRow> {
    transition(
        store,
        platform,
        owner_id,
        &[AdapterStatus::Sandbox, AdapterStatus::Rejected],
        AdapterStatus::Archived,
        |conn, row| {
            conn.execute(
                "UPDATE adapters SET status = 'archived', archived_at = ?1 WHERE id = ?2",
                rusqlite::params![now_rfc3339(), row.id],
            )
            .map_err(db_err)
        },
    )
}

/// `archived` → `sandbox`, rematerialising the source file.
pub fn restore(store: &Store, paths: &AdapterPaths, platform: &str, owner_id: &str) -> Result<AdapterRow> {
    let row = transition(
        store,
        platform,
        owner_id,
        &[AdapterStatus::Archived],
        AdapterStatus::Sandbox,
        |conn, row| {
            let sandbox = paths.sandbox_path(&row.owner_id, &row.platform);
            conn.execute(
                "UPDATE adapters SET status = 'sandbox', archived_at = NULL, file_path = ?1
                 WHERE id = ?2",
                rusqlite::params![sandbox.display().to_string(), row.id],
            )
            .map_err(db_err)
        },
    )?;
    if let Some(source) = &row.source_code {
        write_source(Path::new(&row.file_path), source)?;
    }
    Ok(row)
}

/// Remove the row and its file. Public adapters must be demoted first.
pub fn hard_delete(store: &Store, platform: &str, owner_id: &str) -> Result<bool> {
    let platform = normalize_platform(platform)?;
    let Some(row) = get(store, &platform, owner_id)? else {
        return Ok(false);
    };
    if row.status == AdapterStatus::Public {
        return Err(Error::Conflict(
            "public adapters must be demoted before deletion".into(),
        ));
    }
    {
        let conn = store.lock();
        conn.execute("DELETE FROM adapters WHERE id = ?1", [&row.id])
            .map_err(db_err)?;
    }
    let _ = std::fs::remove_file(&row.file_path);
    tracing::info!(platform = %platform, owner = owner_id, "adapter hard-deleted");
    Ok(true)
}

/// Shared guard + update for simple status transitions.
fn transition(
    store: &Store,
    platform: &str,
    owner_id: &str,
    allowed_from: &[AdapterStatus],
    to: AdapterStatus,
    update: impl FnOnce(&rusqlite::Connection, &AdapterRow) -> Result<usize>,
) -> Result<AdapterRow> {
    let platform = normalize_platform(platform)?;
    let row = get(store, &platform, owner_id)?
        .ok_or_else(|| Error::NotFound(format!("adapter '{platform}' for owner '{owner_id}'")))?;
    if !allowed_from.contains(&row.status) {
        return Err(Error::Conflict(format!(
            "adapter '{platform}' is {}; cannot move to {}",
            row.status.as_str(),
            to.as_str()
        )));
    }
    {
        let conn = store.lock();
        update(&conn, &row)?;
    }
    get(store, &platform, owner_id)?
        .ok_or_else(|| Error::Integrity("adapter row vanished mid-update".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restore-on-startup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Materialise missing source files from rows. Rows whose `file_path`
/// escapes the runtime tree are skipped. Returns the number written.
pub fn restore_files(store: &Store, paths: &AdapterPaths) -> Result<usize> {
    let mut written = 0usize;
    for row in all_rows(store)? {
        if row.status == AdapterStatus::Archived {
            continue;
        }
        let path = PathBuf::from(&row.file_path);
        if !paths.contains(&path) {
            tracing::warn!(
                platform = %row.platform,
                path = %path.display(),
                "skipping restore: file path outside the runtime tree"
            );
            continue;
        }
        if path.exists() {
            continue;
        }
        let Some(source) = &row.source_code else {
            continue;
        };
        write_source(&path, source)?;
        written += 1;
    }
    if written > 0 {
        tracing::info!(written, "restored adapter files from store");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_for(platform: &str) -> String {
        format!(
            r#"
            [adapter]
            platform = "{platform}"
            version = "1.0.0"
            base_url = "https://api.example.com"

            [[query]]
            name = "ping"
            path = "/ping"
            "#
        )
    }

    fn setup() -> (Store, AdapterPaths, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let paths = AdapterPaths::new(tmp.path().join("runtime"));
        (store, paths, tmp)
    }

    #[test]
    fn upload_creates_sandbox_row_and_file() {
        let (store, paths, _tmp) = setup();
        let row = upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        assert_eq!(row.status, AdapterStatus::Sandbox);
        assert!(Path::new(&row.file_path).exists());
        assert_eq!(row.source_hash.as_deref(), Some(sha256_hex(&source_for("toast")).as_str()));
    }

    #[test]
    fn upload_rejects_platform_mismatch() {
        let (store, paths, _tmp) = setup();
        let err = upload(&store, &paths, "square", "owner-a", &source_for("toast")).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn submit_withdraw_cycle() {
        let (store, paths, _tmp) = setup();
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();

        let row = submit(&store, "toast", "owner-a", Some("please review")).unwrap();
        assert_eq!(row.status, AdapterStatus::Review);
        assert_eq!(row.review_message.as_deref(), Some("please review"));
        assert!(row.submitted_at.is_some());

        // Cannot re-submit while in review.
        assert!(matches!(
            submit(&store, "toast", "owner-a", None),
            Err(Error::Conflict(_))
        ));

        let row = withdraw(&store, "toast", "owner-a").unwrap();
        assert_eq!(row.status, AdapterStatus::Sandbox);
    }

    #[test]
    fn reject_with_feedback_returns_to_sandbox() {
        let (store, paths, _tmp) = setup();
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        submit(&store, "toast", "owner-a", None).unwrap();

        let row = reject(&store, "toast", "owner-a", Some("needs domain allowlist")).unwrap();
        assert_eq!(row.status, AdapterStatus::Sandbox);
        assert_eq!(row.review_feedback.as_deref(), Some("needs domain allowlist"));
    }

    #[test]
    fn reject_without_feedback_is_terminal() {
        let (store, paths, _tmp) = setup();
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        submit(&store, "toast", "owner-a", None).unwrap();

        let row = reject(&store, "toast", "owner-a", None).unwrap();
        assert_eq!(row.status, AdapterStatus::Rejected);
    }

    #[test]
    fn promote_and_displacement_rotation() {
        let (store, paths, _tmp) = setup();

        // Owner A uploads and is promoted.
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        let a = promote(&store, &paths, "toast", "owner-a", "admin-1").unwrap();
        assert_eq!(a.status, AdapterStatus::Public);
        assert!(Path::new(&a.file_path).exists());
        assert_eq!(a.promoted_by.as_deref(), Some("admin-1"));

        // Owner B uploads the same platform and is promoted over A.
        upload(&store, &paths, "toast", "owner-b", &source_for("toast")).unwrap();
        let b = promote(&store, &paths, "toast", "owner-b", "admin-1").unwrap();
        assert_eq!(b.status, AdapterStatus::Public);

        // A is now rejected, its file relocated under _rejected/.
        let a = get(&store, "toast", "owner-a").unwrap().unwrap();
        assert_eq!(a.status, AdapterStatus::Rejected);
        assert!(a.file_path.contains("_rejected"));
        assert!(Path::new(&a.file_path).exists());

        // Exactly one public row survives.
        let public = list_by_status(&store, AdapterStatus::Public).unwrap();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].owner_id, "owner-b");
    }

    #[test]
    fn promote_requires_sandbox_or_review() {
        let (store, paths, _tmp) = setup();
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        promote(&store, &paths, "toast", "owner-a", "admin-1").unwrap();

        // Promoting an already-public adapter is a conflict.
        assert!(matches!(
            promote(&store, &paths, "toast", "owner-a", "admin-1"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn demote_returns_to_owner_sandbox() {
        let (store, paths, _tmp) = setup();
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        promote(&store, &paths, "toast", "owner-a", "admin-1").unwrap();

        let row = demote(&store, &paths, "toast").unwrap();
        assert_eq!(row.status, AdapterStatus::Sandbox);
        assert_eq!(row.owner_id, "owner-a");
        assert!(row.file_path.contains("sandbox"));
        assert!(Path::new(&row.file_path).exists());
    }

    #[test]
    fn archive_restore_cycle() {
        let (store, paths, _tmp) = setup();
        let uploaded = upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();

        let row = archive(&store, "toast", "owner-a").unwrap();
        assert_eq!(row.status, AdapterStatus::Archived);
        assert!(row.archived_at.is_some());

        // Remove the file to prove restore rematerialises it.
        std::fs::remove_file(&uploaded.file_path).unwrap();

        let row = restore(&store, &paths, "toast", "owner-a").unwrap();
        assert_eq!(row.status, AdapterStatus::Sandbox);
        assert!(Path::new(&row.file_path).exists());
    }

    #[test]
    fn hard_delete_removes_row_and_file() {
        let (store, paths, _tmp) = setup();
        let row = upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        assert!(hard_delete(&store, "toast", "owner-a").unwrap());
        assert!(!Path::new(&row.file_path).exists());
        assert!(get(&store, "toast", "owner-a").unwrap().is_none());
        assert!(!hard_delete(&store, "toast", "owner-a").unwrap());
    }

    #[test]
    fn visibility_rules() {
        let (store, paths, _tmp) = setup();
        upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        upload(&store, &paths, "square", "owner-b", &source_for("square")).unwrap();
        promote(&store, &paths, "square", "owner-b", "admin-1").unwrap();

        // Admin sees everything.
        assert_eq!(list_visible(&store, None).unwrap().len(), 2);

        // Owner A sees their sandbox plus B's public adapter.
        let visible: Vec<String> = list_visible(&store, Some("owner-a"))
            .unwrap()
            .into_iter()
            .map(|r| r.platform)
            .collect();
        assert_eq!(visible, vec!["square", "toast"]);

        // A stranger sees only public adapters.
        let visible = list_visible(&store, Some("owner-z")).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].platform, "square");
    }

    #[test]
    fn restore_files_skips_paths_outside_runtime_tree() {
        let (store, paths, tmp) = setup();
        let row = upload(&store, &paths, "toast", "owner-a", &source_for("toast")).unwrap();
        std::fs::remove_file(&row.file_path).unwrap();

        // A row whose file path escapes the tree.
        let outside = tmp.path().join("elsewhere").join("evil.toml");
        {
            let conn = store.lock();
            conn.execute(
                "INSERT INTO adapters (id, platform, owner_id, status, file_path, source_code, created_at)
                 VALUES ('x1', 'square', 'owner-a', 'sandbox', ?1, 'src', ?2)",
                rusqlite::params![outside.display().to_string(), now_rfc3339()],
            )
            .unwrap();
        }

        let written = restore_files(&store, &paths).unwrap();
        assert_eq!(written, 1);
        assert!(Path::new(&row.file_path).exists());
        assert!(!outside.exists());
    }
}

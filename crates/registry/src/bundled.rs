//! Bundled adapter seeding.
//!
//! Source-controlled adapters ship as manifest files in the bundled
//! directory. At startup each is inserted as a system-owned public row when
//! the platform has no public adapter yet; when one exists, the stored
//! manifest version is compared numerically and only a strictly newer
//! bundled version overwrites it.

use uuid::Uuid;

use agenr_domain::error::Result;
use agenr_store::{db_err, now_rfc3339, sha256_hex, Store};

use crate::lifecycle::{self, AdapterPaths, SYSTEM_OWNER};
use crate::manifest::{semver_newer, AdapterManifest};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub inserted: usize,
    pub upgraded: usize,
    pub skipped: usize,
}

/// Walk `bundled_dir` and reconcile every `*.toml` manifest with the store.
pub fn seed_bundled(
    store: &Store,
    paths: &AdapterPaths,
    bundled_dir: &std::path::Path,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();
    if !bundled_dir.exists() {
        tracing::info!(dir = %bundled_dir.display(), "no bundled adapters directory");
        return Ok(summary);
    }

    let mut entries: Vec<_> = std::fs::read_dir(bundled_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    entries.sort();

    for path in entries {
        let source = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable bundled adapter");
                summary.skipped += 1;
                continue;
            }
        };
        let manifest = match AdapterManifest::parse(&source) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid bundled adapter");
                summary.skipped += 1;
                continue;
            }
        };

        match seed_one(store, paths, &manifest, &source)? {
            SeedOutcome::Inserted => summary.inserted += 1,
            SeedOutcome::Upgraded => summary.upgraded += 1,
            SeedOutcome::Skipped => summary.skipped += 1,
        }
    }

    tracing::info!(
        inserted = summary.inserted,
        upgraded = summary.upgraded,
        skipped = summary.skipped,
        "bundled adapters seeded"
    );
    Ok(summary)
}

enum SeedOutcome {
    Inserted,
    Upgraded,
    Skipped,
}

fn seed_one(
    store: &Store,
    paths: &AdapterPaths,
    manifest: &AdapterManifest,
    source: &str,
) -> Result<SeedOutcome> {
    let platform = &manifest.adapter.platform;
    let public_path = paths.public_path(platform);
    let source_hash = sha256_hex(source);

    match lifecycle::get_public(store, platform)? {
        None => {
            let conn = store.lock();
            conn.execute(
                "INSERT INTO adapters
                    (id, platform, owner_id, status, file_path, source_code, source_hash,
                     created_at, promoted_at, promoted_by)
                 VALUES (?1, ?2, ?3, 'public', ?4, ?5, ?6, ?7, ?7, ?3)",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    platform,
                    SYSTEM_OWNER,
                    public_path.display().to_string(),
                    source,
                    source_hash,
                    now_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            drop(conn);
            write_public_file(&public_path, source);
            tracing::info!(platform, "bundled adapter published");
            Ok(SeedOutcome::Inserted)
        }
        Some(existing) => {
            let stored_version = existing
                .source_code
                .as_deref()
                .and_then(|s| AdapterManifest::parse(s).ok())
                .map(|m| m.adapter.version)
                .unwrap_or_default();
            if !semver_newer(&manifest.adapter.version, &stored_version) {
                return Ok(SeedOutcome::Skipped);
            }

            let conn = store.lock();
            conn.execute(
                "UPDATE adapters SET source_code = ?1, source_hash = ?2, file_path = ?3,
                        promoted_at = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    source,
                    source_hash,
                    public_path.display().to_string(),
                    now_rfc3339(),
                    existing.id,
                ],
            )
            .map_err(db_err)?;
            drop(conn);
            write_public_file(&public_path, source);
            tracing::info!(
                platform,
                from = %stored_version,
                to = %manifest.adapter.version,
                "bundled adapter upgraded"
            );
            Ok(SeedOutcome::Upgraded)
        }
    }
}

fn write_public_file(path: &std::path::Path, source: &str) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(path, source) {
        tracing::warn!(path = %path.display(), error = %e, "failed to write public adapter file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::AdapterStatus;

    fn bundled_source(platform: &str, version: &str) -> String {
        format!(
            r#"
            [adapter]
            platform = "{platform}"
            version = "{version}"
            base_url = "https://api.example.com"
            "#
        )
    }

    fn setup() -> (Store, AdapterPaths, std::path::PathBuf, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open_in_memory().unwrap();
        let paths = AdapterPaths::new(tmp.path().join("runtime"));
        let bundled = tmp.path().join("bundled");
        std::fs::create_dir_all(&bundled).unwrap();
        (store, paths, bundled, tmp)
    }

    #[test]
    fn seeds_fresh_platforms_as_system_public() {
        let (store, paths, bundled, _tmp) = setup();
        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "1.0.0")).unwrap();
        std::fs::write(bundled.join("square.toml"), bundled_source("square", "2.1.0")).unwrap();

        let summary = seed_bundled(&store, &paths, &bundled).unwrap();
        assert_eq!(summary.inserted, 2);

        let row = lifecycle::get_public(&store, "toast").unwrap().unwrap();
        assert_eq!(row.owner_id, SYSTEM_OWNER);
        assert_eq!(row.status, AdapterStatus::Public);
        assert!(std::path::Path::new(&row.file_path).exists());
    }

    #[test]
    fn reseeding_same_version_is_a_noop() {
        let (store, paths, bundled, _tmp) = setup();
        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "1.0.0")).unwrap();
        seed_bundled(&store, &paths, &bundled).unwrap();

        let summary = seed_bundled(&store, &paths, &bundled).unwrap();
        assert_eq!(summary.inserted, 0);
        assert_eq!(summary.upgraded, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn strictly_newer_bundled_version_overwrites() {
        let (store, paths, bundled, _tmp) = setup();
        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "1.0.0")).unwrap();
        seed_bundled(&store, &paths, &bundled).unwrap();

        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "1.1.0")).unwrap();
        let summary = seed_bundled(&store, &paths, &bundled).unwrap();
        assert_eq!(summary.upgraded, 1);

        let row = lifecycle::get_public(&store, "toast").unwrap().unwrap();
        let manifest = AdapterManifest::parse(row.source_code.as_deref().unwrap()).unwrap();
        assert_eq!(manifest.adapter.version, "1.1.0");
    }

    #[test]
    fn older_bundled_version_never_downgrades() {
        let (store, paths, bundled, _tmp) = setup();
        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "2.0.0")).unwrap();
        seed_bundled(&store, &paths, &bundled).unwrap();

        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "1.9.9")).unwrap();
        let summary = seed_bundled(&store, &paths, &bundled).unwrap();
        assert_eq!(summary.skipped, 1);

        let row = lifecycle::get_public(&store, "toast").unwrap().unwrap();
        let manifest = AdapterManifest::parse(row.source_code.as_deref().unwrap()).unwrap();
        assert_eq!(manifest.adapter.version, "2.0.0");
    }

    #[test]
    fn invalid_bundled_files_are_skipped() {
        let (store, paths, bundled, _tmp) = setup();
        std::fs::write(bundled.join("bad.toml"), "not a manifest [").unwrap();
        std::fs::write(bundled.join("toast.toml"), bundled_source("toast", "1.0.0")).unwrap();

        let summary = seed_bundled(&store, &paths, &bundled).unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn missing_bundled_dir_is_fine() {
        let (store, paths, bundled, _tmp) = setup();
        std::fs::remove_dir_all(&bundled).unwrap();
        let summary = seed_bundled(&store, &paths, &bundled).unwrap();
        assert_eq!(summary, SeedSummary::default());
    }
}

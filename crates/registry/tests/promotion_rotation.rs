//! The public-slot rotation flow: two owners compete for one platform's
//! public slot, with the displaced adapter landing in `_rejected/`.

use std::path::Path;
use std::time::Duration;

use agenr_registry::{lifecycle, AdapterPaths, AdapterRegistry, AdapterStatus};
use agenr_store::Store;

fn source_for(platform: &str, version: &str) -> String {
    format!(
        r#"
        [adapter]
        platform = "{platform}"
        version = "{version}"
        base_url = "https://api.example.com"

        [[query]]
        name = "ping"
        path = "/ping"
        "#
    )
}

fn setup() -> (Store, AdapterPaths, AdapterRegistry, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = Store::open(&tmp.path().join("agenr.sqlite")).unwrap();
    let paths = AdapterPaths::new(tmp.path().join("runtime"));
    let registry = AdapterRegistry::new(Duration::from_secs(5)).unwrap();
    (store, paths, registry, tmp)
}

#[test]
fn admin_promote_and_archive_rotation() {
    let (store, paths, registry, _tmp) = setup();

    // Owner A uploads toast (sandbox) and an admin promotes it.
    lifecycle::upload(&store, &paths, "toast", "owner-a", &source_for("toast", "1.0.0")).unwrap();
    let promoted = lifecycle::promote(&store, &paths, "toast", "owner-a", "admin-1").unwrap();
    assert_eq!(promoted.status, AdapterStatus::Public);
    assert_eq!(promoted.owner_id, "owner-a");
    registry.sync(&store).unwrap();
    assert!(registry.resolve("toast", "anyone").is_some());

    // Owner B uploads toast (sandbox); admin promotes B over A.
    lifecycle::upload(&store, &paths, "toast", "owner-b", &source_for("toast", "2.0.0")).unwrap();
    lifecycle::promote(&store, &paths, "toast", "owner-b", "admin-1").unwrap();
    registry.sync(&store).unwrap();

    // B is now public.
    let public = lifecycle::get_public(&store, "toast").unwrap().unwrap();
    assert_eq!(public.owner_id, "owner-b");

    // A's row is rejected and its file relocated under _rejected/.
    let displaced = lifecycle::get(&store, "toast", "owner-a").unwrap().unwrap();
    assert_eq!(displaced.status, AdapterStatus::Rejected);
    assert!(displaced.file_path.contains("_rejected"));
    assert!(Path::new(&displaced.file_path).exists());

    // Only one public row exists.
    assert_eq!(
        lifecycle::list_by_status(&store, AdapterStatus::Public)
            .unwrap()
            .len(),
        1
    );

    // Resolution now serves B's version.
    let entry = registry.resolve("toast", "anyone").unwrap();
    assert_eq!(entry.manifest().adapter.version, "2.0.0");

    // The displaced owner can archive the rejected row and restore later.
    lifecycle::archive(&store, "toast", "owner-a").unwrap();
    let restored = lifecycle::restore(&store, &paths, "toast", "owner-a").unwrap();
    assert_eq!(restored.status, AdapterStatus::Sandbox);
}

#[test]
fn scoped_sandbox_survives_anothers_promotion() {
    let (store, paths, registry, _tmp) = setup();

    lifecycle::upload(&store, &paths, "toast", "owner-a", &source_for("toast", "1.0.0")).unwrap();
    lifecycle::upload(&store, &paths, "toast", "owner-b", &source_for("toast", "9.0.0")).unwrap();
    lifecycle::promote(&store, &paths, "toast", "owner-a", "admin-1").unwrap();
    registry.sync(&store).unwrap();

    // B keeps the scoped override; strangers get the public entry.
    assert_eq!(
        registry
            .resolve("toast", "owner-b")
            .unwrap()
            .manifest()
            .adapter
            .version,
        "9.0.0"
    );
    assert_eq!(
        registry
            .resolve("toast", "owner-c")
            .unwrap()
            .manifest()
            .adapter
            .version,
        "1.0.0"
    );
}

#[test]
fn demote_reopens_the_public_slot() {
    let (store, paths, registry, _tmp) = setup();

    lifecycle::upload(&store, &paths, "toast", "owner-a", &source_for("toast", "1.0.0")).unwrap();
    lifecycle::promote(&store, &paths, "toast", "owner-a", "admin-1").unwrap();
    lifecycle::demote(&store, &paths, "toast").unwrap();
    registry.sync(&store).unwrap();

    // No public entry any more; the owner still resolves their sandbox.
    assert!(registry.resolve("toast", "stranger").is_none());
    assert!(registry.resolve("toast", "owner-a").is_some());

    // A fresh promotion works after demotion.
    let again = lifecycle::promote(&store, &paths, "toast", "owner-a", "admin-2").unwrap();
    assert_eq!(again.status, AdapterStatus::Public);
}

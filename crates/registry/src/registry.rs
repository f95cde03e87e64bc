//! In-memory adapter registry.
//!
//! Two layers: one global *public* entry per platform and *scoped* entries
//! per `(platform, owner)` that override public for that owner. Entries are
//! rebuilt from the store on [`AdapterRegistry::sync`]; the cache key is
//! the source hash, so an unchanged adapter keeps its built instance while
//! a changed or re-statused row is evicted and reloaded.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use agenr_domain::error::{Error, Result};
use agenr_store::Store;

use crate::adapter::DeclarativeAdapter;
use crate::lifecycle::{self, AdapterPaths, AdapterStatus};
use crate::manifest::AdapterManifest;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A loaded adapter, ready to serve operations.
pub struct RegistryEntry {
    pub platform: String,
    /// `None` for the public layer; the owning key/user id for scoped ones.
    pub owner_id: Option<String>,
    pub source_hash: String,
    pub adapter: Arc<DeclarativeAdapter>,
}

impl RegistryEntry {
    pub fn manifest(&self) -> &AdapterManifest {
        self.adapter.manifest()
    }
}

/// Counters returned by a sync pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub loaded: usize,
    pub reused: usize,
    pub removed: usize,
    pub failed: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AdapterRegistry {
    public: RwLock<HashMap<String, Arc<RegistryEntry>>>,
    scoped: RwLock<HashMap<(String, String), Arc<RegistryEntry>>>,
    http: reqwest::Client,
}

impl AdapterRegistry {
    pub fn new(http_timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| Error::Transient(format!("building adapter HTTP client: {e}")))?;
        Ok(Self {
            public: RwLock::new(HashMap::new()),
            scoped: RwLock::new(HashMap::new()),
            http,
        })
    }

    /// Build an adapter from manifest source without registering it.
    pub fn hot_load(&self, source: &str) -> Result<(AdapterManifest, Arc<DeclarativeAdapter>)> {
        let manifest = AdapterManifest::parse(source)?;
        let adapter = Arc::new(DeclarativeAdapter::new(manifest.clone(), self.http.clone()));
        Ok((manifest, adapter))
    }

    /// Resolution order: scoped entry for `(platform, owner)`, then the
    /// public entry, then absent.
    pub fn resolve(&self, platform: &str, owner_id: &str) -> Option<Arc<RegistryEntry>> {
        if let Some(entry) = self
            .scoped
            .read()
            .get(&(platform.to_string(), owner_id.to_string()))
        {
            return Some(entry.clone());
        }
        self.public.read().get(platform).cloned()
    }

    pub fn public_platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.public.read().keys().cloned().collect();
        platforms.sort();
        platforms
    }

    /// Rebuild both layers from the store.
    ///
    /// Rows keep their built adapter when `(status layer, source_hash)` is
    /// unchanged. Rows that disappeared, went non-runnable (rejected /
    /// archived) or changed hash are evicted. A single failing adapter is
    /// logged and skipped; the rest of the sync proceeds.
    pub fn sync(&self, store: &Store) -> Result<SyncSummary> {
        let rows = lifecycle::all_rows(store)?;
        let mut summary = SyncSummary::default();

        let old_public = self.public.read().clone();
        let old_scoped = self.scoped.read().clone();
        let mut new_public: HashMap<String, Arc<RegistryEntry>> = HashMap::new();
        let mut new_scoped: HashMap<(String, String), Arc<RegistryEntry>> = HashMap::new();

        for row in rows {
            let Some(source_hash) = row.source_hash.clone() else {
                continue;
            };
            let Some(source) = row.source_code.clone() else {
                continue;
            };
            match row.status {
                AdapterStatus::Public => {
                    let reusable = old_public
                        .get(&row.platform)
                        .filter(|e| e.source_hash == source_hash)
                        .cloned();
                    match reusable {
                        Some(entry) => {
                            summary.reused += 1;
                            new_public.insert(row.platform.clone(), entry);
                        }
                        None => match self.hot_load(&source) {
                            Ok((_, adapter)) => {
                                summary.loaded += 1;
                                new_public.insert(
                                    row.platform.clone(),
                                    Arc::new(RegistryEntry {
                                        platform: row.platform.clone(),
                                        owner_id: None,
                                        source_hash,
                                        adapter,
                                    }),
                                );
                            }
                            Err(e) => {
                                summary.failed += 1;
                                tracing::warn!(
                                    platform = %row.platform,
                                    error = %e,
                                    "failed to load public adapter; platform absent"
                                );
                            }
                        },
                    }
                }
                AdapterStatus::Sandbox | AdapterStatus::Review => {
                    let key = (row.platform.clone(), row.owner_id.clone());
                    let reusable = old_scoped
                        .get(&key)
                        .filter(|e| e.source_hash == source_hash)
                        .cloned();
                    match reusable {
                        Some(entry) => {
                            summary.reused += 1;
                            new_scoped.insert(key, entry);
                        }
                        None => match self.hot_load(&source) {
                            Ok((_, adapter)) => {
                                summary.loaded += 1;
                                new_scoped.insert(
                                    key,
                                    Arc::new(RegistryEntry {
                                        platform: row.platform.clone(),
                                        owner_id: Some(row.owner_id.clone()),
                                        source_hash,
                                        adapter,
                                    }),
                                );
                            }
                            Err(e) => {
                                summary.failed += 1;
                                tracing::warn!(
                                    platform = %row.platform,
                                    owner = %row.owner_id,
                                    error = %e,
                                    "failed to load scoped adapter; entry absent"
                                );
                            }
                        },
                    }
                }
                AdapterStatus::Rejected | AdapterStatus::Archived => {}
            }
        }

        summary.removed = old_public
            .keys()
            .filter(|k| !new_public.contains_key(*k))
            .count()
            + old_scoped
                .keys()
                .filter(|k| !new_scoped.contains_key(*k))
                .count();

        *self.public.write() = new_public;
        *self.scoped.write() = new_scoped;

        tracing::info!(
            loaded = summary.loaded,
            reused = summary.reused,
            removed = summary.removed,
            failed = summary.failed,
            "adapter registry synced"
        );
        Ok(summary)
    }

    /// Startup path: rematerialise files from rows, then sync.
    pub fn restore(&self, store: &Store, paths: &AdapterPaths) -> Result<SyncSummary> {
        lifecycle::restore_files(store, paths)?;
        self.sync(store)
    }
}

//! AppState construction and background-task spawning extracted from
//! `main.rs`.
//!
//! This is the single composition point: the store is opened once and
//! every component receives an explicit handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use agenr_audit::AuditLog;
use agenr_domain::config::{Config, ConfigSeverity};
use agenr_registry::{bundled, jobs, AdapterPaths, AdapterRegistry, JobWorker, ManifestSkeletonGenerator};
use agenr_store::Store;
use agenr_vault::{envelope, CredentialVault, Kms, LocalKms};

use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Store (schema + migrations applied on open) ──────────────────
    let store = Store::open(&config.store.db_path).context("opening store")?;
    tracing::info!(path = %config.store.db_path.display(), "store ready");

    // ── Audit chain ──────────────────────────────────────────────────
    let audit = AuditLog::new(store.clone());
    tracing::info!("audit log ready");

    // ── KMS + vault ──────────────────────────────────────────────────
    let kms: Arc<dyn Kms> = match LocalKms::from_env(&config.vault.master_key_env) {
        Ok(kms) => {
            tracing::info!(key_id = kms.key_id(), "KMS master key loaded");
            Arc::new(kms)
        }
        Err(e) => {
            tracing::warn!(
                env_var = %config.vault.master_key_env,
                error = %e,
                "no KMS master key — using an ephemeral key; credentials will not survive restart"
            );
            Arc::new(LocalKms::new(envelope::generate_dek()))
        }
    };
    let vault = CredentialVault::new(store.clone(), audit.clone(), kms);
    tracing::info!("credential vault ready");

    // ── Adapter registry ─────────────────────────────────────────────
    for dir in [&config.adapters.adapters_dir, &config.adapters.runtime_dir] {
        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to create adapter directory");
        }
    }
    let adapter_paths = AdapterPaths::new(config.adapters.runtime_dir.clone());
    let registry = Arc::new(
        AdapterRegistry::new(Duration::from_secs(config.adapters.http_timeout_secs))
            .context("initializing adapter registry")?,
    );
    registry
        .restore(&store, &adapter_paths)
        .context("restoring adapter files")?;
    bundled::seed_bundled(&store, &adapter_paths, &config.adapters.bundled_dir)
        .context("seeding bundled adapters")?;
    let summary = registry.sync(&store).context("syncing adapter registry")?;
    tracing::info!(
        loaded = summary.loaded,
        reused = summary.reused,
        "adapter registry ready"
    );

    // ── Job queue recovery ───────────────────────────────────────────
    let recovered = jobs::recover_stale_jobs(&store).context("recovering stale jobs")?;
    if recovered > 0 {
        tracing::info!(recovered, "stale generation jobs recovered");
    }

    // ── Outbound HTTP client (OAuth refresh + exchange) ──────────────
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.vault.refresh_timeout_secs))
        .build()
        .context("building outbound HTTP client")?;

    // ── Bootstrap admin key (read once) ──────────────────────────────
    let bootstrap_admin_key = std::env::var("AGENR_API_KEY")
        .ok()
        .filter(|v| !v.is_empty());
    if bootstrap_admin_key.is_some() {
        tracing::info!("bootstrap admin key configured");
    }

    Ok(AppState {
        config,
        store,
        audit,
        vault,
        registry,
        adapter_paths,
        http,
        bootstrap_admin_key,
    })
}

/// Spawn the long-running background tokio tasks (generation worker and
/// the expiry sweeps). Call **after** [`build_app_state`].
pub fn spawn_background_tasks(state: &AppState) {
    // ── Generation worker ────────────────────────────────────────────
    {
        let worker = JobWorker::new(
            state.store.clone(),
            state.registry.clone(),
            state.adapter_paths.clone(),
            Arc::new(ManifestSkeletonGenerator),
            Duration::from_millis(state.config.jobs.poll_interval_ms),
            Duration::from_secs(state.config.jobs.generator_timeout_secs),
        );
        tokio::spawn(worker.run());
    }

    // ── Hourly expiry sweeps ─────────────────────────────────────────
    {
        let store = state.store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3_600));
            loop {
                interval.tick().await;
                match crate::runtime::idempotency::cleanup_expired(&store) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "idempotency entries swept"),
                    Err(e) => tracing::warn!(error = %e, "idempotency sweep failed"),
                }
                match agenr_vault::oauth_flow::cleanup_expired_states(&store) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "oauth states swept"),
                    Err(e) => tracing::warn!(error = %e, "oauth state sweep failed"),
                }
                match crate::runtime::confirmation::sweep_expired(&store) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "confirmation tokens swept"),
                    Err(e) => tracing::warn!(error = %e, "confirmation sweep failed"),
                }
                match agenr_store::sessions::cleanup_expired_sessions(&store) {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "sessions swept"),
                    Err(e) => tracing::warn!(error = %e, "session sweep failed"),
                }
            }
        });
    }
    tracing::info!("background tasks spawned");
}

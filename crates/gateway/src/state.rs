//! Shared application state passed to all API handlers.

use std::sync::Arc;

use agenr_audit::AuditLog;
use agenr_domain::config::Config;
use agenr_registry::{AdapterPaths, AdapterRegistry};
use agenr_store::Store;
use agenr_vault::CredentialVault;

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core** — config and the single store handle every subsystem shares
/// - **Trust** — audit chain and credential vault
/// - **Adapters** — registry, runtime tree layout
/// - **Outbound** — shared HTTP client for OAuth exchanges
/// - **Security (startup-computed)** — the bootstrap admin key
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Store,

    // ── Trust ─────────────────────────────────────────────────────────
    pub audit: AuditLog,
    pub vault: CredentialVault,

    // ── Adapters ──────────────────────────────────────────────────────
    pub registry: Arc<AdapterRegistry>,
    pub adapter_paths: AdapterPaths,

    // ── Outbound ──────────────────────────────────────────────────────
    pub http: reqwest::Client,

    // ── Security (startup-computed) ───────────────────────────────────
    /// Raw `AGENR_API_KEY` value, read once at startup. Used only to
    /// lazily insert the bootstrap admin row on first resolve.
    pub bootstrap_admin_key: Option<String>,
}

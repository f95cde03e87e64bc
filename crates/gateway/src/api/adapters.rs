//! Adapter lifecycle endpoints.
//!
//! Owners author and submit adapters into their own sandbox; promotion,
//! demotion and review decisions are admin operations. Every mutation is
//! followed by a registry sync so the in-memory maps track the store.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use agenr_domain::error::Error;
use agenr_registry::{jobs, lifecycle, AdapterStatus};

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

fn sync_registry(state: &AppState) {
    if let Err(e) = state.registry.sync(&state.store) {
        tracing::warn!(error = %e, "registry sync after lifecycle change failed");
    }
}

/// Admin sees all rows; everyone else sees their own plus public.
pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    let owner = if principal.is_admin() {
        None
    } else {
        Some(principal.id())
    };
    match lifecycle::list_visible(&state.store, owner) {
        Ok(rows) => Json(json!({ "adapters": rows, "count": rows.len() })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub platform: String,
}

pub async fn generate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<GenerateBody>,
) -> Response {
    if let Err(e) = principal.require_scope("generate") {
        return error_response(&e).into_response();
    }
    match jobs::enqueue(&state.store, &body.platform, Some(principal.id())) {
        Ok(job) => Json(json!({ "job": job })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadBody {
    pub source: String,
}

pub async fn upload(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
    Json(body): Json<UploadBody>,
) -> Response {
    // Deep validation first so authors get every issue in one pass.
    let validation = match agenr_registry::AdapterManifest::parse(&body.source) {
        Ok(manifest) => manifest.validate(),
        Err(e) => return error_response(&e).into_response(),
    };
    if !validation.is_valid() {
        return error_response(&Error::Invalid(validation.errors.join("; "))).into_response();
    }

    match lifecycle::upload(
        &state.store,
        &state.adapter_paths,
        &platform,
        principal.id(),
        &body.source,
    ) {
        Ok(row) => {
            sync_registry(&state);
            Json(json!({ "adapter": row, "warnings": validation.warnings })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

/// Detail view: the row plus its operation catalog. Visible when the row
/// is the caller's own, public, or the caller is an admin.
pub async fn show(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
) -> Response {
    let own = lifecycle::get(&state.store, &platform, principal.id());
    let row = match own {
        Ok(Some(row)) => Some(row),
        Ok(None) => match lifecycle::get_public(&state.store, &platform) {
            Ok(row) => row,
            Err(e) => return error_response(&e).into_response(),
        },
        Err(e) => return error_response(&e).into_response(),
    };
    let Some(row) = row else {
        return error_response(&Error::NotFound(format!("adapter '{platform}'"))).into_response();
    };
    if row.owner_id != principal.id()
        && row.status != AdapterStatus::Public
        && !principal.is_admin()
    {
        return error_response(&Error::NotFound(format!("adapter '{platform}'"))).into_response();
    }

    let catalog = row
        .source_code
        .as_deref()
        .and_then(|s| agenr_registry::AdapterManifest::parse(s).ok())
        .map(|m| m.operation_catalog());
    Json(json!({ "adapter": row, "catalog": catalog })).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct SubmitBody {
    #[serde(default)]
    pub message: Option<String>,
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
    body: Option<Json<SubmitBody>>,
) -> Response {
    let message = body.and_then(|Json(b)| b.message);
    match lifecycle::submit(&state.store, &platform, principal.id(), message.as_deref()) {
        Ok(row) => Json(json!({ "adapter": row })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
) -> Response {
    match lifecycle::withdraw(&state.store, &platform, principal.id()) {
        Ok(row) => Json(json!({ "adapter": row })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct PromoteBody {
    /// Owner whose sandbox/review adapter is being promoted.
    pub owner_id: String,
}

pub async fn promote(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
    Json(body): Json<PromoteBody>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match lifecycle::promote(
        &state.store,
        &state.adapter_paths,
        &platform,
        &body.owner_id,
        principal.id(),
    ) {
        Ok(row) => {
            sync_registry(&state);
            Json(json!({ "adapter": row })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn demote(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match lifecycle::demote(&state.store, &state.adapter_paths, &platform) {
        Ok(row) => {
            sync_registry(&state);
            Json(json!({ "adapter": row })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub owner_id: String,
    #[serde(default)]
    pub feedback: Option<String>,
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
    Json(body): Json<RejectBody>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match lifecycle::reject(
        &state.store,
        &platform,
        &body.owner_id,
        body.feedback.as_deref(),
    ) {
        Ok(row) => {
            sync_registry(&state);
            Json(json!({ "adapter": row })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn restore(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
) -> Response {
    match lifecycle::restore(&state.store, &state.adapter_paths, &platform, principal.id()) {
        Ok(row) => {
            sync_registry(&state);
            Json(json!({ "adapter": row })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn archive(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
) -> Response {
    match lifecycle::archive(&state.store, &platform, principal.id()) {
        Ok(row) => {
            sync_registry(&state);
            Json(json!({ "adapter": row })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct HardDeleteQuery {
    /// Which owner's row to remove; defaults to the caller's own slot.
    #[serde(default)]
    pub owner_id: Option<String>,
}

pub async fn hard_delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(platform): Path<String>,
    Query(query): Query<HardDeleteQuery>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    let owner = query.owner_id.as_deref().unwrap_or(principal.id());
    match lifecycle::hard_delete(&state.store, &platform, owner) {
        Ok(true) => {
            sync_registry(&state);
            Json(json!({ "deleted": true })).into_response()
        }
        Ok(false) => error_response(&Error::NotFound(format!("adapter '{platform}'"))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ── Jobs ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub before_created_at: Option<String>,
    #[serde(default)]
    pub before_id: Option<String>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let owner = if principal.is_admin() {
        None
    } else {
        Some(principal.id())
    };
    let cursor = match (query.before_created_at, query.before_id) {
        (Some(created_at), Some(id)) => Some(jobs::JobCursor {
            before_created_at: created_at,
            before_id: id,
        }),
        _ => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 200) as usize;

    match jobs::list_jobs(&state.store, owner, limit, cursor.as_ref()) {
        Ok(rows) => {
            let next_cursor = rows.last().map(|last| {
                json!({
                    "before_created_at": last.created_at,
                    "before_id": last.id,
                })
            });
            Json(json!({
                "jobs": rows,
                "count": rows.len(),
                "next_cursor": next_cursor,
            }))
            .into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Response {
    let owner = if principal.is_admin() {
        None
    } else {
        Some(principal.id())
    };
    match jobs::get_job(&state.store, &id, owner) {
        Ok(Some(job)) => Json(json!({ "job": job })).into_response(),
        Ok(None) => error_response(&Error::NotFound(format!("job '{id}'"))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// ── Review queues ───────────────────────────────────────────────────

pub async fn reviews(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match lifecycle::list_by_status(&state.store, AdapterStatus::Review) {
        Ok(rows) => Json(json!({ "reviews": rows, "count": rows.len() })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn archived(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    match lifecycle::list_by_status(&state.store, AdapterStatus::Archived) {
        Ok(rows) => {
            let rows: Vec<_> = if principal.is_admin() {
                rows
            } else {
                rows.into_iter()
                    .filter(|r| r.owner_id == principal.id())
                    .collect()
            };
            Json(json!({ "archived": rows, "count": rows.len() })).into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

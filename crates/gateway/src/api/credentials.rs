//! Credential management endpoints.
//!
//! All operations act on the principal's credential owner (the linked user
//! for linked keys, the key itself otherwise). List responses are metadata
//! only; the activity view is the user-scoped audit chain with internal
//! columns stripped.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    match state.vault.list_credentials(principal.credential_owner()) {
        Ok(credentials) => Json(json!({
            "credentials": credentials,
            "count": credentials.len(),
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreBody {
    pub auth_type: String,
    pub payload: Value,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

pub async fn store(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Json(body): Json<StoreBody>,
) -> Response {
    match state
        .vault
        .store_credential(
            principal.credential_owner(),
            &service,
            &body.auth_type,
            &body.payload,
            body.scopes,
        )
        .await
    {
        Ok(()) => Json(json!({ "stored": true, "service": service })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> Response {
    match state
        .vault
        .delete_credential(principal.credential_owner(), &service)
    {
        Ok(true) => Json(json!({ "deleted": true, "service": service })).into_response(),
        Ok(false) => error_response(&agenr_domain::error::Error::NotFound(format!(
            "no credential for '{service}'"
        )))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    /// Exclusive ISO-8601 upper bound for pagination.
    #[serde(default)]
    pub before: Option<String>,
}

/// Default 50, max 200, min 1.
fn clamp_limit(limit: Option<i64>) -> usize {
    limit.unwrap_or(50).clamp(1, 200) as usize
}

pub async fn activity(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Query(query): Query<ActivityQuery>,
) -> Response {
    let service = match agenr_domain::ident::normalize_service_id(&service) {
        Ok(s) => s,
        Err(e) => return error_response(&e).into_response(),
    };
    let limit = clamp_limit(query.limit);

    match state.audit.list_user_activity(
        principal.credential_owner(),
        &service,
        limit,
        query.before.as_deref(),
    ) {
        Ok(entries) => {
            // The caller already knows who and which service this is;
            // ip_address stays server-side.
            let view: Vec<Value> = entries
                .into_iter()
                .map(|e| {
                    json!({
                        "id": e.id,
                        "action": e.action,
                        "execution_id": e.execution_id,
                        "metadata": e.metadata,
                        "timestamp": e.timestamp,
                    })
                })
                .collect();
            Json(json!({
                "service": service,
                "activity": view,
                "count": view.len(),
            }))
            .into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

/// Admin-triggered DEK rotation for one credential owner.
pub async fn rotate_dek(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<String>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match state.vault.rotate_user_dek(&user_id).await {
        Ok(summary) => Json(json!({ "rotated": true, "summary": summary })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

//! Admin-only management of adapter app OAuth credentials (the shared
//! `__system__` owner).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

use agenr_domain::error::Error;

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StoreBody {
    pub payload: Value,
}

pub async fn store(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
    Json(body): Json<StoreBody>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match state.vault.store_app_credential(&service, &body.payload).await {
        Ok(()) => Json(json!({ "stored": true, "service": service })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn show(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match state.vault.retrieve_app_credential(&service).await {
        Ok(Some(payload)) => Json(json!({ "service": service, "payload": payload })).into_response(),
        Ok(None) => error_response(&Error::NotFound(format!(
            "no app credential for '{service}'"
        )))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match state.vault.delete_app_credential(&service) {
        Ok(true) => Json(json!({ "deleted": true, "service": service })).into_response(),
        Ok(false) => error_response(&Error::NotFound(format!(
            "no app credential for '{service}'"
        )))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

//! Operation journal views, strictly scoped to the calling principal.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use agenr_domain::error::Error;
use agenr_store::transactions;

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 200) as usize;
    match transactions::list_transactions(&state.store, principal.id(), limit) {
        Ok(rows) => Json(json!({ "transactions": rows, "count": rows.len() })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Response {
    // Ownership isolation: another principal's journal row reads as absent.
    match transactions::get_transaction(&state.store, &id, principal.id()) {
        Ok(Some(row)) => Json(json!({ "transaction": row })).into_response(),
        Ok(None) => error_response(&Error::NotFound(format!("transaction '{id}'"))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

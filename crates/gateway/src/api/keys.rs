//! Admin key management.
//!
//! Minting returns the raw key exactly once; listings carry metadata only.
//! All tokens live at rest as hashes.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::json;

use agenr_store::api_keys::{self, Tier};

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MintBody {
    /// `free`, `paid` or `admin`.
    pub tier: String,
    /// Optional user to link; linked keys store credentials under the user.
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn mint(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<MintBody>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    let tier = match Tier::parse(&body.tier) {
        Ok(t) => t,
        Err(e) => return error_response(&e).into_response(),
    };
    if let Some(user_id) = &body.user_id {
        match agenr_store::users::get_user(&state.store, user_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return error_response(&agenr_domain::error::Error::NotFound(format!(
                    "user '{user_id}'"
                )))
                .into_response()
            }
            Err(e) => return error_response(&e).into_response(),
        }
    }

    match api_keys::create_api_key(&state.store, tier, body.user_id.as_deref()) {
        Ok((raw, row)) => Json(json!({
            // The only time the raw key is ever visible.
            "api_key": raw,
            "key": row,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LinkBody {
    pub user_id: String,
}

/// Link a key to a user; subsequent credential writes land under the user.
pub async fn link(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    axum::extract::Path(key_id): axum::extract::Path<String>,
    Json(body): Json<LinkBody>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    match api_keys::link_user(&state.store, &key_id, &body.user_id) {
        Ok(row) => Json(json!({ "key": row })).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn list(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    if let Err(e) = principal.require_scope("admin") {
        return error_response(&e).into_response();
    }
    let rows = {
        let conn = state.store.lock();
        let mut stmt = match conn.prepare(
            "SELECT id, tier, user_id, scopes, rate_limit_override, created_at, last_used_at
             FROM api_keys ORDER BY created_at DESC",
        ) {
            Ok(stmt) => stmt,
            Err(e) => return error_response(&agenr_store::db_err(e)).into_response(),
        };
        let result = stmt
            .query_map([], |row| {
                let scopes_raw: String = row.get("scopes")?;
                Ok(json!({
                    "id": row.get::<_, String>("id")?,
                    "tier": row.get::<_, String>("tier")?,
                    "user_id": row.get::<_, Option<String>>("user_id")?,
                    "scopes": serde_json::from_str::<serde_json::Value>(&scopes_raw)
                        .unwrap_or_default(),
                    "rate_limit_override": row.get::<_, Option<i64>>("rate_limit_override")?,
                    "created_at": row.get::<_, String>("created_at")?,
                    "last_used_at": row.get::<_, Option<String>>("last_used_at")?,
                }))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>());
        match result {
            Ok(rows) => rows,
            Err(e) => return error_response(&agenr_store::db_err(e)).into_response(),
        }
    };
    Json(json!({ "keys": rows, "count": rows.len() })).into_response()
}

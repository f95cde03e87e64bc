//! Audit chain verification endpoint.
//!
//! Admins get the full-table verification; any other authenticated caller
//! gets the chain scoped to their own credential owner.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde_json::json;

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

pub async fn verify(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Response {
    let report = if principal.is_admin() {
        state.audit.verify_chain()
    } else {
        state.audit.verify_user_chain(principal.credential_owner())
    };
    match report {
        Ok(report) => Json(json!({
            "scope": if principal.is_admin() { "global" } else { "user" },
            "report": report,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

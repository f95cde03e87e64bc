//! `/agp/execute` and `/agp/prepare`: platform operations behind scope
//! checks, the execute policy and the idempotency cache.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use agenr_domain::error::Error;
use agenr_domain::ident::normalize_platform;
use agenr_registry::{Adapter as _, OperationRequest};
use agenr_store::transactions::{self, Operation};

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::runtime::{confirmation, idempotency, policy};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteBody {
    pub platform: String,
    /// `discover`, `query` or `execute`.
    pub operation: String,
    #[serde(default)]
    pub request: Value,
}

#[derive(Debug, Deserialize)]
pub struct PrepareBody {
    #[serde(alias = "businessId")]
    pub business_id: String,
    #[serde(default)]
    pub request: Value,
}

/// Phase one of the confirmation protocol.
pub async fn prepare(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<PrepareBody>,
) -> Response {
    if let Err(e) = principal.require_scope("execute") {
        return error_response(&e).into_response();
    }
    match confirmation::prepare(&state.store, &body.business_id, &body.request) {
        Ok(prepared) => Json(json!({
            "confirmation_token": prepared.confirmation_token,
            "expires_at": prepared.expires_at,
            "summary": prepared.summary,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

/// Run a platform operation through the resolved adapter.
pub async fn execute(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    headers: HeaderMap,
    Json(body): Json<ExecuteBody>,
) -> Response {
    let operation = match Operation::parse(&body.operation) {
        Ok(op) => op,
        Err(e) => return error_response(&e).into_response(),
    };
    if let Err(e) = principal.require_scope(operation.as_str()) {
        return error_response(&e).into_response();
    }
    let platform = match normalize_platform(&body.platform) {
        Ok(p) => p,
        Err(e) => return error_response(&e).into_response(),
    };

    // Idempotent replay: a cache hit answers verbatim without invoking
    // anything below.
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(client_key) = &idempotency_key {
        match idempotency::lookup(&state.store, principal.id(), client_key) {
            Ok(Some(hit)) => return replay(hit),
            Ok(None) => {}
            Err(e) => return error_response(&e).into_response(),
        }
    }

    // Execute policy gates side effects only.
    if operation == Operation::Execute {
        let confirmation_token = headers
            .get("x-confirmation-token")
            .and_then(|v| v.to_str().ok());
        if let Err(e) = policy::enforce(
            state.config.policy.execute_policy,
            state.config.policy.max_execute_amount_cents,
            &state.store,
            &platform,
            &body.request,
            confirmation_token,
        ) {
            return error_response(&e).into_response();
        }
    }

    let Some(entry) = state.registry.resolve(&platform, principal.id()) else {
        return error_response(&Error::NotFound(format!(
            "no adapter available for platform '{platform}'"
        )))
        .into_response();
    };

    let journal = match transactions::begin_transaction(
        &state.store,
        operation,
        &platform,
        principal.id(),
        Some(&body.request),
    ) {
        Ok(row) => row,
        Err(e) => return error_response(&e).into_response(),
    };

    let result = dispatch(
        &state,
        &principal,
        &entry,
        operation,
        &platform,
        &body.request,
        &journal.id,
    )
    .await;

    match result {
        Ok(value) => {
            if let Err(e) = transactions::complete_transaction(&state.store, &journal.id, Ok(&value)) {
                tracing::warn!(error = %e, "failed to close transaction row");
            }
            let response_body = json!({
                "transaction_id": journal.id,
                "platform": platform,
                "operation": operation.as_str(),
                "nonce": Uuid::new_v4().to_string(),
                "result": value,
            });
            let rendered = response_body.to_string();
            if let Some(client_key) = &idempotency_key {
                let cached = idempotency::CachedResponse {
                    status: 200,
                    headers: vec![("content-type".into(), "application/json".into())],
                    body: rendered.clone(),
                };
                if let Err(e) =
                    idempotency::record(&state.store, principal.id(), client_key, &cached)
                {
                    tracing::warn!(error = %e, "failed to record idempotency entry");
                }
            }
            (
                StatusCode::OK,
                [("content-type", "application/json")],
                rendered,
            )
                .into_response()
        }
        Err(e) => {
            if let Err(close_err) =
                transactions::complete_transaction(&state.store, &journal.id, Err(&e.to_string()))
            {
                tracing::warn!(error = %close_err, "failed to close transaction row");
            }
            error_response(&e).into_response()
        }
    }
}

async fn dispatch(
    state: &AppState,
    principal: &Principal,
    entry: &agenr_registry::RegistryEntry,
    operation: Operation,
    platform: &str,
    request: &Value,
    execution_id: &str,
) -> agenr_domain::error::Result<Value> {
    let op_request = OperationRequest::from_value(request);
    match operation {
        Operation::Discover => entry.adapter.discover(op_request).await,
        Operation::Query | Operation::Execute => {
            // Near-expiry OAuth tokens are refreshed transparently here.
            let creds = state
                .vault
                .retrieve_with_refresh(
                    &state.http,
                    principal.credential_owner(),
                    platform,
                    false,
                    state.config.vault.refresh_window_secs,
                    Some(execution_id),
                )
                .await?;
            match operation {
                Operation::Query => entry.adapter.query(op_request, creds.as_ref()).await,
                _ => entry.adapter.execute(op_request, creds.as_ref()).await,
            }
        }
    }
}

fn replay(hit: idempotency::CachedResponse) -> Response {
    let status = StatusCode::from_u16(hit.status).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);
    for (name, value) in &hit.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(axum::body::Body::from(hit.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_preserves_status_and_body() {
        let hit = idempotency::CachedResponse {
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            body: r#"{"nonce":"n-1"}"#.into(),
        };
        let response = replay(hit);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn prepare_body_accepts_camel_case_alias() {
        let body: PrepareBody =
            serde_json::from_str(r#"{"businessId": "stripe", "request": {"amount_cents": 1}}"#)
                .unwrap();
        assert_eq!(body.business_id, "stripe");
    }
}

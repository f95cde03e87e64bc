//! OAuth connect flow.
//!
//! `POST /connect/:service` mints a single-use state row and answers with
//! a 302 to the provider's authorization URL; the browser returns to
//! `GET /connect/:service/callback` where the state is consumed, the code
//! exchanged and the credential stored. Upstream refusal surfaces as 4xx
//! with a `connection_failed` audit row.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;
use serde_json::{json, Value};

use agenr_audit::{AuditAction, AuditEvent};
use agenr_domain::error::Error;
use agenr_domain::ident::normalize_service_id;
use agenr_vault::oauth_flow;

use crate::api::auth::Principal;
use crate::api::error_response;
use crate::state::AppState;

fn callback_url(state: &AppState, service: &str) -> String {
    format!(
        "{}/connect/{service}/callback",
        state.config.server.base_url.trim_end_matches('/')
    )
}

/// Resolve the service's OAuth URLs from its adapter manifest and the
/// client pair from its app credential.
async fn oauth_setup(
    state: &AppState,
    principal_owner: &str,
    service: &str,
) -> agenr_domain::error::Result<(String, String, String, String, Vec<String>)> {
    let entry = state
        .registry
        .resolve(service, principal_owner)
        .ok_or_else(|| Error::NotFound(format!("no adapter available for '{service}'")))?;
    let manifest = entry.manifest();
    let oauth = manifest
        .auth
        .as_ref()
        .filter(|a| a.auth_type == "oauth2")
        .and_then(|a| a.oauth.as_ref())
        .ok_or_else(|| {
            Error::Invalid(format!("adapter '{service}' does not support OAuth connect"))
        })?;

    let app = state
        .vault
        .retrieve_app_credential(service)
        .await?
        .ok_or_else(|| {
            Error::Invalid(format!(
                "no app credential registered for '{service}' — an admin must add one"
            ))
        })?;
    let client_id = app
        .get("client_id")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Invalid("app credential is missing client_id".into()))?
        .to_string();
    let client_secret = app
        .get("client_secret")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Invalid("app credential is missing client_secret".into()))?
        .to_string();

    Ok((
        oauth.authorization_url.clone(),
        oauth.token_url.clone(),
        client_id,
        client_secret,
        oauth.scopes.clone(),
    ))
}

pub async fn start(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(service): Path<String>,
) -> Response {
    let service = match normalize_service_id(&service) {
        Ok(s) => s,
        Err(e) => return error_response(&e).into_response(),
    };

    let (authorization_url, _, client_id, _, scopes) =
        match oauth_setup(&state, principal.id(), &service).await {
            Ok(setup) => setup,
            Err(e) => return error_response(&e).into_response(),
        };

    let owner = principal.credential_owner().to_string();
    let pkce = oauth_flow::generate_pkce();
    let oauth_state =
        match oauth_flow::create_state(&state.store, &owner, &service, Some(&pkce.verifier)) {
            Ok(s) => s,
            Err(e) => return error_response(&e).into_response(),
        };

    let redirect_uri = callback_url(&state, &service);
    let separator = if authorization_url.contains('?') { '&' } else { '?' };
    let location = format!(
        "{authorization_url}{separator}response_type=code&client_id={}&redirect_uri={}&state={}&scope={}&code_challenge={}&code_challenge_method=S256",
        urlencode(&client_id),
        urlencode(&redirect_uri),
        urlencode(&oauth_state),
        urlencode(&scopes.join(" ")),
        urlencode(&pkce.challenge),
    );
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub code: Option<String>,
    pub state: String,
    #[serde(default)]
    pub error: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: axum::http::HeaderMap,
) -> Response {
    let service = match normalize_service_id(&service) {
        Ok(s) => s,
        Err(e) => return error_response(&e).into_response(),
    };
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    // Consume the state first: single-use, TTL-bound, binds the user.
    let state_row = match oauth_flow::consume_state(&state.store, &query.state) {
        Ok(row) => row,
        Err(e) => return error_response(&e).into_response(),
    };
    if state_row.service != service {
        return error_response(&Error::Invalid(
            "OAuth state was issued for a different service".into(),
        ))
        .into_response();
    }
    let user_id = state_row.user_id;

    // Provider-side refusal (user denied, misconfigured client).
    if let Some(upstream_error) = query.error {
        state.audit.log(
            AuditEvent::new(&user_id, &service, AuditAction::ConnectionFailed)
                .with_metadata(json!({ "reason": upstream_error }))
                .with_ip(client_ip.clone()),
        );
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("authorization failed: {upstream_error}") })),
        )
            .into_response();
    }
    let Some(code) = query.code else {
        state.audit.log(
            AuditEvent::new(&user_id, &service, AuditAction::ConnectionFailed)
                .with_metadata(json!({ "reason": "missing code" }))
                .with_ip(client_ip.clone()),
        );
        return error_response(&Error::Invalid("callback is missing the authorization code".into()))
            .into_response();
    };

    let (_, token_url, client_id, client_secret, _) =
        match oauth_setup(&state, &user_id, &service).await {
            Ok(setup) => setup,
            Err(e) => return error_response(&e).into_response(),
        };

    let redirect_uri = callback_url(&state, &service);
    let tokens = match oauth_flow::exchange_code(
        &state.http,
        &token_url,
        &client_id,
        &client_secret,
        &code,
        &redirect_uri,
        state_row.code_verifier.as_deref(),
    )
    .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            state.audit.log(
                AuditEvent::new(&user_id, &service, AuditAction::ConnectionFailed)
                    .with_metadata(json!({ "reason": "code exchange failed" }))
                    .with_ip(client_ip.clone()),
            );
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("token exchange failed: {e}") })),
            )
                .into_response();
        }
    };

    // Keep the token endpoint alongside the tokens so refresh is
    // self-contained.
    let mut payload = tokens;
    if let Some(map) = payload.as_object_mut() {
        map.insert("token_url".into(), Value::String(token_url));
        map.insert("client_id".into(), Value::String(client_id));
        map.insert("client_secret".into(), Value::String(client_secret));
    }

    if let Err(e) = state
        .vault
        .store_credential(&user_id, &service, "oauth2", &payload, None)
        .await
    {
        return error_response(&e).into_response();
    }
    state.audit.log(
        AuditEvent::new(&user_id, &service, AuditAction::ConnectionEstablished)
            .with_ip(client_ip),
    );

    Json(json!({ "connected": true, "service": service })).into_response()
}

/// Minimal percent-encoding for query components.
fn urlencode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

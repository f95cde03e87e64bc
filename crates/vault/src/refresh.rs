//! Transparent OAuth token refresh.
//!
//! Retrieval of an `oauth2` credential with a refresh token triggers a
//! refresh when the access token is within the configured window of expiry
//! (or on `force`). A failed refresh keeps the stored credential unchanged
//! and emits no rotation event. Non-OAuth credential types are never
//! refreshed, `force` included.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use agenr_audit::AuditAction;
use agenr_domain::error::Result;
use agenr_domain::ident::normalize_service_id;

use crate::credentials::{CredentialRow, CredentialVault};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token endpoint wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Response from a refresh-token grant.
///
/// `Debug` is manually implemented to redact secrets.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Where to send the refresh request.
#[derive(Debug, Clone)]
struct TokenEndpoint {
    token_url: String,
    client_id: String,
    client_secret: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Refresh decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Seconds until `expires_at`; `None` when the row has no expiry.
fn remaining_seconds(expires_at: Option<&str>, now: DateTime<Utc>) -> Option<i64> {
    let raw = expires_at?;
    let parsed = DateTime::parse_from_rfc3339(raw).ok()?;
    Some((parsed.with_timezone(&Utc) - now).num_seconds())
}

/// Whether a row qualifies for a refresh attempt.
fn should_refresh(row: &CredentialRow, payload: &Value, force: bool, window_secs: i64) -> bool {
    if row.auth_type != "oauth2" {
        return false;
    }
    if payload.get("refresh_token").and_then(Value::as_str).is_none() {
        return false;
    }
    if force {
        return true;
    }
    match remaining_seconds(row.expires_at.as_deref(), Utc::now()) {
        Some(remaining) => remaining <= window_secs,
        None => false,
    }
}

impl CredentialVault {
    /// Retrieve a credential, refreshing a near-expiry OAuth token first.
    ///
    /// The returned payload is always the current stored credential; when a
    /// refresh succeeds the rotation has already been persisted and audited
    /// as `credential_rotated`.
    pub async fn retrieve_with_refresh(
        &self,
        http: &reqwest::Client,
        user_id: &str,
        service: &str,
        force: bool,
        window_secs: i64,
        execution_id: Option<&str>,
    ) -> Result<Option<Value>> {
        let service = normalize_service_id(service)?;
        let Some(row) = self.load_row(user_id, &service)? else {
            return Ok(None);
        };
        let payload = self.decrypt_row(&row).await?;

        if should_refresh(&row, &payload, force, window_secs) {
            match self.resolve_endpoint(&service, &payload).await {
                Some(endpoint) => {
                    if let Err(e) = self
                        .refresh_now(http, user_id, &service, &row, &payload, &endpoint)
                        .await
                    {
                        tracing::warn!(
                            service = %service,
                            error = %e,
                            "OAuth refresh failed — keeping stored credential"
                        );
                    }
                }
                None => tracing::warn!(
                    service = %service,
                    "OAuth credential near expiry but no token endpoint is known"
                ),
            }
        }

        // Normal retrieval of whatever is now stored (audits the read).
        self.retrieve_credential(user_id, &service, execution_id).await
    }

    /// Token endpoint from the payload itself, falling back to the
    /// service's app credential.
    async fn resolve_endpoint(&self, service: &str, payload: &Value) -> Option<TokenEndpoint> {
        if let Some(ep) = endpoint_from(payload) {
            return Some(ep);
        }
        match self.retrieve_app_credential(service).await {
            Ok(Some(app)) => endpoint_from_with_url(&app, payload),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(service, error = %e, "app credential lookup failed during refresh");
                None
            }
        }
    }

    async fn refresh_now(
        &self,
        http: &reqwest::Client,
        user_id: &str,
        service: &str,
        row: &CredentialRow,
        payload: &Value,
        endpoint: &TokenEndpoint,
    ) -> Result<()> {
        use agenr_domain::error::Error;

        let refresh_token = payload
            .get("refresh_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        tracing::info!(service, "refreshing OAuth credential");
        let resp = http
            .post(&endpoint.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", endpoint.client_id.as_str()),
                ("client_secret", endpoint.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Transient(format!("token endpoint: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transient(format!(
                "token endpoint returned HTTP {}",
                status.as_u16()
            )));
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transient(format!("parsing token response: {e}")))?;

        // Merge: new tokens over the stored payload; the refresh token is
        // preserved when the server omits it.
        let mut merged = payload.clone();
        merged["access_token"] = Value::String(token.access_token);
        merged["refresh_token"] = Value::String(
            token.refresh_token.unwrap_or(refresh_token),
        );
        if let Some(token_type) = token.token_type {
            merged["token_type"] = Value::String(token_type);
        }
        if let Some(expires_in) = token.expires_in {
            merged["expires_in"] = Value::from(expires_in);
        }
        if let Some(scope) = token.scope {
            merged["scope"] = Value::String(scope);
        }

        self.persist_credential(
            user_id,
            service,
            "oauth2",
            &merged,
            row.scopes.clone(),
            AuditAction::CredentialRotated,
        )
        .await
    }
}

fn endpoint_from(payload: &Value) -> Option<TokenEndpoint> {
    Some(TokenEndpoint {
        token_url: payload.get("token_url")?.as_str()?.to_string(),
        client_id: payload.get("client_id")?.as_str()?.to_string(),
        client_secret: payload.get("client_secret")?.as_str()?.to_string(),
    })
}

/// App credentials carry the client pair; the token URL may live in either
/// the app credential or the user payload.
fn endpoint_from_with_url(app: &Value, payload: &Value) -> Option<TokenEndpoint> {
    let token_url = app
        .get("token_url")
        .and_then(Value::as_str)
        .or_else(|| payload.get("token_url").and_then(Value::as_str))?
        .to_string();
    Some(TokenEndpoint {
        token_url,
        client_id: app.get("client_id")?.as_str()?.to_string(),
        client_secret: app.get("client_secret")?.as_str()?.to_string(),
    })
}

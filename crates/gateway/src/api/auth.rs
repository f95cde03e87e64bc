//! API authentication middleware.
//!
//! Two principal kinds are accepted:
//! - `x-api-key: <raw>` — hashed and looked up in `api_keys`; tier decides
//!   the scope set. The `AGENR_API_KEY` bootstrap admin is inserted lazily
//!   on first resolve.
//! - `Authorization: Bearer <token>` — hashed into a session id and
//!   checked against `sessions` with its expiry.
//!
//! Failures are a bare 401: the response never reveals which of
//! {missing key, bad key, expired session} failed. Scope failures are 403
//! with exactly `Missing required scope: <scope>` as the message.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use agenr_domain::error::{Error, Result};
use agenr_store::api_keys::{self, ApiKeyRow, Tier};
use agenr_store::sessions::{self, SessionRow};
use agenr_store::Store;

use crate::api::error_response;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Principal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The authenticated actor for a request.
#[derive(Clone)]
pub enum Principal {
    Key(ApiKeyRow),
    Session(SessionRow),
}

impl Principal {
    /// Identity used for idempotency keys, job ownership and journaling.
    pub fn id(&self) -> &str {
        match self {
            Principal::Key(key) => &key.id,
            Principal::Session(session) => &session.user_id,
        }
    }

    /// Identity under which credentials are stored: a key linked to a user
    /// resolves to the user so multiple keys converge on one credential
    /// set; an unlinked key stores under its own id.
    pub fn credential_owner(&self) -> &str {
        match self {
            Principal::Key(key) => key.credential_owner(),
            Principal::Session(session) => &session.user_id,
        }
    }

    /// Linked user id, when there is one.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Principal::Key(key) => key.user_id.as_deref(),
            Principal::Session(session) => Some(&session.user_id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Principal::Key(key) if key.tier == Tier::Admin)
    }

    /// Scope gate. API keys carry explicit scope sets (`"*"` satisfies
    /// everything); human sessions pass every non-admin scope.
    pub fn require_scope(&self, scope: &str) -> Result<()> {
        let satisfied = match self {
            Principal::Key(key) => key.has_scope(scope),
            Principal::Session(_) => scope != "admin",
        };
        if satisfied {
            Ok(())
        } else {
            Err(Error::MissingScope(scope.to_string()))
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a principal from request headers.
pub fn resolve_principal(
    store: &Store,
    bootstrap_admin_key: Option<&str>,
    api_key_header: Option<&str>,
    bearer_token: Option<&str>,
) -> Result<Option<Principal>> {
    if let Some(raw) = api_key_header.filter(|v| !v.is_empty()) {
        let resolved = api_keys::resolve_api_key(store, raw, bootstrap_admin_key)?;
        if let Some(key) = resolved {
            return Ok(Some(Principal::Key(key)));
        }
        return Ok(None);
    }
    if let Some(token) = bearer_token.filter(|v| !v.is_empty()) {
        if let Some(session) = sessions::validate_session(store, token)? {
            return Ok(Some(Principal::Session(session)));
        }
    }
    Ok(None)
}

/// Axum middleware enforcing authentication on protected routes. Attach
/// via `axum::middleware::from_fn_with_state`.
pub async fn require_principal(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bearer = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let principal = match resolve_principal(
        &state.store,
        state.bootstrap_admin_key.as_deref(),
        api_key.as_deref(),
        bearer.as_deref(),
    ) {
        Ok(Some(principal)) => principal,
        Ok(None) => return error_response(&Error::Unauthorized).into_response(),
        Err(e) => return error_response(&e).into_response(),
    };

    // Stamp key usage off the request path.
    if let Principal::Key(key) = &principal {
        let store = state.store.clone();
        let key_id = key.id.clone();
        tokio::spawn(async move {
            api_keys::touch_last_used(&store, &key_id);
        });
    }

    req.extensions_mut().insert(principal);
    next.run(req).await
}

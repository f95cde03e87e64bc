pub mod adapters;
pub mod app_credentials;
pub mod audit;
pub mod auth;
pub mod connect;
pub mod credentials;
pub mod execute;
pub mod keys;
pub mod transactions;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::Json;
use axum::routing::{delete, get, post};
use axum::Router;

use agenr_domain::error::Error;

use crate::state::AppState;

/// Map a domain error onto its HTTP shape. The single place where the
/// taxonomy meets status codes.
pub fn error_response(e: &Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::MissingScope(_) | Error::Forbidden(_) | Error::Expired(_) => StatusCode::FORBIDDEN,
        Error::Invalid(_) => StatusCode::BAD_REQUEST,
        Error::Transient(_) => StatusCode::BAD_GATEWAY,
        Error::Integrity(_) | Error::Io(_) | Error::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = match e {
        // Scope failures carry the exact contract body; forbidden reasons
        // are already client-safe.
        Error::MissingScope(scope) => format!("Missing required scope: {scope}"),
        Error::Forbidden(reason) => reason.clone(),
        Error::Expired(reason) => reason.clone(),
        other => other.to_string(),
    };
    (status, Json(serde_json::json!({ "error": message })))
}

/// Build the full API router.
///
/// Routes are split into **public** (health, OAuth callback — the browser
/// carries no credential there) and **protected** (everything else, behind
/// the principal middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health))
        .route("/connect/:service/callback", get(connect::callback));

    let protected = Router::new()
        // Platform operations
        .route("/agp/execute", post(execute::execute))
        .route("/agp/prepare", post(execute::prepare))
        // OAuth connect flow
        .route("/connect/:service", post(connect::start))
        // Credentials
        .route("/credentials", get(credentials::list))
        .route("/credentials/:service", post(credentials::store))
        .route("/credentials/:service", delete(credentials::remove))
        .route("/credentials/:service/activity", get(credentials::activity))
        // App credentials (admin)
        .route("/app-credentials/:service", post(app_credentials::store))
        .route("/app-credentials/:service", get(app_credentials::show))
        .route("/app-credentials/:service", delete(app_credentials::remove))
        // Adapter lifecycle
        .route("/adapters", get(adapters::list))
        .route("/adapters/:platform", get(adapters::show))
        .route("/adapters/generate", post(adapters::generate))
        .route("/adapters/jobs", get(adapters::list_jobs))
        .route("/adapters/jobs/:id", get(adapters::get_job))
        .route("/adapters/reviews", get(adapters::reviews))
        .route("/adapters/archived", get(adapters::archived))
        .route("/adapters/:platform/upload", post(adapters::upload))
        .route("/adapters/:platform/submit", post(adapters::submit))
        .route("/adapters/:platform/withdraw", post(adapters::withdraw))
        .route("/adapters/:platform/promote", post(adapters::promote))
        .route("/adapters/:platform/demote", post(adapters::demote))
        .route("/adapters/:platform/reject", post(adapters::reject))
        .route("/adapters/:platform/restore", post(adapters::restore))
        .route("/adapters/:platform", delete(adapters::archive))
        .route("/adapters/:platform/hard", delete(adapters::hard_delete))
        // Key management (admin)
        .route("/keys", post(keys::mint))
        .route("/keys", get(keys::list))
        .route("/keys/:id/link", post(keys::link))
        // Vault administration (admin)
        .route("/vault/:user_id/rotate", post(credentials::rotate_dek))
        // Operation journal
        .route("/transactions", get(transactions::list))
        .route("/transactions/:id", get(transactions::get))
        // Audit verification
        .route("/audit/verify", get(audit::verify))
        .layer(middleware::from_fn_with_state(
            state,
            auth::require_principal,
        ));

    public.merge(protected)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_statuses() {
        let cases = [
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("x".into()), StatusCode::CONFLICT),
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (Error::MissingScope("generate".into()), StatusCode::FORBIDDEN),
            (Error::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (Error::Expired("x".into()), StatusCode::FORBIDDEN),
            (Error::Invalid("x".into()), StatusCode::BAD_REQUEST),
            (Error::Transient("x".into()), StatusCode::BAD_GATEWAY),
            (Error::Integrity("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            let (status, _) = error_response(&err);
            assert_eq!(status, expected, "for {err:?}");
        }
    }

    #[test]
    fn scope_error_body_is_the_contract_string() {
        let (_, Json(body)) = error_response(&Error::MissingScope("generate".into()));
        assert_eq!(body["error"], "Missing required scope: generate");
    }

    #[test]
    fn unauthorized_body_reveals_nothing() {
        let (_, Json(body)) = error_response(&Error::Unauthorized);
        assert_eq!(body["error"], "unauthorized");
    }
}

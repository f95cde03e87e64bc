//! Adapter lifecycle over the HTTP surface: authoring, review, promotion
//! and the generation job queue.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use agenr_audit::AuditLog;
use agenr_domain::config::{Config, ExecutePolicy};
use agenr_gateway::api;
use agenr_gateway::state::AppState;
use agenr_registry::{AdapterPaths, AdapterRegistry};
use agenr_store::api_keys::{self, Tier};
use agenr_store::Store;
use agenr_vault::{CredentialVault, LocalKms};

struct TestEnv {
    app: Router,
    store: Store,
    _tmp: tempfile::TempDir,
}

fn build_env() -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.policy.execute_policy = ExecutePolicy::Open;
    config.adapters.runtime_dir = tmp.path().join("runtime");
    config.store.db_path = tmp.path().join("agenr.sqlite");

    let store = Store::open(&config.store.db_path).unwrap();
    let audit = AuditLog::new(store.clone());
    let vault =
        CredentialVault::new(store.clone(), audit.clone(), Arc::new(LocalKms::new([8u8; 32])));
    let registry = Arc::new(AdapterRegistry::new(Duration::from_secs(5)).unwrap());
    let adapter_paths = AdapterPaths::new(config.adapters.runtime_dir.clone());

    let state = AppState {
        config: Arc::new(config),
        store: store.clone(),
        audit,
        vault,
        registry,
        adapter_paths,
        http: reqwest::Client::new(),
        bootstrap_admin_key: None,
    };
    let app = api::router(state.clone()).with_state(state);
    TestEnv {
        app,
        store,
        _tmp: tmp,
    }
}

fn source_for(platform: &str) -> String {
    format!(
        r#"
        [adapter]
        platform = "{platform}"
        version = "1.0.0"
        base_url = "https://api.example.com"

        [domains]
        allowed = ["api.example.com"]

        [[query]]
        name = "ping"
        path = "/ping"
        "#
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn post(uri: &str, api_key: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", api_key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str, api_key: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", api_key)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn review_cycle_over_http() {
    let env = build_env();
    let (owner, owner_row) = api_keys::create_api_key(&env.store, Tier::Free, None).unwrap();
    let (admin, _) = api_keys::create_api_key(&env.store, Tier::Admin, None).unwrap();

    // Upload → sandbox.
    let (status, body) = send(
        &env.app,
        post("/adapters/toast/upload", &owner, &json!({"source": source_for("toast")})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["adapter"]["status"], "sandbox");

    // Submit with a message → review; the admin sees it in the queue.
    let (status, body) = send(
        &env.app,
        post("/adapters/toast/submit", &owner, &json!({"message": "ready for review"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["adapter"]["status"], "review");

    let (_, body) = send(&env.app, get("/adapters/reviews", &admin)).await;
    assert_eq!(body["count"], 1);

    // Reject with feedback → back to the owner's sandbox.
    let (status, body) = send(
        &env.app,
        post(
            "/adapters/toast/reject",
            &admin,
            &json!({"owner_id": owner_row.id, "feedback": "tighten the domain allowlist"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["adapter"]["status"], "sandbox");
    assert_eq!(
        body["adapter"]["review_feedback"],
        "tighten the domain allowlist"
    );

    // Resubmit and promote.
    send(&env.app, post("/adapters/toast/submit", &owner, &json!({}))).await;
    let (status, body) = send(
        &env.app,
        post("/adapters/toast/promote", &admin, &json!({"owner_id": owner_row.id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["adapter"]["status"], "public");

    // The owner's detail view exposes the catalog.
    let (status, body) = send(&env.app, get("/adapters/toast", &owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["catalog"]["operations"]["query"][0]["name"], "ping");

    // Non-admin promote attempts are scope failures.
    let (status, body) = send(
        &env.app,
        post("/adapters/toast/promote", &owner, &json!({"owner_id": owner_row.id})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Missing required scope: admin");
}

#[tokio::test]
async fn upload_surfaces_warnings_and_rejects_duplicates() {
    let env = build_env();
    let (owner, _) = api_keys::create_api_key(&env.store, Tier::Free, None).unwrap();

    // Missing base_url with remote ops → warning, but accepted.
    let warned = r#"
        [adapter]
        platform = "toast"
        version = "1.0.0"

        [[query]]
        name = "ping"
        path = "/ping"
    "#;
    let (status, body) = send(
        &env.app,
        post("/adapters/toast/upload", &owner, &json!({"source": warned})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["warnings"][0].as_str().unwrap().contains("base_url"));

    // Duplicate operation names → 400.
    let duplicated = r#"
        [adapter]
        platform = "square"
        version = "1.0.0"
        base_url = "https://api.square.dev"

        [[query]]
        name = "ping"
        path = "/a"

        [[query]]
        name = "ping"
        path = "/b"
    "#;
    let (status, body) = send(
        &env.app,
        post("/adapters/square/upload", &owner, &json!({"source": duplicated})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("duplicate"));
}

#[tokio::test]
async fn visibility_is_scoped_over_http() {
    let env = build_env();
    let (owner_a, a_row) = api_keys::create_api_key(&env.store, Tier::Free, None).unwrap();
    let (owner_b, _) = api_keys::create_api_key(&env.store, Tier::Free, None).unwrap();
    let (admin, _) = api_keys::create_api_key(&env.store, Tier::Admin, None).unwrap();

    send(
        &env.app,
        post("/adapters/toast/upload", &owner_a, &json!({"source": source_for("toast")})),
    )
    .await;
    send(
        &env.app,
        post("/adapters/square/upload", &owner_b, &json!({"source": source_for("square")})),
    )
    .await;
    send(
        &env.app,
        post("/adapters/toast/promote", &admin, &json!({"owner_id": a_row.id})),
    )
    .await;

    // B sees their own sandbox plus the public toast adapter.
    let (_, body) = send(&env.app, get("/adapters", &owner_b)).await;
    assert_eq!(body["count"], 2);

    // A stranger's detail request for B's sandbox row is a 404.
    let (status, _) = send(&env.app, get("/adapters/square", &owner_a)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Admin sees everything.
    let (_, body) = send(&env.app, get("/adapters", &admin)).await;
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn generation_jobs_over_http() {
    let env = build_env();
    let (paid, _) = api_keys::create_api_key(&env.store, Tier::Paid, None).unwrap();
    let (other, _) = api_keys::create_api_key(&env.store, Tier::Paid, None).unwrap();

    let (status, body) = send(
        &env.app,
        post("/adapters/generate", &paid, &json!({"platform": "toast"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["job"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["job"]["status"], "queued");

    // Owner listing shows the job; another key's listing does not.
    let (_, body) = send(&env.app, get("/adapters/jobs", &paid)).await;
    assert_eq!(body["count"], 1);
    let (_, body) = send(&env.app, get("/adapters/jobs", &other)).await;
    assert_eq!(body["count"], 0);

    // Job detail is ownership-gated.
    let (status, _) = send(&env.app, get(&format!("/adapters/jobs/{job_id}"), &other)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = send(&env.app, get(&format!("/adapters/jobs/{job_id}"), &paid)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job"]["platform"], "toast");
}

#[tokio::test]
async fn key_linking_and_dek_rotation_over_http() {
    let env = build_env();
    let (admin, _) = api_keys::create_api_key(&env.store, Tier::Admin, None).unwrap();
    let (free, free_row) = api_keys::create_api_key(&env.store, Tier::Free, None).unwrap();
    let user = agenr_store::users::upsert_user(&env.store, "github", "77", "x@y.z", None).unwrap();

    // Link the free key to the user.
    let (status, body) = send(
        &env.app,
        post(
            &format!("/keys/{}/link", free_row.id),
            &admin,
            &json!({"user_id": user.id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"]["user_id"], user.id.as_str());

    // The linked key now stores credentials under the user.
    let (status, _) = send(
        &env.app,
        post(
            "/credentials/stripe",
            &free,
            &json!({"auth_type": "api_key", "payload": {"api_key": "sk"}}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Rotate the user's DEK; the credential still decrypts.
    let (status, body) = send(
        &env.app,
        post(&format!("/vault/{}/rotate", user.id), &admin, &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["summary"]["credentials_rewrapped"], 1);

    let (_, body) = send(&env.app, get("/credentials", &free)).await;
    assert_eq!(body["count"], 1);

    // Rotation is admin-only.
    let (status, _) = send(
        &env.app,
        post(&format!("/vault/{}/rotate", user.id), &free, &json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

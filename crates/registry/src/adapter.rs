//! The adapter capability set and its declarative implementation.
//!
//! Every platform handler exposes the same three operations. The registry
//! only ever builds [`DeclarativeAdapter`]s — an adapter is its manifest,
//! and each operation call becomes one outbound HTTP request against the
//! manifest's handler table.

use async_trait::async_trait;
use serde_json::Value;

use agenr_domain::error::{Error, Result};

use crate::manifest::{AdapterManifest, OperationGroup, OperationSpec};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Capability set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One platform operation call.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Operation name inside the group (`request.op`). May be omitted when
    /// the group has exactly one handler.
    pub name: Option<String>,
    /// Remaining request fields, passed to the handler.
    pub params: Value,
}

impl OperationRequest {
    /// Split an API request body into `(op, params)`.
    pub fn from_value(request: &Value) -> Self {
        let name = request
            .get("op")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut params = request.clone();
        if let Some(map) = params.as_object_mut() {
            map.remove("op");
        }
        Self { name, params }
    }
}

#[async_trait]
pub trait Adapter: Send + Sync {
    /// Describe the platform's capabilities. Never leaves the process.
    async fn discover(&self, req: OperationRequest) -> Result<Value>;
    /// Read-only platform call.
    async fn query(&self, req: OperationRequest, creds: Option<&Value>) -> Result<Value>;
    /// Side-effecting platform call.
    async fn execute(&self, req: OperationRequest, creds: Option<&Value>) -> Result<Value>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Declarative implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct DeclarativeAdapter {
    manifest: AdapterManifest,
    http: reqwest::Client,
}

impl DeclarativeAdapter {
    pub fn new(manifest: AdapterManifest, http: reqwest::Client) -> Self {
        Self { manifest, http }
    }

    pub fn manifest(&self) -> &AdapterManifest {
        &self.manifest
    }

    fn pick_operation(&self, group: OperationGroup, req: &OperationRequest) -> Result<&OperationSpec> {
        let ops = match group {
            OperationGroup::Discover => &self.manifest.discover_ops,
            OperationGroup::Query => &self.manifest.query_ops,
            OperationGroup::Execute => &self.manifest.execute_ops,
        };
        match &req.name {
            Some(name) => self
                .manifest
                .find_operation(group, name)
                .ok_or_else(|| Error::NotFound(format!("unknown operation '{name}'"))),
            None if ops.len() == 1 => Ok(&ops[0]),
            None => Err(Error::Invalid(
                "request must name an operation via 'op'".into(),
            )),
        }
    }

    async fn call(
        &self,
        group: OperationGroup,
        req: OperationRequest,
        creds: Option<&Value>,
    ) -> Result<Value> {
        let op = self.pick_operation(group, &req)?;
        let base = self
            .manifest
            .adapter
            .base_url
            .as_deref()
            .ok_or_else(|| Error::Invalid("adapter manifest has no base_url".into()))?;
        let url = format!(
            "{}{}",
            base.trim_end_matches('/'),
            substitute_path(&op.path, &req.params)
        );

        let parsed = reqwest::Url::parse(&url)
            .map_err(|e| Error::Invalid(format!("adapter URL: {e}")))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        let allowed = &self.manifest.domains.allowed;
        if !allowed.is_empty() && !allowed.iter().any(|d| d == &host) {
            return Err(Error::Forbidden(format!(
                "host '{host}' is not in the adapter's allowed domains"
            )));
        }

        let method = op.method.to_ascii_uppercase();
        let mut builder = match method.as_str() {
            "GET" => self.http.get(parsed).query(&query_pairs(&req.params)),
            "POST" => self.http.post(parsed).json(&req.params),
            "PUT" => self.http.put(parsed).json(&req.params),
            "PATCH" => self.http.patch(parsed).json(&req.params),
            "DELETE" => self.http.delete(parsed),
            other => {
                return Err(Error::Invalid(format!(
                    "unsupported operation method '{other}'"
                )))
            }
        };

        // Credential injection, gated by the authenticated-domain list.
        if let Some(payload) = creds {
            let authenticated = &self.manifest.domains.authenticated;
            if authenticated.is_empty() || authenticated.iter().any(|d| d == &host) {
                builder = inject_credential(builder, payload);
            }
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Transient(format!("platform call failed: {e}")))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transient(format!("reading platform response: {e}")))?;
        if !status.is_success() {
            return Err(Error::Transient(format!(
                "platform returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl Adapter for DeclarativeAdapter {
    async fn discover(&self, _req: OperationRequest) -> Result<Value> {
        Ok(self.manifest.operation_catalog())
    }

    async fn query(&self, req: OperationRequest, creds: Option<&Value>) -> Result<Value> {
        self.call(OperationGroup::Query, req, creds).await
    }

    async fn execute(&self, req: OperationRequest, creds: Option<&Value>) -> Result<Value> {
        self.call(OperationGroup::Execute, req, creds).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request building helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replace `{key}` segments in an operation path with scalar param values.
fn substitute_path(path: &str, params: &Value) -> String {
    let mut out = path.to_string();
    if let Some(map) = params.as_object() {
        for (key, value) in map {
            let needle = format!("{{{key}}}");
            if !out.contains(&needle) {
                continue;
            }
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out = out.replace(&needle, &rendered);
        }
    }
    out
}

/// Scalar params become GET query pairs; structured values are skipped.
fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Some(map) = params.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key.clone(), rendered))
        })
        .collect()
}

/// Attach the decrypted credential to the outbound request.
fn inject_credential(
    builder: reqwest::RequestBuilder,
    payload: &Value,
) -> reqwest::RequestBuilder {
    if let Some(token) = payload.get("access_token").and_then(Value::as_str) {
        return builder.bearer_auth(token);
    }
    if let Some(key) = payload.get("api_key").and_then(Value::as_str) {
        return builder.bearer_auth(key);
    }
    if let Some(cookie) = payload.get("cookie_value").and_then(Value::as_str) {
        return builder.header("Cookie", cookie);
    }
    builder
}

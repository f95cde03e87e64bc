//! Adapter manifests.
//!
//! An adapter is a declarative TOML document: identity (`[adapter]`), an
//! auth strategy (`[auth]`), domain allowlists (`[domains]`) and the three
//! operation tables (`[[discover]]`, `[[query]]`, `[[execute]]`). The
//! registry builds a runnable adapter from the parsed manifest; no
//! arbitrary code is ever loaded.
//!
//! ```toml
//! [adapter]
//! platform = "toast"
//! version = "1.2.0"
//! display_name = "Toast POS"
//! base_url = "https://api.toasttab.com"
//!
//! [auth]
//! type = "oauth2"
//!
//! [auth.oauth]
//! authorization_url = "https://auth.toasttab.com/authorize"
//! token_url = "https://auth.toasttab.com/token"
//! scopes = ["orders.read"]
//!
//! [domains]
//! allowed = ["api.toasttab.com"]
//! authenticated = ["api.toasttab.com"]
//!
//! [[query]]
//! name = "list_orders"
//! method = "GET"
//! path = "/v1/orders"
//! summary = "List recent orders"
//!
//! [[execute]]
//! name = "create_order"
//! method = "POST"
//! path = "/v1/orders"
//! summary = "Create an order"
//! ```

use serde::{Deserialize, Serialize};

use agenr_domain::error::{Error, Result};
use agenr_domain::ident::is_valid_service_id;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifest shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterManifest {
    pub adapter: AdapterInfo,
    #[serde(default)]
    pub auth: Option<AuthBlock>,
    #[serde(default)]
    pub domains: DomainsBlock,
    #[serde(default, rename = "discover")]
    pub discover_ops: Vec<OperationSpec>,
    #[serde(default, rename = "query")]
    pub query_ops: Vec<OperationSpec>,
    #[serde(default, rename = "execute")]
    pub execute_ops: Vec<OperationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterInfo {
    /// Platform identifier; trimmed + lowercased on parse.
    pub platform: String,
    /// Semver `major.minor.patch`; drives bundled-adapter upgrades.
    pub version: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Base URL prepended to operation paths.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthBlock {
    /// `api_key`, `oauth2`, `client_credentials`, `cookie`, `app_oauth`, …
    #[serde(rename = "type")]
    pub auth_type: String,
    #[serde(default)]
    pub oauth: Option<OAuthUrls>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUrls {
    pub authorization_url: String,
    pub token_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DomainsBlock {
    /// Hosts the adapter may reach. Empty = unrestricted (dev adapters).
    #[serde(default)]
    pub allowed: Vec<String>,
    /// Hosts that receive the caller's credential.
    #[serde(default)]
    pub authenticated: Vec<String>,
}

/// One entry in a handler table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    pub name: String,
    #[serde(default = "d_get")]
    pub method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub summary: Option<String>,
}

fn d_get() -> String {
    "GET".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parsing & validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl AdapterManifest {
    /// Parse and normalise a manifest document.
    ///
    /// The platform name is trimmed + lowercased and must pass the shared
    /// identifier gate; the version must be numeric `major.minor.patch`.
    /// An `oauth2` auth block whose URLs are not both HTTPS is dropped
    /// (with a warning) while the rest of the manifest is kept.
    pub fn parse(source: &str) -> Result<Self> {
        let mut manifest: AdapterManifest = toml::from_str(source)
            .map_err(|e| Error::Invalid(format!("adapter manifest: {e}")))?;

        manifest.adapter.platform = manifest.adapter.platform.trim().to_ascii_lowercase();
        if !is_valid_service_id(&manifest.adapter.platform) {
            return Err(Error::Invalid(format!(
                "invalid platform name '{}'",
                manifest.adapter.platform
            )));
        }
        if parse_semver(&manifest.adapter.version).is_none() {
            return Err(Error::Invalid(format!(
                "invalid adapter version '{}': expected major.minor.patch",
                manifest.adapter.version
            )));
        }

        if let Some(auth) = &mut manifest.auth {
            if auth.auth_type == "oauth2" {
                let urls_ok = auth.oauth.as_ref().is_some_and(|o| {
                    o.authorization_url.starts_with("https://")
                        && o.token_url.starts_with("https://")
                });
                if !urls_ok {
                    tracing::warn!(
                        platform = %manifest.adapter.platform,
                        "dropping oauth block: authorization/token URLs must be HTTPS"
                    );
                    auth.oauth = None;
                }
            }
        }

        Ok(manifest)
    }

    /// Catalogue of operations, grouped the way `discover` reports them.
    pub fn operation_catalog(&self) -> serde_json::Value {
        let render = |ops: &[OperationSpec]| {
            ops.iter()
                .map(|op| {
                    serde_json::json!({
                        "name": op.name,
                        "method": op.method,
                        "path": op.path,
                        "summary": op.summary,
                    })
                })
                .collect::<Vec<_>>()
        };
        serde_json::json!({
            "platform": self.adapter.platform,
            "version": self.adapter.version,
            "display_name": self.adapter.display_name,
            "description": self.adapter.description,
            "auth_type": self.auth.as_ref().map(|a| a.auth_type.clone()),
            "operations": {
                "discover": render(&self.discover_ops),
                "query": render(&self.query_ops),
                "execute": render(&self.execute_ops),
            }
        })
    }

    /// Find an operation spec by group and name.
    pub fn find_operation(&self, group: OperationGroup, name: &str) -> Option<&OperationSpec> {
        let ops = match group {
            OperationGroup::Discover => &self.discover_ops,
            OperationGroup::Query => &self.query_ops,
            OperationGroup::Execute => &self.execute_ops,
        };
        ops.iter().find(|op| op.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationGroup {
    Discover,
    Query,
    Execute,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deep validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validation issues found in a manifest (non-fatal warnings + fatal
/// errors). Parse-level rules (platform gate, semver, HTTPS OAuth URLs)
/// are enforced in [`AdapterManifest::parse`]; this covers the rest.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManifestValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ManifestValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

impl AdapterManifest {
    /// Validate operation tables and domain lists.
    pub fn validate(&self) -> ManifestValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (group, ops) in [
            ("discover", &self.discover_ops),
            ("query", &self.query_ops),
            ("execute", &self.execute_ops),
        ] {
            let mut seen = std::collections::HashSet::new();
            for op in ops {
                if op.name.is_empty() {
                    errors.push(format!("{group} operation with an empty name"));
                }
                if !seen.insert(op.name.as_str()) {
                    errors.push(format!("duplicate {group} operation '{}'", op.name));
                }
                if group != "discover" && op.path.is_empty() {
                    warnings.push(format!(
                        "{group} operation '{}' has no path — it cannot be dispatched",
                        op.name
                    ));
                }
            }
        }

        let has_remote_ops = !self.query_ops.is_empty() || !self.execute_ops.is_empty();
        if has_remote_ops && self.adapter.base_url.is_none() {
            warnings.push("query/execute operations declared but no base_url".into());
        }
        if self.query_ops.is_empty() && self.execute_ops.is_empty() && self.discover_ops.is_empty()
        {
            warnings.push("manifest declares no operations".into());
        }

        // Credentials only flow to authenticated hosts; an authenticated
        // host outside the allowlist can never be reached.
        if !self.domains.allowed.is_empty() {
            for host in &self.domains.authenticated {
                if !self.domains.allowed.contains(host) {
                    warnings.push(format!(
                        "authenticated domain '{host}' is not in the allowed list"
                    ));
                }
            }
        }

        if let Some(description) = &self.adapter.description {
            if description.len() > 400 {
                warnings.push(format!(
                    "description is {} chars (recommended < 400)",
                    description.len()
                ));
            }
        }

        ManifestValidation { errors, warnings }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Semver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse `major.minor.patch` with numeric components.
pub fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// `true` when `candidate` is strictly newer than `current`.
pub fn semver_newer(candidate: &str, current: &str) -> bool {
    match (parse_semver(candidate), parse_semver(current)) {
        (Some(a), Some(b)) => a > b,
        // An unparseable stored version is always superseded.
        (Some(_), None) => true,
        _ => false,
    }
}

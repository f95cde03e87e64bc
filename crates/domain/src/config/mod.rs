mod adapters;
mod jobs;
mod policy;
mod server;
mod store;
mod vault;

pub use adapters::*;
pub use jobs::*;
pub use policy::*;
pub use server::*;
pub use store::*;
pub use vault::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub adapters: AdaptersConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Config {
    /// Load from a TOML file if it exists, then apply `AGENR_*` environment
    /// overrides. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw)
                .map_err(|e| Error::Invalid(format!("parsing {}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Environment variables win over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AGENR_EXECUTE_POLICY") {
            match v.parse::<ExecutePolicy>() {
                Ok(p) => self.policy.execute_policy = p,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid AGENR_EXECUTE_POLICY"),
            }
        }
        if let Ok(v) = std::env::var("AGENR_MAX_EXECUTE_AMOUNT") {
            match v.parse::<i64>() {
                Ok(n) => self.policy.max_execute_amount_cents = n,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid AGENR_MAX_EXECUTE_AMOUNT"),
            }
        }
        if let Ok(v) = std::env::var("AGENR_DB_PATH") {
            self.store.db_path = v.into();
        }
        if let Ok(v) = std::env::var("AGENR_ADAPTERS_DIR") {
            self.adapters.adapters_dir = v.into();
        }
        if let Ok(v) = std::env::var("AGENR_RUNTIME_ADAPTERS_DIR") {
            self.adapters.runtime_dir = v.into();
        }
        if let Ok(v) = std::env::var("AGENR_BUNDLED_ADAPTERS_DIR") {
            self.adapters.bundled_dir = v.into();
        }
        if let Ok(v) = std::env::var("AGENR_BASE_URL") {
            self.server.base_url = v;
        }
        if let Ok(v) = std::env::var("AGENR_JOB_POLL_INTERVAL_MS") {
            match v.parse::<u64>() {
                Ok(n) => self.jobs.poll_interval_ms = n,
                Err(_) => tracing::warn!(value = %v, "ignoring invalid AGENR_JOB_POLL_INTERVAL_MS"),
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.base_url".into(),
                message: "base_url must start with http:// or https://".into(),
            });
        }

        if self.policy.max_execute_amount_cents <= 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "policy.max_execute_amount_cents".into(),
                message: "amount ceiling must be positive".into(),
            });
        }

        if self.store.db_path.as_os_str().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "store.db_path".into(),
                message: "db_path must not be empty".into(),
            });
        }

        if self.jobs.poll_interval_ms < 100 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "jobs.poll_interval_ms".into(),
                message: "poll interval under 100ms will hammer the store".into(),
            });
        }

        if std::env::var("AGENR_API_KEY").map(|v| v.is_empty()).unwrap_or(true) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "AGENR_API_KEY".into(),
                message: "no bootstrap admin key set — admin endpoints need an existing admin key"
                    .into(),
            });
        }

        issues
    }
}

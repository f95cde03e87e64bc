use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Vault
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Environment variable holding the hex-encoded 32-byte KMS master key.
    /// If the env var is unset the vault refuses credential writes.
    #[serde(default = "d_master_key_env")]
    pub master_key_env: String,
    /// Seconds of remaining OAuth token lifetime below which retrieval
    /// triggers a transparent refresh.
    #[serde(default = "d_refresh_window")]
    pub refresh_window_secs: i64,
    /// Timeout for one token-endpoint refresh call, in seconds.
    #[serde(default = "d_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key_env: d_master_key_env(),
            refresh_window_secs: d_refresh_window(),
            refresh_timeout_secs: d_refresh_timeout(),
        }
    }
}

fn d_master_key_env() -> String {
    "AGENR_KMS_MASTER_KEY".into()
}
fn d_refresh_window() -> i64 {
    60
}
fn d_refresh_timeout() -> u64 {
    30
}

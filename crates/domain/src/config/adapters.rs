use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter directories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptersConfig {
    /// Root of the adapter tree (parent of `runtime_dir`).
    #[serde(default = "d_adapters_dir")]
    pub adapters_dir: PathBuf,
    /// Runtime tree holding `sandbox/<owner>/`, `public/` and `_rejected/`.
    /// Adapter rows whose `file_path` falls outside this tree are skipped
    /// during restore.
    #[serde(default = "d_runtime_dir")]
    pub runtime_dir: PathBuf,
    /// Source-controlled adapters shipped with the binary; seeded as
    /// system-owned public rows at startup.
    #[serde(default = "d_bundled_dir")]
    pub bundled_dir: PathBuf,
    /// Timeout for a single declarative adapter HTTP call, in seconds.
    #[serde(default = "d_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            adapters_dir: d_adapters_dir(),
            runtime_dir: d_runtime_dir(),
            bundled_dir: d_bundled_dir(),
            http_timeout_secs: d_http_timeout(),
        }
    }
}

fn d_adapters_dir() -> PathBuf {
    "./data/adapters".into()
}
fn d_runtime_dir() -> PathBuf {
    "./data/adapters/runtime".into()
}
fn d_bundled_dir() -> PathBuf {
    "./adapters".into()
}
fn d_http_timeout() -> u64 {
    30
}

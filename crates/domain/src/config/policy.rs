use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execute policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gate applied to side-effecting `execute` operations.
///
/// - `open` — pass through, no pre-check.
/// - `confirm` — a valid confirmation token is required.
/// - `strict` — `confirm` plus an amount ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutePolicy {
    #[default]
    Open,
    Confirm,
    Strict,
}

impl FromStr for ExecutePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "confirm" => Ok(Self::Confirm),
            "strict" => Ok(Self::Strict),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ExecutePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Open => "open",
            Self::Confirm => "confirm",
            Self::Strict => "strict",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub execute_policy: ExecutePolicy,
    /// Ceiling applied by the `strict` policy, in integer cents.
    #[serde(default = "d_max_amount")]
    pub max_execute_amount_cents: i64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            execute_policy: ExecutePolicy::Open,
            max_execute_amount_cents: d_max_amount(),
        }
    }
}

fn d_max_amount() -> i64 {
    100
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generation job queue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Worker poll cadence when the queue is empty.
    #[serde(default = "d_poll_interval")]
    pub poll_interval_ms: u64,
    /// Deadline for one generator invocation, in seconds.
    #[serde(default = "d_generator_timeout")]
    pub generator_timeout_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: d_poll_interval(),
            generator_timeout_secs: d_generator_timeout(),
        }
    }
}

fn d_poll_interval() -> u64 {
    2_000
}
fn d_generator_timeout() -> u64 {
    300
}

use serde::{Deserialize, Serialize};
use std::time::Duration;
use voxbridge_types::EngineContext;

fn default_call_timeout_seconds() -> u64 {
    300
}

fn default_commit_interval_ms() -> u64 {
    100
}

fn default_cancel_grace_ms() -> u64 {
    2000
}

fn default_greeting() -> String {
    "It's time to take your medicine".to_string()
}

/// Per-call tunables shared by every session a registry creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Hard ceiling on the conversation phase, in seconds. Not reset by audio activity.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,

    /// Accumulation window between commits of inbound user audio.
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// How long cleanup waits for a cancelled relay (or a close/disconnect)
    /// before giving up on it.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Utterance the engine speaks before any audio is relayed.
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// Session parameters for the conversation engine.
    #[serde(default)]
    pub context: EngineContext,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            call_timeout_seconds: default_call_timeout_seconds(),
            commit_interval_ms: default_commit_interval_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            greeting: default_greeting(),
            context: EngineContext::default(),
        }
    }
}

impl CallConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn commit_interval(&self) -> Duration {
        // A zero interval would make `tokio::time::interval` panic.
        Duration::from_millis(self.commit_interval_ms.max(1))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Externally supplied service configuration.
///
/// Every field has a serde default so a partial TOML file (or none at all)
/// yields a working config; the binary layers environment-variable
/// overrides on top.
#[derive(Debug, Clone, Deserialize)]
pub struct MeshConfig {
    /// Liveness window for worker entries in the store.
    #[serde(default = "default_worker_ttl_secs")]
    pub worker_ttl_secs: u64,
    /// Interval workers are expected to heartbeat at.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Interval of the registry's secondary-index cleanup sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Default per-call worker timeout.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Per-role timeout overrides for known-slow roles.
    #[serde(default)]
    pub role_timeout_secs: HashMap<String, u64>,
    /// Retries on transport-level failure per worker call.
    #[serde(default = "default_max_call_retries")]
    pub max_call_retries: u32,
    /// Base delay for the broker's linear backoff between call retries.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_worker_ttl_secs() -> u64 {
    60
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_sweep_interval_secs() -> u64 {
    30
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_max_call_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            worker_ttl_secs: default_worker_ttl_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            role_timeout_secs: HashMap::new(),
            max_call_retries: default_max_call_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl MeshConfig {
    pub fn worker_ttl(&self) -> Duration {
        Duration::from_secs(self.worker_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Timeout for a call to the given role, honoring per-role overrides.
    pub fn call_timeout(&self, role: &str) -> Duration {
        let secs = self
            .role_timeout_secs
            .get(&role.to_lowercase())
            .copied()
            .unwrap_or(self.call_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Apply `TASKMESH_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("TASKMESH_WORKER_TTL_SECS") {
            self.worker_ttl_secs = v;
        }
        if let Some(v) = env_u64("TASKMESH_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = env_u64("TASKMESH_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = v;
        }
        if let Some(v) = env_u64("TASKMESH_CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = v;
        }
        if let Some(v) = env_u64("TASKMESH_MAX_CALL_RETRIES") {
            self.max_call_retries = v as u32;
        }
        if let Some(v) = env_u64("TASKMESH_RETRY_BACKOFF_MS") {
            self.retry_backoff_ms = v;
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

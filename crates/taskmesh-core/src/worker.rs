use crate::params::ParamSpec;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Available,
    Busy,
    Offline,
    Error,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Available => "available",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Offline => "offline",
            WorkerStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Running per-worker task statistics maintained by the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    /// Exponentially-weighted average execution time in milliseconds.
    pub avg_execution_ms: f64,
}

impl WorkerStats {
    /// Record one task outcome. Successful samples feed the EWMA with
    /// weight 0.2 against the existing average.
    pub fn record(&mut self, success: bool, execution_ms: Option<u64>) {
        self.total_tasks += 1;
        if success {
            self.completed_tasks += 1;
            if let Some(ms) = execution_ms {
                if self.avg_execution_ms == 0.0 {
                    self.avg_execution_ms = ms as f64;
                } else {
                    self.avg_execution_ms = 0.8 * self.avg_execution_ms + 0.2 * ms as f64;
                }
            }
        } else {
            self.failed_tasks += 1;
        }
    }
}

/// A registered execution endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    /// Grouping key, stored lowercase.
    pub role: String,
    #[serde(default)]
    pub description: String,
    /// Base URI of the worker; the broker POSTs to `{endpoint}/run`.
    pub endpoint: String,
    pub status: WorkerStatus,
    /// Reported load in [0, 1].
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub active_task_count: u32,
    pub last_heartbeat: DateTime<Utc>,
    /// Declared parameter schema, in declaration order.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub stats: WorkerStats,
}

fn default_enabled() -> bool {
    true
}

impl WorkerRecord {
    pub fn new(
        id: impl Into<String>,
        role: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            role: role.into().to_lowercase(),
            description: String::new(),
            endpoint: endpoint.into(),
            status: WorkerStatus::Available,
            load: 0.0,
            active_task_count: 0,
            last_heartbeat: Utc::now(),
            params: Vec::new(),
            enabled: true,
            stats: WorkerStats::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }
}

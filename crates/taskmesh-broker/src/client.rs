use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use taskmesh_core::{MeshError, MeshResult};
use tracing::{debug, warn};

/// Body of the uniform worker execution contract: `POST {endpoint}/run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub task_id: String,
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_configs: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RunResponse {
    status: String,
    #[serde(default)]
    result: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for worker invocation.
///
/// A single call per attempt with the supplied timeout, and up to
/// `max_retries` retries with linear backoff on transport-level failure
/// only. An application-level error response from the worker is terminal
/// and never retried.
#[derive(Debug, Clone)]
pub struct WorkerClient {
    http: reqwest::Client,
    max_retries: u32,
    backoff_ms: u64,
}

impl WorkerClient {
    pub fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            max_retries,
            backoff_ms,
        }
    }

    /// Invoke `{endpoint}/run` and return the worker's result map.
    pub async fn run(
        &self,
        endpoint: &str,
        request: &RunRequest,
        timeout: Duration,
    ) -> MeshResult<Map<String, Value>> {
        let url = format!("{}/run", endpoint.trim_end_matches('/'));
        let mut last_err = String::new();

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff_ms.saturating_mul(u64::from(attempt));
                debug!(url = %url, attempt, delay_ms = delay, "Retrying worker call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let response = match self
                .http
                .post(&url)
                .timeout(timeout)
                .json(request)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Worker transport failure");
                    last_err = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() {
                // 5xx counts as a transport-level failure and is retried.
                warn!(url = %url, attempt, status = %status, "Worker returned server error");
                last_err = format!("worker returned {status}");
                continue;
            }
            if !status.is_success() {
                return Err(MeshError::Worker(format!("worker returned {status}")));
            }

            let body: RunResponse = response
                .json()
                .await
                .map_err(|e| MeshError::Worker(format!("unparseable worker response: {e}")))?;

            return if body.status == "success" {
                Ok(body.result.unwrap_or_default())
            } else {
                Err(MeshError::Worker(
                    body.error
                        .unwrap_or_else(|| "unspecified worker error".to_string()),
                ))
            };
        }

        Err(MeshError::Transport(format!(
            "worker at {url} unreachable after {} attempts: {last_err}",
            self.max_retries + 1
        )))
    }
}

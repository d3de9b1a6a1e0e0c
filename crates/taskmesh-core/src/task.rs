use crate::params::params_hash;
use crate::{MeshError, MeshResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifecycle state of a [`TaskRecord`].
///
/// Transitions are monotonic: once a task reaches a terminal state it never
/// leaves it, and no state re-enters `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// The legal transition set:
    /// pending→processing, processing→{completed, failed, cancelled},
    /// pending→cancelled. Everything else is rejected.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One unit of work routed through the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub role: String,
    pub params: Map<String, Value>,
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_worker_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Present only when the task completed.
    #[serde(default)]
    pub result: Option<Map<String, Value>>,
    /// Present only when the task failed.
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration from creation to completion, in milliseconds.
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    /// Whether the result came from the shared cache without a worker call.
    #[serde(default)]
    pub cache_hit: bool,
}

impl TaskRecord {
    /// Create a pending record. The task id is derived deterministically
    /// from (role, params, conversation) when a conversation id is supplied,
    /// making resubmissions of the same request de-duplicable; otherwise a
    /// random id is generated.
    pub fn new(
        role: impl Into<String>,
        params: Map<String, Value>,
        conversation_id: Option<String>,
    ) -> Self {
        let role = role.into().to_lowercase();
        let task_id = match &conversation_id {
            Some(conv) => Self::deterministic_id(&role, &params, conv),
            None => Uuid::new_v4().to_string(),
        };
        let now = Utc::now();
        Self {
            task_id,
            role,
            params,
            status: TaskStatus::Pending,
            assigned_worker_id: None,
            conversation_id,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            execution_time_ms: None,
            cache_hit: false,
        }
    }

    /// Stable id over role, canonical params, and conversation.
    pub fn deterministic_id(role: &str, params: &Map<String, Value>, conversation: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(role.as_bytes());
        hasher.update(b"|");
        hasher.update(params_hash(params).as_bytes());
        hasher.update(b"|");
        hasher.update(conversation.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    /// Apply a state transition, rejecting any move the state machine does
    /// not allow.
    pub fn transition(&mut self, next: TaskStatus) -> MeshResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(MeshError::Validation(format!(
                "illegal task transition {} -> {} for task {}",
                self.status, next, self.task_id
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark completed with a result, recording completion time and duration.
    pub fn complete(&mut self, result: Map<String, Value>) -> MeshResult<()> {
        self.transition(TaskStatus::Completed)?;
        let now = Utc::now();
        self.execution_time_ms = Some((now - self.created_at).num_milliseconds().max(0) as u64);
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(())
    }

    /// Mark failed with the propagated error string.
    pub fn fail(&mut self, error: impl Into<String>) -> MeshResult<()> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn new_task_is_pending() {
        let task = TaskRecord::new("Writer", params(json!({"topic": "rust"})), None);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.role, "writer");
        assert!(!task.cache_hit);
    }

    #[test]
    fn deterministic_id_is_stable() {
        let p = params(json!({"topic": "rust", "length": 3}));
        let a = TaskRecord::new("writer", p.clone(), Some("conv-1".into()));
        let b = TaskRecord::new("writer", p, Some("conv-1".into()));
        assert_eq!(a.task_id, b.task_id);
    }

    #[test]
    fn random_id_without_conversation() {
        let p = params(json!({"topic": "rust"}));
        let a = TaskRecord::new("writer", p.clone(), None);
        let b = TaskRecord::new("writer", p, None);
        assert_ne!(a.task_id, b.task_id);
    }

    #[test]
    fn legal_transitions() {
        let mut task = TaskRecord::new("writer", Map::new(), None);
        task.transition(TaskStatus::Processing).unwrap();
        task.complete(params(json!({"text": "done"}))).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert!(task.execution_time_ms.is_some());
    }

    #[test]
    fn pending_can_cancel() {
        let mut task = TaskRecord::new("writer", Map::new(), None);
        task.transition(TaskStatus::Cancelled).unwrap();
        assert!(task.status.is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut task = TaskRecord::new("writer", Map::new(), None);
        task.transition(TaskStatus::Processing).unwrap();
        task.fail("boom").unwrap();
        assert!(task.transition(TaskStatus::Pending).is_err());
        assert!(task.transition(TaskStatus::Processing).is_err());
        assert!(task.transition(TaskStatus::Cancelled).is_err());
    }

    #[test]
    fn no_pending_to_completed_shortcut() {
        let mut task = TaskRecord::new("writer", Map::new(), None);
        assert!(task.transition(TaskStatus::Completed).is_err());
        assert!(task.transition(TaskStatus::Failed).is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}

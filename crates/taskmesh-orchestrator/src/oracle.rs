use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use taskmesh_core::{MeshResult, PlannedTask};

/// Seam for the external planning step: turn a free-form request into a
/// list of planned tasks restricted to the roles currently enabled.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: &str, enabled_roles: &[String]) -> MeshResult<Vec<PlannedTask>>;
}

/// A finished task's contribution, as handed to the integrator.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub role: String,
    pub description: String,
    pub content: Value,
}

/// Seam for the external integration step: combine the qualifying task
/// results into one final answer for the original request.
#[async_trait]
pub trait Integrator: Send + Sync {
    async fn integrate(&self, request: &str, results: &[TaskSummary]) -> MeshResult<String>;
}

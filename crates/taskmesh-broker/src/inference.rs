use async_trait::async_trait;
use serde_json::{Map, Value};
use taskmesh_core::{MeshResult, ParamSpec};

/// Seam for the external parameter-inference step.
///
/// When required parameters are still absent after coercion, the broker
/// asks the oracle for values and re-runs type coercion on exactly the
/// inferred fields. The oracle itself (an LLM, a heuristic service) lives
/// outside the control plane.
#[async_trait]
pub trait InferenceOracle: Send + Sync {
    /// Propose values for the missing parameters given what is already
    /// known about the task.
    async fn infer(
        &self,
        role: &str,
        missing: &[ParamSpec],
        existing: &Map<String, Value>,
    ) -> MeshResult<Map<String, Value>>;
}

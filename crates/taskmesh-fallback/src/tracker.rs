use std::collections::HashMap;
use taskmesh_core::{MeshError, MeshResult};

/// Per-step retry bookkeeping for a multi-step interactive loop.
///
/// A caller driving a session tracks, per step id, how many times fallback
/// has already been invoked; exceeding the loop's own bound is fatal for
/// that step.
#[derive(Debug)]
pub struct StepRetryTracker {
    counts: HashMap<String, u32>,
    max_retries: u32,
}

impl StepRetryTracker {
    pub fn new(max_retries: u32) -> Self {
        Self {
            counts: HashMap::new(),
            max_retries,
        }
    }

    /// Record one fallback invocation for the step. Returns the running
    /// count, or an error once the step's budget is exceeded.
    pub fn record(&mut self, step_id: &str) -> MeshResult<u32> {
        let count = self.counts.entry(step_id.to_string()).or_insert(0);
        *count += 1;
        if *count > self.max_retries {
            return Err(MeshError::Validation(format!(
                "step {step_id} exceeded {} fallback retries",
                self.max_retries
            )));
        }
        Ok(*count)
    }

    /// Retries already consumed by the step.
    pub fn count(&self, step_id: &str) -> u32 {
        self.counts.get(step_id).copied().unwrap_or(0)
    }

    /// Forget a step, e.g. once it finally succeeds.
    pub fn reset(&mut self, step_id: &str) {
        self.counts.remove(step_id);
    }
}

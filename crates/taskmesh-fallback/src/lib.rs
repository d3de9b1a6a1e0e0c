//! Failure recovery for the taskmesh control plane.
//!
//! A [`FallbackManager`] holds named, ordered chains of recovery strategies
//! per failure category (task execution, agent selection, parameter
//! validation, ...). When a step fails, the owning subsystem hands the
//! failure to the manager; strategies run in declared order with bounded
//! retries and jittered backoff until one reports success or an
//! alternative path, or the chain is exhausted.
//!
//! Strategies are pure: they mutate nothing and only return a
//! [`FallbackResult`]. Applying an `Alternative` payload (a substitute
//! role, a repaired parameter set) back into the retry loop is the
//! caller's job.

mod manager;
mod tracker;

pub use manager::{
    BackoffPolicy, FallbackContext, FallbackManager, FallbackResult, FallbackStatus,
    FallbackStrategy,
};
pub use tracker::StepRetryTracker;

/// Failure category for broker/orchestrator task execution errors.
pub const TASK_EXECUTION_FAILURE: &str = "task_execution_failure";
/// Failure category raised when no live worker exists for a role.
pub const AGENT_SELECTION_FAILURE: &str = "agent_selection_failure";
/// Failure category for parameter validation/repair errors.
pub const PARAM_VALIDATION_FAILURE: &str = "param_validation_failure";

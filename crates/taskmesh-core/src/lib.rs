//! Core types and error definitions for the taskmesh control plane.
//!
//! This crate provides the foundational types shared across all taskmesh
//! crates: the task and worker records, parameter schemas with the
//! coerce-or-repair pipeline, planned-task representations, and the unified
//! error enum.
//!
//! # Main types
//!
//! - [`MeshError`]: Unified error enum for all taskmesh subsystems.
//! - [`MeshResult`]: Convenience alias for `Result<T, MeshError>`.
//! - [`TaskRecord`] / [`TaskStatus`]: A unit of work and its lifecycle.
//! - [`WorkerRecord`] / [`WorkerStatus`]: A registered execution endpoint.
//! - [`ParamSpec`] / [`ParamType`]: Declared worker parameter schema.
//! - [`PlannedTask`]: One entry of a decomposed request plan.

/// Service and timeout configuration.
pub mod config;
/// Parameter schema, coercion, and canonical hashing.
pub mod params;
/// Planned-task representation consumed by the orchestrator.
pub mod plan;
/// Task records and the lifecycle state machine.
pub mod task;
/// Worker records, status, and running statistics.
pub mod worker;

pub use config::MeshConfig;
pub use params::{canonical_json, coerce_value, params_hash, validate_params, ParamSpec, ParamType};
pub use plan::PlannedTask;
pub use task::{TaskRecord, TaskStatus};
pub use worker::{WorkerRecord, WorkerStats, WorkerStatus};

use thiserror::Error;

/// Top-level error type for the taskmesh control plane.
///
/// Each variant corresponds to one entry of the failure taxonomy. Only
/// [`MeshError::Transport`] is retryable at the call site; everything else
/// is recorded on the task and surfaced to the caller.
#[derive(Debug, Error)]
pub enum MeshError {
    /// An unknown worker or task id. A normal outcome, not an incident.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No live, enabled worker exists for the requested role.
    #[error("No agent available: {0}")]
    NoAgentAvailable(String),

    /// A parameter failed type or enum coercion and had no default.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The worker was unreachable or timed out. Retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The worker responded with an application-level failure. Terminal.
    #[error("Worker error: {0}")]
    Worker(String),

    /// The dependency graph contained a cycle.
    #[error("Dependency cycle detected: {0}")]
    CycleDetected(String),

    /// The shared key-value store is unavailable.
    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeshError {
    /// Whether the error is transient and worth retrying at the call site.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Transport(_))
    }
}

/// A convenience `Result` alias using [`MeshError`].
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn transport_is_retryable() {
        assert!(MeshError::Transport("connection refused".into()).is_retryable());
        assert!(!MeshError::Worker("bad input".into()).is_retryable());
        assert!(!MeshError::NotFound("task-1".into()).is_retryable());
        assert!(!MeshError::Infrastructure("store down".into()).is_retryable());
    }

    #[test]
    fn error_display_includes_detail() {
        let err = MeshError::NoAgentAvailable("role 'writer'".into());
        assert!(err.to_string().contains("writer"));
    }
}

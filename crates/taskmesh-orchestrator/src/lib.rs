//! Multi-task orchestration on top of the broker.
//!
//! A free-form request is decomposed by an external planner into tasks
//! with dependencies, filtered down to the roles currently enabled,
//! leveled topologically, and executed level by level with dependency
//! output flowing forward. The surviving results are merged by an
//! external integrator into one answer.

pub mod engine;
pub mod extract;
pub mod graph;
pub mod oracle;

pub use engine::{OrchestrationReport, OrchestrationStatus, Orchestrator, TaskReport};
pub use extract::{extract_content, propagate, Extracted};
pub use graph::{compute_levels, filter_plan};
pub use oracle::{Integrator, Planner, TaskSummary};

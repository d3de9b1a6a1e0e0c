//! Task brokering for the taskmesh control plane.
//!
//! The broker owns a task's lifecycle end-to-end and hides worker
//! selection, parameter repair, and result caching from callers. Tasks can
//! be submitted fire-and-forget ([`TaskBroker::create_task`]) for callers
//! that poll, or executed inline ([`TaskBroker::execute_task_sync`]) as the
//! orchestrator does.
//!
//! # Main types
//!
//! - [`TaskBroker`]: Lifecycle owner; the only writer of task records.
//! - [`WorkerClient`]: HTTP client for the uniform worker `/run` contract.
//! - [`ResultCache`]: Shared cache keyed by (role, canonical params).
//! - [`InferenceOracle`]: Seam for the external parameter-inference step.

/// Store-backed result cache.
pub mod cache;
/// Worker HTTP invocation with bounded transport retries.
pub mod client;
/// Parameter-inference oracle seam.
pub mod inference;
/// Load-aware worker selection.
pub mod selection;

mod broker;

pub use broker::{TaskAccepted, TaskBroker, TaskPage};
pub use cache::ResultCache;
pub use client::{RunRequest, WorkerClient};
pub use inference::InferenceOracle;
pub use selection::select_worker;

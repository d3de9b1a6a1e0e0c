//! Worker discovery and liveness for the taskmesh control plane.
//!
//! The registry holds the authoritative, eventually-consistent view of
//! which workers exist, what they can do, and whether they are alive.
//! Worker entries carry a TTL in the shared store; a background sweep
//! cleans the secondary role/status indexes once entries expire.
//!
//! # Main types
//!
//! - [`WorkerRegistry`]: Store-backed repository of worker records.
//! - [`ListFilter`]: Candidate-selection filters for role lookups.
//! - [`TaskOutcome`]: Completion/failure signal feeding worker statistics.
//! - [`SweeperHandle`]: Handle to the background expiry sweep.

mod registry;

pub use registry::{ListFilter, SweeperHandle, TaskOutcome, WorkerRegistry};

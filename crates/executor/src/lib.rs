//! Caching task execution for bake
//!
//! The decision engine that lets a previously computed task result be
//! replayed from the cache instead of re-executed. Per task it:
//!
//! 1. reads the cacheability flags (`cache_allowed` first, then the
//!    runtime `cache_enabled` predicate) — when either is false the
//!    delegate runs with no cache interaction at all
//! 2. asks the change-detection collaborator for the input fingerprint
//! 3. on a store hit, unpacks the outputs and marks the task up to date
//!    with reason `"CACHED"`; the delegate never runs
//! 4. on a miss, runs the delegate and — only when the result carries
//!    no failure — packs and stores the outputs
//!
//! Cache-layer failures (key calculation, store I/O, pack/unpack) are
//! `Err` from the engine, deliberately distinct from a task failure,
//! which is data on the returned [`ExecutionResult`].

mod error;

pub mod engine;
pub mod task;

// Re-export error types at crate root
pub use error::{Error, Result};

// Re-export main types
pub use engine::{CacheConfig, CachingTaskExecuter, REASON_CACHED};
pub use task::{
    CacheKeyCalculator, CacheableTask, ExecutionResult, TaskExecuter, TaskFailure, TaskState,
};

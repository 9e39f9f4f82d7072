//! Error types for the caching execution layer

use miette::Diagnostic;
use thiserror::Error;

/// A cache-layer failure, distinct from a task-execution failure.
///
/// Task failures are recorded on the execution result; everything here
/// aborts the cache interaction and is propagated to the caller of the
/// decision engine.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Store, pack or unpack failure
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cache(#[from] bake_cache::Error),

    /// The external key calculator failed for a task
    #[error("Failed to calculate cache key for task '{task}': {message}")]
    #[diagnostic(
        code(bake::executor::cache_key),
        help("The task's inputs could not be fingerprinted; see the change detection logs")
    )]
    KeyCalculation {
        /// Task the key was being computed for
        task: String,
        /// Description of the collaborator failure
        message: String,
    },
}

impl Error {
    /// Create a key-calculation error
    #[must_use]
    pub fn key_calculation(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::KeyCalculation {
            task: task.into(),
            message: message.into(),
        }
    }
}

/// Result type for caching execution
pub type Result<T> = std::result::Result<T, Error>;

//! Collaborator seams the decision engine consumes.
//!
//! The engine never owns a task model, a fingerprinting algorithm or a
//! task-state store; it reads them through these traits. Implementors
//! live in the surrounding build tool.

use bake_cache::CacheKey;
use bake_outputs::OutputDeclaration;

use crate::Result;

/// A task's view required for caching decisions.
///
/// Both cacheability flags are read fresh on every execution;
/// [`cache_allowed`](Self::cache_allowed) is checked first and
/// short-circuits all further cache interaction when false.
pub trait CacheableTask: Send + Sync {
    /// Task identifier used in logs and diagnostics.
    fn name(&self) -> &str;

    /// Whether the task type/author permits caching at all.
    fn cache_allowed(&self) -> bool;

    /// Runtime predicate gating caching for this execution.
    fn cache_enabled(&self) -> bool;

    /// The task's declared outputs.
    fn outputs(&self) -> OutputDeclaration;
}

/// Computes the input fingerprint for a task.
///
/// Provided by the change-detection subsystem; the engine treats the
/// key as opaque.
pub trait CacheKeyCalculator: Send + Sync {
    /// Calculate the cache key for a task's current inputs.
    ///
    /// # Errors
    ///
    /// A failure here aborts the cache interaction for the task and is
    /// surfaced as a cache-layer error.
    fn calculate_cache_key(&self, task: &dyn CacheableTask) -> Result<CacheKey>;
}

/// Task-state collaborator notified when a task is satisfied without
/// running.
pub trait TaskState {
    /// Record that the task is up to date. Called exactly once on a
    /// replay hit, with [`REASON_CACHED`](crate::engine::REASON_CACHED).
    fn up_to_date(&mut self, reason: &str);
}

/// Failure recorded by the delegate on an execution result.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Task '{task}' failed: {message}")]
pub struct TaskFailure {
    /// Name of the failed task
    pub task: String,
    /// Failure description
    pub message: String,
}

impl TaskFailure {
    /// Create a failure record for a task.
    #[must_use]
    pub fn new(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            message: message.into(),
        }
    }
}

/// Outcome of executing (or replaying) a task.
///
/// A recorded failure is a *task* failure: the engine observes it only
/// to suppress storing the outputs, and never retries.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    failure: Option<TaskFailure>,
}

impl ExecutionResult {
    /// A successful execution.
    #[must_use]
    pub fn success() -> Self {
        Self { failure: None }
    }

    /// An execution that failed.
    #[must_use]
    pub fn failed(failure: TaskFailure) -> Self {
        Self {
            failure: Some(failure),
        }
    }

    /// The recorded failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&TaskFailure> {
        self.failure.as_ref()
    }
}

/// The execution seam the decision engine wraps.
///
/// The engine itself implements this trait so it can decorate any
/// delegate executor.
pub trait TaskExecuter: Send + Sync {
    /// Execute a task, or satisfy it another way.
    ///
    /// # Errors
    ///
    /// `Err` is a cache-layer (or infrastructure) failure; a failure of
    /// the task itself is recorded on the returned result.
    fn execute(
        &self,
        task: &dyn CacheableTask,
        state: &mut dyn TaskState,
    ) -> Result<ExecutionResult>;
}

//! The caching decision engine.
//!
//! [`CachingTaskExecuter`] decorates a delegate [`TaskExecuter`]: per
//! execution it reads the task's cacheability, consults the store, and
//! either replays the outputs from a hit or runs the delegate and — on
//! success only — packs and stores the outputs. All calls are blocking
//! on the worker thread running the task; the engine holds no mutable
//! state, so one instance serves concurrent workers.

use std::path::PathBuf;
use std::sync::Arc;

use bake_cache::store::{CacheStore, LocalDirectoryStore};
use bake_cache::{pack, unpack};

use crate::Result;
use crate::task::{CacheKeyCalculator, CacheableTask, ExecutionResult, TaskExecuter, TaskState};

/// Reason reported to the task state on a replay hit.
pub const REASON_CACHED: &str = "CACHED";

/// Process-wide cache configuration.
///
/// Built once at build start and threaded into the engine; read-only
/// thereafter.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether task output caching is on for this build
    pub enabled: bool,
    /// Directory backing the local store
    pub dir: PathBuf,
}

impl CacheConfig {
    /// Caching on, backed by the given directory.
    #[must_use]
    pub fn enabled(dir: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            dir: dir.into(),
        }
    }

    /// Caching off for the whole build.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::new(),
        }
    }
}

/// Task executer decorator that replays cached outputs when it can.
pub struct CachingTaskExecuter {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    keys: Arc<dyn CacheKeyCalculator>,
    delegate: Arc<dyn TaskExecuter>,
}

impl CachingTaskExecuter {
    /// Create an engine over an explicit store backend.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        keys: Arc<dyn CacheKeyCalculator>,
        delegate: Arc<dyn TaskExecuter>,
    ) -> Self {
        Self {
            config,
            store,
            keys,
            delegate,
        }
    }

    /// Create an engine backed by the local directory named in the
    /// configuration.
    #[must_use]
    pub fn with_local_store(
        config: CacheConfig,
        keys: Arc<dyn CacheKeyCalculator>,
        delegate: Arc<dyn TaskExecuter>,
    ) -> Self {
        let store = Arc::new(LocalDirectoryStore::new(config.dir.clone()));
        Self::new(config, store, keys, delegate)
    }
}

impl TaskExecuter for CachingTaskExecuter {
    fn execute(
        &self,
        task: &dyn CacheableTask,
        state: &mut dyn TaskState,
    ) -> Result<ExecutionResult> {
        if !self.config.enabled {
            return self.delegate.execute(task, state);
        }
        // `cache_allowed` short-circuits everything, including key
        // computation; `cache_enabled` is only read when allowed.
        if !task.cache_allowed() {
            tracing::debug!(task = %task.name(), "Caching not allowed; executing");
            return self.delegate.execute(task, state);
        }
        if !task.cache_enabled() {
            tracing::debug!(task = %task.name(), "Cache predicate is false; executing");
            return self.delegate.execute(task, state);
        }

        let key = self.keys.calculate_cache_key(task)?;
        let outputs = task.outputs();

        if let Some(entry) = self.store.get(&key)? {
            let restored = unpack(&outputs, &entry)?;
            tracing::info!(
                task = %task.name(),
                key = %key,
                files = restored,
                "Replayed task outputs from cache"
            );
            state.up_to_date(REASON_CACHED);
            return Ok(ExecutionResult::success());
        }

        tracing::debug!(task = %task.name(), key = %key, "Cache miss; executing");
        let result = self.delegate.execute(task, state)?;
        if let Some(failure) = result.failure() {
            tracing::debug!(
                task = %task.name(),
                failure = %failure,
                "Not caching outputs of a failed execution"
            );
            return Ok(result);
        }

        let entry = pack(&outputs)?;
        self.store.put(&key, &entry)?;
        tracing::debug!(
            task = %task.name(),
            key = %key,
            bytes = entry.len(),
            "Stored task outputs"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::task::TaskFailure;
    use bake_cache::{CacheKey, PackedEntry};
    use bake_outputs::OutputDeclaration;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    // ==========================================================================
    // Collaborator doubles
    // ==========================================================================

    struct StubTask {
        name: String,
        allowed: bool,
        enabled: bool,
        outputs: OutputDeclaration,
    }

    impl StubTask {
        fn new(output: &Path) -> Self {
            Self {
                name: "compile".to_string(),
                allowed: true,
                enabled: true,
                outputs: OutputDeclaration::File(output.to_path_buf()),
            }
        }
    }

    impl CacheableTask for StubTask {
        fn name(&self) -> &str {
            &self.name
        }
        fn cache_allowed(&self) -> bool {
            self.allowed
        }
        fn cache_enabled(&self) -> bool {
            self.enabled
        }
        fn outputs(&self) -> OutputDeclaration {
            self.outputs.clone()
        }
    }

    #[derive(Default)]
    struct FixedKeys {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CacheKeyCalculator for FixedKeys {
        fn calculate_cache_key(&self, task: &dyn CacheableTask) -> Result<CacheKey> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::key_calculation(task.name(), "inputs unavailable"));
            }
            Ok(CacheKey::from_fingerprint(task.name().as_bytes()))
        }
    }

    /// Delegate that writes `content` to `output` when executed.
    struct WritingExecuter {
        calls: AtomicUsize,
        output: PathBuf,
        content: Vec<u8>,
        failure: Option<TaskFailure>,
    }

    impl WritingExecuter {
        fn new(output: &Path, content: &[u8]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                output: output.to_path_buf(),
                content: content.to_vec(),
                failure: None,
            }
        }

        fn failing(output: &Path) -> Self {
            Self {
                failure: Some(TaskFailure::new("compile", "exit code 1")),
                ..Self::new(output, b"broken")
            }
        }
    }

    impl TaskExecuter for WritingExecuter {
        fn execute(
            &self,
            _task: &dyn CacheableTask,
            _state: &mut dyn TaskState,
        ) -> Result<ExecutionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            fs::write(&self.output, &self.content).unwrap();
            Ok(self
                .failure
                .clone()
                .map_or_else(ExecutionResult::success, ExecutionResult::failed))
        }
    }

    #[derive(Default)]
    struct CountingStore {
        entries: Mutex<HashMap<String, PackedEntry>>,
        gets: AtomicUsize,
        puts: AtomicUsize,
    }

    impl CacheStore for CountingStore {
        fn get(&self, key: &CacheKey) -> bake_cache::Result<Option<PackedEntry>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.entries.lock().unwrap().get(key.as_str()).cloned())
        }

        fn put(&self, key: &CacheKey, entry: &PackedEntry) -> bake_cache::Result<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            self.entries
                .lock()
                .unwrap()
                .insert(key.as_str().to_string(), entry.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingState {
        reasons: Vec<String>,
    }

    impl TaskState for RecordingState {
        fn up_to_date(&mut self, reason: &str) {
            self.reasons.push(reason.to_string());
        }
    }

    struct Fixture {
        _tmp: TempDir,
        output: PathBuf,
        store: Arc<CountingStore>,
        keys: Arc<FixedKeys>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let output = tmp.path().join("out.txt");
            Self {
                _tmp: tmp,
                output,
                store: Arc::new(CountingStore::default()),
                keys: Arc::new(FixedKeys::default()),
            }
        }

        fn engine(&self, delegate: Arc<dyn TaskExecuter>) -> CachingTaskExecuter {
            CachingTaskExecuter::new(
                CacheConfig::enabled("/unused"),
                self.store.clone(),
                self.keys.clone(),
                delegate,
            )
        }
    }

    // ==========================================================================
    // Routing: allowed/enabled/config flags
    // ==========================================================================

    #[test]
    fn disallowed_task_executes_without_any_cache_interaction() {
        let fx = Fixture::new();
        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = fx.engine(delegate.clone());
        let mut task = StubTask::new(&fx.output);
        task.allowed = false;
        let mut state = RecordingState::default();

        let result = engine.execute(&task, &mut state).unwrap();

        assert!(result.failure().is_none());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.keys.calls.load(Ordering::SeqCst), 0, "no key computed");
        assert_eq!(fx.store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 0);
        assert!(state.reasons.is_empty());
    }

    #[test]
    fn disabled_predicate_executes_without_store_access() {
        let fx = Fixture::new();
        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = fx.engine(delegate.clone());
        let mut task = StubTask::new(&fx.output);
        task.enabled = false;
        let mut state = RecordingState::default();

        engine.execute(&task, &mut state).unwrap();

        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disabled_predicate_ignores_an_existing_entry_under_the_key() {
        let fx = Fixture::new();
        // First run with caching on populates the store.
        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = fx.engine(delegate.clone());
        let task = StubTask::new(&fx.output);
        engine.execute(&task, &mut RecordingState::default()).unwrap();
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 1);

        // Rerun with cacheIf { false }: always executes, store untouched.
        let mut task = StubTask::new(&fx.output);
        task.enabled = false;
        let gets_before = fx.store.gets.load(Ordering::SeqCst);
        engine.execute(&task, &mut RecordingState::default()).unwrap();

        assert_eq!(delegate.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.store.gets.load(Ordering::SeqCst), gets_before);
    }

    #[test]
    fn build_wide_disable_skips_all_cache_interaction() {
        let fx = Fixture::new();
        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = CachingTaskExecuter::new(
            CacheConfig::disabled(),
            fx.store.clone(),
            fx.keys.clone(),
            delegate.clone(),
        );
        let task = StubTask::new(&fx.output);

        engine.execute(&task, &mut RecordingState::default()).unwrap();

        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.keys.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store.gets.load(Ordering::SeqCst), 0);
    }

    // ==========================================================================
    // Miss / hit lifecycle
    // ==========================================================================

    #[test]
    fn miss_executes_once_and_stores_one_entry() {
        let fx = Fixture::new();
        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = fx.engine(delegate.clone());
        let task = StubTask::new(&fx.output);
        let mut state = RecordingState::default();

        let result = engine.execute(&task, &mut state).unwrap();

        assert!(result.failure().is_none());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 1);
        assert!(state.reasons.is_empty(), "a miss is not up-to-date");
    }

    #[test]
    fn hit_replays_outputs_and_never_invokes_the_delegate() {
        let fx = Fixture::new();
        let task = StubTask::new(&fx.output);

        // Populate the store with one real execution.
        let first = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        fx.engine(first).execute(&task, &mut RecordingState::default()).unwrap();

        // Outputs vanish (clean checkout); rerun with the same key.
        fs::remove_file(&fx.output).unwrap();
        let second = Arc::new(WritingExecuter::new(&fx.output, b"MUST NOT RUN"));
        let engine = fx.engine(second.clone());
        let mut state = RecordingState::default();
        let result = engine.execute(&task, &mut state).unwrap();

        assert!(result.failure().is_none());
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.reasons, vec![REASON_CACHED.to_string()]);
        assert_eq!(fs::read(&fx.output).unwrap(), b"built");
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 1, "no second put");
    }

    #[test]
    fn failed_execution_is_never_stored() {
        let fx = Fixture::new();
        let delegate = Arc::new(WritingExecuter::failing(&fx.output));
        let engine = fx.engine(delegate.clone());
        let task = StubTask::new(&fx.output);

        let result = engine.execute(&task, &mut RecordingState::default()).unwrap();

        assert!(result.failure().is_some());
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.store.gets.load(Ordering::SeqCst), 1, "miss was checked");
        assert_eq!(fx.store.puts.load(Ordering::SeqCst), 0);
    }

    // ==========================================================================
    // Cache-layer failures stay distinct from task failures
    // ==========================================================================

    #[test]
    fn key_calculation_failure_aborts_before_the_delegate_runs() {
        let fx = Fixture::new();
        let keys = Arc::new(FixedKeys {
            fail: true,
            ..FixedKeys::default()
        });
        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = CachingTaskExecuter::new(
            CacheConfig::enabled("/unused"),
            fx.store.clone(),
            keys,
            delegate.clone(),
        );
        let task = StubTask::new(&fx.output);

        let err = engine
            .execute(&task, &mut RecordingState::default())
            .unwrap_err();

        assert!(matches!(err, Error::KeyCalculation { .. }), "{err}");
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fx.store.gets.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn corrupt_entry_surfaces_as_a_cache_layer_error() {
        let fx = Fixture::new();
        let task = StubTask::new(&fx.output);
        let key = fx
            .keys
            .calculate_cache_key(&task)
            .unwrap();
        fx.store
            .put(&key, &PackedEntry::from_bytes(vec![0xde, 0xad]))
            .unwrap();

        let delegate = Arc::new(WritingExecuter::new(&fx.output, b"built"));
        let engine = fx.engine(delegate.clone());
        let err = engine
            .execute(&task, &mut RecordingState::default())
            .unwrap_err();

        assert!(matches!(err, Error::Cache(_)), "{err}");
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 0);
    }

    // ==========================================================================
    // End-to-end over the local store
    // ==========================================================================

    #[test]
    fn rerun_with_identical_inputs_replays_from_the_local_store() {
        let tmp = TempDir::new().unwrap();
        let output = tmp.path().join("work/out.bin");
        fs::create_dir_all(output.parent().unwrap()).unwrap();
        let config = CacheConfig::enabled(tmp.path().join("cache"));
        let keys = Arc::new(FixedKeys::default());
        let task = StubTask::new(&output);

        let first = Arc::new(WritingExecuter::new(&output, b"payload"));
        let engine =
            CachingTaskExecuter::with_local_store(config.clone(), keys.clone(), first.clone());
        engine.execute(&task, &mut RecordingState::default()).unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);

        // Fresh engine, as a new build process would construct.
        fs::remove_file(&output).unwrap();
        let second = Arc::new(WritingExecuter::new(&output, b"MUST NOT RUN"));
        let engine = CachingTaskExecuter::with_local_store(config, keys, second.clone());
        let mut state = RecordingState::default();
        engine.execute(&task, &mut state).unwrap();

        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(state.reasons, vec![REASON_CACHED.to_string()]);
        assert_eq!(fs::read(&output).unwrap(), b"payload");
    }
}

//! Single initialization of the watch engine.
//!
//! The engine for the current platform is located, loaded and version
//! checked exactly once per process. Every caller after the first observes
//! the recorded outcome: the same [`FileEvents`] context on success, the same
//! error on failure. No second load is ever attempted.
//!
//! The context is an explicit value handed to each [`FileWatcher`], so a
//! watcher cannot exist before initialization has succeeded.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::FILE_EVENTS_VERSION;
use crate::config::WatcherSettings;
use crate::engine::{NotifyEngine, WatchEngine};
use crate::error::{FileEventsError, FileEventsResult};
use crate::event::WatchEventHandler;
use crate::platform::{EngineArtifact, Platform};
use crate::watcher::FileWatcher;

/// Locates and loads the engine for an artifact.
pub trait EngineLoader: Send + Sync {
    fn load(&self, artifact: &EngineArtifact) -> FileEventsResult<Arc<dyn WatchEngine>>;
}

impl<F> EngineLoader for F
where
    F: Fn(&EngineArtifact) -> FileEventsResult<Arc<dyn WatchEngine>> + Send + Sync,
{
    fn load(&self, artifact: &EngineArtifact) -> FileEventsResult<Arc<dyn WatchEngine>> {
        self(artifact)
    }
}

/// Loads the engine compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLoader;

impl EngineLoader for BuiltinLoader {
    fn load(&self, artifact: &EngineArtifact) -> FileEventsResult<Arc<dyn WatchEngine>> {
        crate::debug_event!("bridge", "selecting built-in engine", "{artifact}");
        Ok(Arc::new(NotifyEngine::new()))
    }
}

struct BridgeContext {
    engine: Arc<dyn WatchEngine>,
    artifact: EngineArtifact,
}

/// Handle to the initialized file events integration. Cheap to clone.
#[derive(Clone)]
pub struct FileEvents {
    inner: Arc<BridgeContext>,
}

impl std::fmt::Debug for FileEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEvents")
            .field("engine", &self.engine_name())
            .field("version", &self.version())
            .field("artifact", &self.inner.artifact)
            .finish()
    }
}

static PROCESS_GUARD: OnceLock<BridgeGuard> = OnceLock::new();

fn process_guard() -> &'static BridgeGuard {
    PROCESS_GUARD.get_or_init(BridgeGuard::new)
}

impl FileEvents {
    /// Initialize the integration with the built-in engine.
    ///
    /// # Errors
    /// - `Unavailable` when no engine exists for this platform
    /// - `Bridge` / `VersionMismatch` when the engine fails to load or verify
    pub fn init() -> FileEventsResult<FileEvents> {
        Self::init_with(&BuiltinLoader)
    }

    /// Initialize the integration with a custom loader.
    ///
    /// The loader is only consulted by the first initialization in the
    /// process; later calls return the recorded outcome.
    pub fn init_with(loader: &dyn EngineLoader) -> FileEventsResult<FileEvents> {
        process_guard().init(Platform::current(), loader)
    }

    /// Whether the process-wide initialization has succeeded.
    pub fn is_initialized() -> bool {
        PROCESS_GUARD
            .get()
            .is_some_and(BridgeGuard::is_initialized)
    }

    /// The protocol version reported by the loaded engine.
    pub fn version(&self) -> &str {
        self.inner.engine.version()
    }

    pub fn engine_name(&self) -> &str {
        self.inner.engine.name()
    }

    pub fn artifact(&self) -> &EngineArtifact {
        &self.inner.artifact
    }

    /// Always `true`. A `FileEvents` only exists after a successful load
    /// and the engine is never unloaded, so this is a constant kept for
    /// callers that check liveness.
    pub fn is_loaded(&self) -> bool {
        true
    }

    pub(crate) fn engine(&self) -> Arc<dyn WatchEngine> {
        Arc::clone(&self.inner.engine)
    }

    /// Create a watcher reporting to `handler`. Call
    /// [`FileWatcher::initialize`] before using it.
    pub fn new_watcher(
        &self,
        settings: WatcherSettings,
        handler: impl WatchEventHandler,
    ) -> FileWatcher {
        FileWatcher::new(self, settings, handler)
    }
}

/// Serializes initialization and records its single outcome.
pub struct BridgeGuard {
    outcome: Mutex<Option<FileEventsResult<FileEvents>>>,
}

impl BridgeGuard {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
        }
    }

    /// Run the load-and-verify sequence once; return its outcome forever after.
    pub fn init(
        &self,
        platform: Platform,
        loader: &dyn EngineLoader,
    ) -> FileEventsResult<FileEvents> {
        let mut outcome = self.outcome.lock();
        if let Some(recorded) = outcome.as_ref() {
            crate::debug_event!("bridge", "already initialized");
            return recorded.clone();
        }

        let result = load(platform, loader);
        match &result {
            Ok(events) => crate::log_event!(
                "bridge",
                "initialized",
                "{} engine {} for {}",
                events.engine_name(),
                events.version(),
                events.artifact()
            ),
            Err(e) => tracing::error!("[bridge] initialization failed: {e}"),
        }
        *outcome = Some(result.clone());
        result
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.outcome.lock().as_ref(), Some(Ok(_)))
    }
}

impl Default for BridgeGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn load(platform: Platform, loader: &dyn EngineLoader) -> FileEventsResult<FileEvents> {
    let artifact = platform.artifact()?;

    let engine = catch_unwind(AssertUnwindSafe(|| loader.load(&artifact)))
        .map_err(|_| FileEventsError::bridge("Failed to initialise native integration."))??;

    let actual = engine.version();
    if actual != FILE_EVENTS_VERSION {
        return Err(FileEventsError::VersionMismatch {
            expected: FILE_EVENTS_VERSION.to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(FileEvents {
        inner: Arc::new(BridgeContext { engine, artifact }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::platform::{Arch, Libc, Os};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn linux() -> Platform {
        Platform {
            os: Os::Linux,
            arch: Arch::X86_64,
            libc: Some(Libc::Gnu),
        }
    }

    struct CountingLoader {
        loads: AtomicUsize,
        engine: MemoryEngine,
    }

    impl CountingLoader {
        fn new(engine: MemoryEngine) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                engine,
            }
        }
    }

    impl EngineLoader for CountingLoader {
        fn load(&self, _artifact: &EngineArtifact) -> FileEventsResult<Arc<dyn WatchEngine>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(self.engine.clone()))
        }
    }

    #[test]
    fn test_second_init_returns_same_context_without_loading() {
        let guard = BridgeGuard::new();
        let loader = CountingLoader::new(MemoryEngine::new());

        let first = guard.init(linux(), &loader).unwrap();
        let second = guard.init(linux(), &loader).unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
        assert!(guard.is_initialized());
        assert_eq!(first.artifact().platform_name, "x86_64-linux-gnu");
    }

    #[test]
    fn test_version_mismatch_is_permanent() {
        let guard = BridgeGuard::new();
        let loader = CountingLoader::new(MemoryEngine::builder().version("0.0.1").build());

        let err = guard.init(linux(), &loader).unwrap_err();
        assert!(matches!(
            err,
            FileEventsError::VersionMismatch { ref actual, .. } if actual == "0.0.1"
        ));

        let again = guard.init(linux(), &loader).unwrap_err();
        assert_eq!(err, again);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(!guard.is_initialized());
    }

    #[test]
    fn test_unsupported_platform_is_unavailable() {
        let guard = BridgeGuard::new();
        let loader = CountingLoader::new(MemoryEngine::new());
        let platform = Platform {
            os: Os::Other("haiku"),
            arch: Arch::X86_64,
            libc: None,
        };

        let err = guard.init(platform, &loader).unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Unavailable);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_loader_is_a_bridge_failure() {
        let guard = BridgeGuard::new();
        let loader = |_: &EngineArtifact| -> FileEventsResult<Arc<dyn WatchEngine>> {
            panic!("corrupt library")
        };

        let err = guard.init(linux(), &loader).unwrap_err();
        assert_eq!(
            err,
            FileEventsError::bridge("Failed to initialise native integration.")
        );
    }

    #[test]
    fn test_concurrent_init_loads_once() {
        let guard = Arc::new(BridgeGuard::new());
        let loader = Arc::new(CountingLoader::new(MemoryEngine::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let loader = Arc::clone(&loader);
                std::thread::spawn(move || guard.init(linux(), loader.as_ref()).is_ok())
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }
}

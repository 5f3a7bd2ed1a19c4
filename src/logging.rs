//! Unified logging for the library and the watch engines.
//!
//! Provides compact timestamped logging with per-module level configuration.
//! Supports `RUST_LOG` environment variable for runtime overrides.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"  # quiet by default
//!
//! [logging.modules]
//! "file_events::native" = "debug"  # show engine diagnostics
//! ```
//!
//! # Engine logging
//!
//! Engines report diagnostic lines through [`native_log`]. They ask for the
//! effective minimum level first (see [`LogLevelCache`]) so suppressed
//! messages are never formatted.

use std::sync::Once;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingConfig;

static INIT: Once = Once::new();

/// Target used for lines written by watch engines.
pub const NATIVE_TARGET: &str = "file_events::native";

/// How often engines re-read the effective level.
pub const LOG_LEVEL_CHECK_INTERVAL: Duration = Duration::from_millis(1000);

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Initialize logging with configuration.
///
/// Call once at startup. Safe to call multiple times (only first call takes effect).
/// The `RUST_LOG` environment variable takes precedence over config settings.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            let mut filter_str = config.default.clone();
            for (module, level) in &config.modules {
                filter_str.push_str(&format!(",{module}={level}"));
            }
            EnvFilter::new(&filter_str)
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_filter(filter);

        tracing_subscriber::registry().with(fmt_layer).init();
    });
}

/// Initialize logging with default configuration (`warn`).
pub fn init() {
    init_with_config(&LoggingConfig::default());
}

/// Log levels understood by watch engines, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NativeLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl NativeLogLevel {
    /// Whether a message at `level` passes this minimum.
    pub fn allows(self, level: NativeLogLevel) -> bool {
        self != NativeLogLevel::Off && level != NativeLogLevel::Off && level >= self
    }
}

impl From<LevelFilter> for NativeLogLevel {
    fn from(filter: LevelFilter) -> Self {
        match filter.into_level() {
            None => NativeLogLevel::Off,
            Some(Level::TRACE) => NativeLogLevel::Trace,
            Some(Level::DEBUG) => NativeLogLevel::Debug,
            Some(Level::INFO) => NativeLogLevel::Info,
            Some(Level::WARN) => NativeLogLevel::Warn,
            Some(_) => NativeLogLevel::Error,
        }
    }
}

/// The minimum level currently enabled by the active subscriber.
pub fn effective_level() -> NativeLogLevel {
    LevelFilter::current().into()
}

/// Forward a diagnostic line from an engine.
pub fn native_log(level: NativeLogLevel, message: &str) {
    match level {
        NativeLogLevel::Trace => tracing::trace!(target: NATIVE_TARGET, "{message}"),
        NativeLogLevel::Debug => tracing::debug!(target: NATIVE_TARGET, "{message}"),
        NativeLogLevel::Info => tracing::info!(target: NATIVE_TARGET, "{message}"),
        NativeLogLevel::Warn => tracing::warn!(target: NATIVE_TARGET, "{message}"),
        NativeLogLevel::Error => tracing::error!(target: NATIVE_TARGET, "{message}"),
        NativeLogLevel::Off => {}
    }
}

/// Caches the effective level, re-reading it at most once per interval.
pub struct LogLevelCache {
    source: fn() -> NativeLogLevel,
    interval: Duration,
    cached: Mutex<(NativeLogLevel, Instant)>,
}

impl LogLevelCache {
    pub fn new() -> Self {
        Self::with_source(LOG_LEVEL_CHECK_INTERVAL, effective_level)
    }

    pub fn with_source(interval: Duration, source: fn() -> NativeLogLevel) -> Self {
        Self {
            source,
            interval,
            cached: Mutex::new((source(), Instant::now())),
        }
    }

    /// The cached minimum level, refreshed if the interval has passed.
    pub fn level(&self) -> NativeLogLevel {
        let mut cached = self.cached.lock();
        if cached.1.elapsed() >= self.interval {
            *cached = ((self.source)(), Instant::now());
        }
        cached.0
    }

    /// Whether a message at `level` would be emitted.
    pub fn enabled(&self, level: NativeLogLevel) -> bool {
        self.level().allows(level)
    }

    /// Format and forward a message only if it would be emitted.
    pub fn log(&self, level: NativeLogLevel, message: impl FnOnce() -> String) {
        if self.enabled(level) {
            native_log(level, &message());
        }
    }
}

impl Default for LogLevelCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Log an event with component context.
///
/// # Examples
/// ```ignore
/// log_event!("watcher", "started");
/// log_event!("watcher", "watching", "{} paths", count);
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr) => {
        tracing::info!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

/// Debug-only event logging.
///
/// # Examples
/// ```ignore
/// debug_event!("dispatch", "delivered", "{event:?}");
/// ```
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_level_ordering() {
        assert!(NativeLogLevel::Info.allows(NativeLogLevel::Warn));
        assert!(NativeLogLevel::Info.allows(NativeLogLevel::Info));
        assert!(!NativeLogLevel::Info.allows(NativeLogLevel::Debug));
        assert!(!NativeLogLevel::Off.allows(NativeLogLevel::Error));
        assert!(!NativeLogLevel::Trace.allows(NativeLogLevel::Off));
    }

    #[test]
    fn test_level_filter_conversion() {
        assert_eq!(NativeLogLevel::from(LevelFilter::OFF), NativeLogLevel::Off);
        assert_eq!(NativeLogLevel::from(LevelFilter::TRACE), NativeLogLevel::Trace);
        assert_eq!(NativeLogLevel::from(LevelFilter::WARN), NativeLogLevel::Warn);
        assert_eq!(NativeLogLevel::from(LevelFilter::ERROR), NativeLogLevel::Error);
    }

    static READS: AtomicUsize = AtomicUsize::new(0);

    fn counting_source() -> NativeLogLevel {
        READS.fetch_add(1, Ordering::SeqCst);
        NativeLogLevel::Warn
    }

    #[test]
    fn test_cache_rereads_after_interval() {
        let cache = LogLevelCache::with_source(Duration::from_millis(30), counting_source);
        let initial = READS.load(Ordering::SeqCst);

        assert_eq!(cache.level(), NativeLogLevel::Warn);
        assert_eq!(cache.level(), NativeLogLevel::Warn);
        assert_eq!(READS.load(Ordering::SeqCst), initial);

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.enabled(NativeLogLevel::Error));
        assert_eq!(READS.load(Ordering::SeqCst), initial + 1);
    }

    #[test]
    fn test_suppressed_messages_are_not_formatted() {
        fn off() -> NativeLogLevel {
            NativeLogLevel::Off
        }
        let cache = LogLevelCache::with_source(Duration::from_secs(60), off);
        cache.log(NativeLogLevel::Error, || {
            panic!("message should not be formatted")
        });
    }
}

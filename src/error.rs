//! Error types for the file events integration.
//!
//! Every failure surfaced to a caller falls into exactly one [`ErrorCategory`].
//! The distinction matters to callers: an unavailable integration will never
//! work on this machine, while insufficient resources may be fixed by watching
//! fewer paths.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which operating-system limit was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLimit {
    /// Too few watch instances (e.g. `fs.inotify.max_user_instances`).
    /// Raised when a watcher starts; watching fewer paths does not help.
    Instances,
    /// Too few watch slots per instance (e.g. `fs.inotify.max_user_watches`).
    /// Raised when adding paths; retrying with fewer paths may succeed.
    Watches,
}

impl std::fmt::Display for ResourceLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceLimit::Instances => f.write_str("instance limit"),
            ResourceLimit::Watches => f.write_str("watches limit"),
        }
    }
}

/// Classification of a [`FileEventsError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The integration does not exist for this platform. Fall back to polling.
    Unavailable,
    /// The native layer failed to load, verify or perform an operation.
    Bridge,
    /// A watch could not be honored due to OS resource limits.
    InsufficientResources,
    /// A blocking wait ran out of time.
    Timeout,
    /// A blocking wait was interrupted.
    Interrupted,
    /// The API was used incorrectly.
    Usage,
}

/// Errors from file events operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileEventsError {
    #[error("{reason}")]
    Unavailable { reason: String },

    #[error("{reason}")]
    Bridge { reason: String },

    #[error("Unexpected file events library version loaded. Expected {expected}, was {actual}.")]
    VersionMismatch { expected: String, actual: String },

    #[error("Couldn't watch {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    #[error("Insufficient resources for watching ({limit}): {reason}")]
    InsufficientResources { limit: ResourceLimit, reason: String },

    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout {
        operation: &'static str,
        waited: Duration,
    },

    #[error("Interrupted while waiting for {operation}")]
    Interrupted { operation: &'static str },

    #[error("Cannot {operation} while watcher is {state}")]
    IllegalState {
        operation: &'static str,
        state: String,
    },

    #[error("Path must be absolute: {path}")]
    RelativePath { path: PathBuf },
}

impl FileEventsError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        FileEventsError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn bridge(reason: impl Into<String>) -> Self {
        FileEventsError::Bridge {
            reason: reason.into(),
        }
    }

    pub fn instance_limit(reason: impl Into<String>) -> Self {
        FileEventsError::InsufficientResources {
            limit: ResourceLimit::Instances,
            reason: reason.into(),
        }
    }

    pub fn watches_limit(reason: impl Into<String>) -> Self {
        FileEventsError::InsufficientResources {
            limit: ResourceLimit::Watches,
            reason: reason.into(),
        }
    }

    /// The single taxonomy entry this failure belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FileEventsError::Unavailable { .. } => ErrorCategory::Unavailable,
            FileEventsError::Bridge { .. }
            | FileEventsError::VersionMismatch { .. }
            | FileEventsError::WatchFailed { .. } => ErrorCategory::Bridge,
            FileEventsError::InsufficientResources { .. } => ErrorCategory::InsufficientResources,
            FileEventsError::Timeout { .. } => ErrorCategory::Timeout,
            FileEventsError::Interrupted { .. } => ErrorCategory::Interrupted,
            FileEventsError::IllegalState { .. } | FileEventsError::RelativePath { .. } => {
                ErrorCategory::Usage
            }
        }
    }

    /// True for native failures, including resource exhaustion which is a
    /// specialization of a bridge failure.
    pub fn is_bridge_failure(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Bridge | ErrorCategory::InsufficientResources
        )
    }

    /// The exhausted limit, if this is a resource failure.
    pub fn resource_limit(&self) -> Option<ResourceLimit> {
        match self {
            FileEventsError::InsufficientResources { limit, .. } => Some(*limit),
            _ => None,
        }
    }

    /// Only resource exhaustion can succeed when retried with fewer paths.
    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::InsufficientResources
    }
}

pub type FileEventsResult<T> = Result<T, FileEventsError>;

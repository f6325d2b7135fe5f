//! Error types for sensord-core.
//!
//! # Error Handling Policy
//!
//! Errors fall into three groups, each handled differently:
//!
//! | Error | Raised by | Handling |
//! |-------|-----------|----------|
//! | [`Error::AlreadyRunning`], [`Error::NotRunning`], [`Error::InTransition`] | `start`/`stop` | Caller misuse; returned immediately, never retried |
//! | [`Error::ResourceUnavailable`], [`Error::WorkerSpawn`], [`Error::WorkerStillRunning`] | `start` | Returned to the caller; the service stays `Stopped` with nothing held |
//! | [`Error::WorkerShutdownTimeout`], [`Error::WorkerPanicked`] | worker `quit` | Logged by `stop`, which proceeds and releases the wake-lock anyway |
//! | [`Error::AlreadyActive`], [`Error::Scan`] | [`crate::ScanSession`] | Local to the scan session |
//!
//! Adapter-unavailable conditions are not errors at all: they are reported as
//! [`crate::ScanAvailability::Degraded`] and collection continues without
//! the scan source.
//!
//! Failures while handling a single notification (a malformed payload, a
//! sink that rejects an event) never surface here. The worker logs them,
//! counts them in its [`crate::WorkerSummary`] and moves on.

use std::time::Duration;

use thiserror::Error;

use sensord_types::ServiceState;

use crate::scan::ScanError;
use crate::wakelock::WakeLockError;

/// Errors returned by the collector lifecycle, worker and scan session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `start` was called while the service was not stopped.
    #[error("Collector is already running")]
    AlreadyRunning,

    /// `stop` was called while the service was stopped.
    #[error("Collector is not running")]
    NotRunning,

    /// `stop` was called while a start or stop was still in progress.
    #[error("Collector is {0}; try again once the transition completes")]
    InTransition(ServiceState),

    /// The wake-lock could not be acquired.
    #[error("Wake-lock unavailable: {0}")]
    ResourceUnavailable(#[source] WakeLockError),

    /// The worker thread could not be spawned.
    #[error("Failed to spawn collection worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The worker did not confirm termination within the allowed time.
    #[error("Collection worker did not exit within {timeout:?}")]
    WorkerShutdownTimeout {
        /// How long the caller waited.
        timeout: Duration,
    },

    /// A worker abandoned by an earlier `stop` has still not exited, so no
    /// new worker may be spawned yet.
    #[error("Previous collection worker is still running")]
    WorkerStillRunning,

    /// The worker thread panicked before confirming termination.
    #[error("Collection worker panicked")]
    WorkerPanicked,

    /// `ScanSession::start` was called on an active session.
    #[error("Scan session is already active")]
    AlreadyActive,

    /// The scan driver reported an error.
    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),
}

impl Error {
    /// Whether this error indicates misuse of the lifecycle API by the caller.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Error::AlreadyRunning | Error::NotRunning | Error::InTransition(_) | Error::AlreadyActive
        )
    }
}

/// Result type alias using sensord-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

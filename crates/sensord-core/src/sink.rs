//! The downstream event sink contract.
//!
//! The collector only needs a narrow "submit event" contract from whatever
//! persists or streams events. Submissions are fire-and-forget from the
//! worker's point of view: a failed submission is logged and counted, never
//! retried.

use std::io;

use thiserror::Error;

use sensord_types::Event;

/// Errors reported by an [`EventSink`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// Writing the event failed.
    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    /// The event could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialize(String),

    /// The sink has no open session.
    #[error("sink is not open")]
    Closed,

    /// The sink refused the event.
    #[error("sink rejected event: {0}")]
    Rejected(String),
}

/// Receives normalized events from the collection worker.
///
/// All methods are called from the worker thread, one at a time, in this
/// order: [`begin`](EventSink::begin) once, [`submit`](EventSink::submit) per
/// event, [`end`](EventSink::end) once.
pub trait EventSink: Send + Sync {
    /// Open a collection session.
    ///
    /// `overwrite` is the overwrite policy captured when the service started;
    /// sinks that persist events decide whether to replace or extend existing
    /// output based on it.
    fn begin(&self, overwrite: bool) -> Result<(), SinkError> {
        let _ = overwrite;
        Ok(())
    }

    /// Accept one event. Ownership passes to the sink.
    fn submit(&self, event: Event) -> Result<(), SinkError>;

    /// Close the collection session.
    fn end(&self) {}
}

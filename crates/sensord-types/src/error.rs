//! Error types for payload validation in sensord-types.

use thiserror::Error;

use crate::types::SourceKind;

/// Errors raised when a raw notification cannot be turned into an event.
///
/// These are per-notification failures: the collector logs them and moves
/// on to the next notification.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PayloadError {
    /// A scan hit arrived without a device address.
    #[error("scan hit has an empty device address")]
    EmptyAddress,

    /// A textual payload field could not be parsed.
    #[error("invalid {kind:?} payload field '{field}': {value:?}")]
    InvalidField {
        /// Source the payload came from.
        kind: SourceKind,
        /// Name of the offending field.
        field: &'static str,
        /// The raw text that failed to parse.
        value: String,
    },
}

/// Result type alias using sensord-types' PayloadError type.
pub type PayloadResult<T> = std::result::Result<T, PayloadError>;

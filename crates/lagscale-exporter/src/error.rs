//! Error types for lag acquisition.

use thiserror::Error;

/// Result type alias for exporter operations.
pub type ExporterResult<T> = Result<T, ExporterError>;

/// Errors that can occur while reading the metrics source.
///
/// `Unreachable` is transient: a monitor tick that hits it skips the tick
/// and retries on the next one. `InvalidUrl` is structural and surfaces to
/// the caller that configured the source.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("invalid metrics url: {0}")]
    InvalidUrl(String),

    #[error("metrics source unreachable: {0}")]
    Unreachable(String),

    #[error("malformed metrics response: {0}")]
    MalformedResponse(String),
}

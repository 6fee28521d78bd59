//! Error types for the reporting pipeline.
//!
//! Failures internal to tracing and reporting are never surfaced to
//! instrumented application code; these types only appear on the operator
//! facing surfaces (`force_flush`, `shutdown`) and in internal diagnostics.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while delivering batches to the remote collector.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// The collector rejected the process credential or session token.
    #[error("authentication rejected by collector: {0}")]
    Unauthenticated(String),

    /// The HTTP request could not be completed, including timeouts.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The collector answered with a non-success status.
    #[error("collector returned status {status}")]
    Collector {
        /// HTTP status code of the response.
        status: u16,
    },

    /// The report payload could not be serialized.
    #[error("failed to serialize report payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Other types of failures not covered by the variants above.
    #[error("{0}")]
    Other(String),
}

/// Errors returned by the batch reporter's control surface.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReporterError {
    /// The reporter has already been shut down.
    #[error("reporter already shut down")]
    AlreadyShutdown,

    /// The reporter worker is gone or its queue rejected the request.
    #[error("reporter worker is unavailable")]
    ChannelClosed,

    /// A flush or shutdown request did not complete within its deadline.
    #[error("flush timed out after {0:?}")]
    FlushTimedOut(Duration),

    /// Delivery failed; the affected batches are retried or dropped by the
    /// worker, this only reports the outcome of the current cycle.
    #[error(transparent)]
    Export(#[from] ExportError),
}

//! Error types shared across the crate.
//!
//! Configuration mistakes fail fast with [`ConfigError`]; everything on the
//! per-request hot path degrades instead of raising. Export and shutdown
//! failures are absorbed by the writer and only surface through logs and
//! counters.

use std::time::Duration;

use thiserror::Error;

/// Errors raised at configuration time.
///
/// These are developer-controlled setup mistakes, not runtime conditions,
/// so they are returned eagerly instead of being swallowed.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// A propagator was requested by a name this crate does not know.
    #[error("unknown propagator {0:?}, expected one of \"datadog\", \"b3\", \"b3 single header\", \"w3c\"")]
    UnknownPropagator(String),

    /// The writer queue must be able to hold at least one trace.
    #[error("writer queue capacity must be non-zero")]
    InvalidQueueCapacity,

    /// The agent endpoint could not be parsed as a URL.
    #[error("invalid agent endpoint {0:?}")]
    InvalidEndpoint(String),

    /// The HTTP client backing an exporter could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(String),
}

/// Errors surfaced by a [`TraceExporter`](crate::export::TraceExporter).
///
/// The writer worker catches, counts and logs these; they never reach
/// application code.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ExportError {
    /// The trace payload could not be encoded.
    #[error("trace payload could not be encoded: {0}")]
    Encode(String),

    /// The agent answered with a non-success status.
    #[error("agent returned status {0}")]
    Status(u16),

    /// The transport failed before a response was received.
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Other failures not covered by the variants above.
    #[error("{0}")]
    Other(String),
}

/// Result of one export call.
pub type ExportResult = Result<(), ExportError>;

/// Errors returned by writer flush and shutdown operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ShutdownError {
    /// The worker did not acknowledge within the allowed time. Traces still
    /// queued at this point are lost.
    #[error("writer worker did not exit within {0:?}")]
    Timeout(Duration),

    /// The writer was already stopped.
    #[error("writer already stopped")]
    AlreadyStopped,

    /// The worker thread is gone and cannot accept control messages.
    #[error("writer worker is not running")]
    WorkerGone,
}

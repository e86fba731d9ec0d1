//! Trace export: the transport boundary of the writer.

use std::fmt;

use futures_util::future::BoxFuture;

use crate::span::SpanData;

pub use crate::error::{ExportError, ExportResult};

mod in_memory;
pub use in_memory::InMemoryTraceExporter;

#[cfg(feature = "agent")]
mod agent;
#[cfg(feature = "agent")]
pub use agent::{AgentExporter, AgentExporterBuilder};

/// One trace: the ordered spans sharing a trace id, in finish order.
pub type Trace = Vec<SpanData>;

/// Sends batches of finished traces to a backend.
///
/// Exporters are driven by the writer's background worker, off the
/// application's critical path; they may block on I/O. Failures are
/// reported through [`ExportResult`] and are absorbed by the worker —
/// there is no retry, delivery is at-most-once.
pub trait TraceExporter: Send + fmt::Debug {
    /// Export a batch of traces.
    fn export(&mut self, traces: Vec<Trace>) -> BoxFuture<'static, ExportResult>;

    /// Release any resources held by the exporter. Called once when the
    /// writer shuts down.
    fn shutdown(&mut self) {}
}

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::error::ExportResult;
use crate::export::{Trace, TraceExporter};
use crate::util::acquire;

/// An exporter that stores traces in memory, for tests and debugging.
///
/// Clones share the same storage, so a clone kept outside the writer can
/// observe everything the writer exported.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTraceExporter {
    traces: Arc<Mutex<Vec<Trace>>>,
}

impl InMemoryTraceExporter {
    /// Create an empty exporter.
    pub fn new() -> InMemoryTraceExporter {
        InMemoryTraceExporter::default()
    }

    /// The traces exported so far, in export order.
    pub fn get_finished_traces(&self) -> Vec<Trace> {
        acquire(&self.traces).clone()
    }

    /// Clear the stored traces.
    pub fn reset(&self) {
        acquire(&self.traces).clear();
    }
}

impl TraceExporter for InMemoryTraceExporter {
    fn export(&mut self, traces: Vec<Trace>) -> BoxFuture<'static, ExportResult> {
        acquire(&self.traces).extend(traces);
        Box::pin(std::future::ready(Ok(())))
    }

    fn shutdown(&mut self) {}
}

//! A distributed-tracing runtime: create, correlate and ship spans
//! describing units of work, independent of the framework being traced.
//!
//! The crate has three load-bearing pieces:
//!
//! * **Context propagation** — [`Context`] tracks the trace seen by one
//!   execution unit, [`provider::ContextProvider`] decides where that
//!   context lives (thread-local by default, futures via [`task::FutureExt`]),
//!   and spans created through a [`Tracer`] link parent to child
//!   automatically.
//! * **Wire propagators** — [`propagation`] encodes and decodes trace
//!   identity across process boundaries in the Datadog, B3 and W3C
//!   traceparent header formats. Malformed input degrades to an empty
//!   context; tracing never breaks the request it observes.
//! * **The writer** — [`AgentWriter`] buffers finished traces in a bounded
//!   queue (overflow drops the oldest entry, producers never block), and a
//!   background worker filters and exports them off the request path.
//!
//! # Getting started
//!
//! ```
//! use std::time::Duration;
//! use tracekit::export::InMemoryTraceExporter;
//! use tracekit::{AgentWriter, Tracer, TracerOptions};
//!
//! let exporter = InMemoryTraceExporter::new();
//! let tracer = Tracer::new();
//! tracer.configure(TracerOptions {
//!     writer: Some(AgentWriter::new(exporter.clone())),
//!     ..Default::default()
//! });
//!
//! // spans nest through the active context
//! let request = tracer.trace("web.request");
//! let query = tracer
//!     .span_builder("db.query")
//!     .with_service("users-db")
//!     .with_span_type("sql")
//!     .start();
//! assert_eq!(query.parent_id(), Some(request.span_id()));
//!
//! query.finish();
//! request.finish();
//!
//! // the whole trace ships once its root span finishes
//! tracer.flush(Duration::from_secs(5)).unwrap();
//! assert_eq!(exporter.get_finished_traces().len(), 1);
//! # tracer.shutdown(Duration::from_secs(5)).unwrap();
//! ```
//!
//! # Propagation
//!
//! ```
//! use std::collections::HashMap;
//! use tracekit::propagation::{DatadogPropagator, Propagator};
//! use tracekit::Tracer;
//!
//! let tracer = Tracer::new();
//! let propagator = DatadogPropagator::new();
//!
//! // inbound: build a context from headers, activate it, then trace
//! let mut inbound: HashMap<String, String> = HashMap::new();
//! inbound.insert("x-datadog-trace-id".into(), "1234".into());
//! inbound.insert("x-datadog-parent-id".into(), "5678".into());
//! let remote = propagator.extract(&inbound);
//! tracer.context_provider().activate(remote);
//!
//! let span = tracer.trace("handle.request");
//! assert_eq!(span.trace_id(), 1234);
//! assert_eq!(span.parent_id(), Some(5678));
//!
//! // outbound: write the current identity into the next request
//! let mut outbound: HashMap<String, String> = HashMap::new();
//! propagator.inject(&tracer.active_context(), &mut outbound);
//! assert_eq!(outbound["x-datadog-trace-id"], "1234");
//! span.finish();
//! ```

pub mod constants;
pub mod context;
pub mod export;
pub mod ext;
pub mod filter;
pub mod global;
pub mod ids;
pub mod pin;
pub mod propagation;
pub mod provider;
pub mod span;
pub mod task;
pub mod tracer;
pub mod writer;

mod error;
mod util;

pub use context::{Context, SamplingPriority, TraceState};
pub use error::{ConfigError, ExportError, ExportResult, ShutdownError};
pub use pin::Pin;
pub use span::{Span, SpanBuilder, SpanData};
pub use tracer::{Tracer, TracerOptions};
pub use writer::{AgentWriter, WriterConfig};

//! The tracer: single orchestration point for span creation and closure.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::context::{Context, SamplingPriority};
use crate::error::ShutdownError;
use crate::filter::TraceFilter;
use crate::ids::new_id;
use crate::provider::{ContextProvider, ThreadLocalProvider};
use crate::span::{Span, SpanBuilder, SpanData};
use crate::util::{read, write};
use crate::writer::AgentWriter;

type StartHook = Arc<dyn Fn(&Span) + Send + Sync>;

struct TracerInner {
    enabled: AtomicBool,
    priority_sampling: AtomicBool,
    provider: RwLock<Arc<dyn ContextProvider>>,
    writer: RwLock<Option<AgentWriter>>,
    tags: RwLock<HashMap<String, String>>,
    start_hooks: RwLock<Vec<StartHook>>,
}

/// Options accepted by [`Tracer::configure`]. Unset fields leave the
/// current configuration untouched.
#[derive(Default)]
pub struct TracerOptions {
    /// Enable or disable the tracer. A disabled tracer still creates and
    /// balances spans, but nothing ever reaches the writer.
    pub enabled: Option<bool>,
    /// Whether root spans without an inherited priority are stamped
    /// `AutoKeep`.
    pub priority_sampling: Option<bool>,
    /// Replace the context provider.
    pub context_provider: Option<Arc<dyn ContextProvider>>,
    /// Install a writer.
    pub writer: Option<AgentWriter>,
    /// Tags applied to every span this tracer starts.
    pub tags: Option<HashMap<String, String>>,
    /// Replace the writer's filter chain.
    pub filters: Option<Vec<Arc<dyn TraceFilter>>>,
}

impl fmt::Debug for TracerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerOptions")
            .field("enabled", &self.enabled)
            .field("priority_sampling", &self.priority_sampling)
            .field("context_provider", &self.context_provider.is_some())
            .field("writer", &self.writer.is_some())
            .field("tags", &self.tags)
            .field("filters", &self.filters.as_ref().map(|f| f.len()))
            .finish()
    }
}

/// Creates, correlates and ships spans.
///
/// `Tracer` is a cheap handle meant to be passed through application wiring;
/// clones share the same configuration, provider and writer. Construct one
/// at process start, point it at a writer, and hand it to instrumentation:
///
/// ```
/// use tracekit::{AgentWriter, Tracer, TracerOptions};
/// use tracekit::export::InMemoryTraceExporter;
///
/// let tracer = Tracer::new();
/// tracer.configure(TracerOptions {
///     writer: Some(AgentWriter::new(InMemoryTraceExporter::new())),
///     ..Default::default()
/// });
///
/// let span = tracer.trace("web.request");
/// span.set_tag("http.method", "GET");
/// span.finish();
/// ```
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl Tracer {
    /// Create an enabled tracer with thread-local context storage and no
    /// writer. Until a writer is configured, finished traces are dropped
    /// with a debug-level diagnostic.
    pub fn new() -> Tracer {
        Tracer {
            inner: Arc::new(TracerInner {
                enabled: AtomicBool::new(true),
                priority_sampling: AtomicBool::new(true),
                provider: RwLock::new(Arc::new(ThreadLocalProvider::new())),
                writer: RwLock::new(None),
                tags: RwLock::new(HashMap::new()),
                start_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Whether spans reach the writer.
    pub fn enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Apply configuration. Safe to call concurrently with in-flight spans;
    /// new settings take effect for spans created afterwards.
    pub fn configure(&self, options: TracerOptions) {
        if let Some(enabled) = options.enabled {
            self.inner.enabled.store(enabled, Ordering::Relaxed);
        }
        if let Some(priority_sampling) = options.priority_sampling {
            self.inner
                .priority_sampling
                .store(priority_sampling, Ordering::Relaxed);
        }
        if let Some(provider) = options.context_provider {
            *write(&self.inner.provider) = provider;
        }
        if let Some(tags) = options.tags {
            *write(&self.inner.tags) = tags;
        }
        match (options.writer, options.filters) {
            (Some(writer), Some(filters)) => {
                writer.set_filters(filters);
                *write(&self.inner.writer) = Some(writer);
            }
            (Some(writer), None) => {
                *write(&self.inner.writer) = Some(writer);
            }
            (None, Some(filters)) => {
                if let Some(writer) = read(&self.inner.writer).as_ref() {
                    writer.set_filters(filters);
                }
            }
            (None, None) => {}
        }
    }

    /// Start a span named `name` under the currently active context.
    ///
    /// The returned span must be finished on every exit path; see
    /// [`wrap`](Tracer::wrap) for a scoped variant.
    pub fn trace(&self, name: impl Into<String>) -> Span {
        self.span_builder(name).start()
    }

    /// Start describing a span with explicit service/resource/type/parent.
    pub fn span_builder(&self, name: impl Into<String>) -> SpanBuilder {
        SpanBuilder::new(name).with_tracer(self.clone())
    }

    pub(crate) fn start_span(&self, builder: SpanBuilder) -> Span {
        let context = builder
            .child_of
            .clone()
            .unwrap_or_else(|| self.active_context());

        let (trace_id, parent_id) = match context.trace_id() {
            Some(trace_id) => (trace_id, context.span_id()),
            None => (new_id(), None),
        };
        let span_id = new_id();

        let span = Span::from_builder(
            builder,
            trace_id,
            span_id,
            parent_id,
            Some(context.clone()),
            Some(self.clone()),
        );

        {
            let tags = read(&self.inner.tags);
            for (key, value) in tags.iter() {
                span.set_tag(key, value);
            }
        }

        if parent_id.is_none()
            && self.inner.priority_sampling.load(Ordering::Relaxed)
            && context.sampling_priority().is_none()
        {
            context.set_sampling_priority(Some(SamplingPriority::AutoKeep));
        }

        context.add_span(&span);

        for hook in read(&self.inner.start_hooks).iter() {
            hook(&span);
        }
        span
    }

    /// Trace a closure: the span is finished on every exit path, and a
    /// panic is recorded through the standard error tags before being
    /// resumed.
    pub fn wrap<F, R>(&self, name: &str, f: F) -> R
    where
        F: FnOnce(&Span) -> R,
    {
        let span = self.trace(name);
        match panic::catch_unwind(AssertUnwindSafe(|| f(&span))) {
            Ok(value) => {
                span.finish();
                value
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                span.set_tag(crate::ext::errors::ERROR_TYPE, "panic");
                span.set_tag(crate::ext::errors::ERROR_MSG, message);
                span.finish();
                panic::resume_unwind(payload)
            }
        }
    }

    /// The span currently active in this execution unit, if any.
    pub fn current_span(&self) -> Option<Span> {
        let provider = self.context_provider();
        if !provider.has_active() {
            return None;
        }
        provider.active().current_span()
    }

    /// The root span of the trace currently accumulating in this execution
    /// unit, if any.
    pub fn current_root_span(&self) -> Option<Span> {
        let provider = self.context_provider();
        if !provider.has_active() {
            return None;
        }
        provider.active().root_span()
    }

    /// The raw [`Context`] for the current execution unit, for propagation
    /// use. Created lazily if none exists yet.
    pub fn active_context(&self) -> Context {
        self.context_provider().active()
    }

    /// Whether the current execution unit already has a context.
    pub fn has_active_context(&self) -> bool {
        self.context_provider().has_active()
    }

    /// Trace and span ids of the active span, for log correlation.
    pub fn correlation_ids(&self) -> Option<(u64, u64)> {
        let span = self.current_span()?;
        Some((span.trace_id(), span.span_id()))
    }

    /// Register a hook invoked for every span this tracer starts.
    pub fn on_start_span<F>(&self, hook: F)
    where
        F: Fn(&Span) + Send + Sync + 'static,
    {
        write(&self.inner.start_hooks).push(Arc::new(hook));
    }

    /// The active context provider.
    pub fn context_provider(&self) -> Arc<dyn ContextProvider> {
        read(&self.inner.provider).clone()
    }

    pub(crate) fn record(&self, trace: Vec<SpanData>) {
        if !self.enabled() {
            return;
        }
        match read(&self.inner.writer).as_ref() {
            Some(writer) => writer.write(trace),
            None => {
                tracing::debug!(spans = trace.len(), "no writer configured, dropping trace")
            }
        }
    }

    /// Ask the writer to flush immediately and wait for it. A no-op when
    /// no writer is configured.
    pub fn flush(&self, timeout: Duration) -> Result<(), ShutdownError> {
        match read(&self.inner.writer).as_ref() {
            Some(writer) => writer.flush(timeout),
            None => Ok(()),
        }
    }

    /// Stop the writer after one final drain-and-flush pass, waiting up to
    /// `timeout` for the worker to exit.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), ShutdownError> {
        let writer = write(&self.inner.writer).take();
        match writer {
            Some(writer) => {
                writer.stop();
                writer.join(timeout)
            }
            None => Ok(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Tracer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Tracer::new()
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.enabled())
            .field("writer", &read(&self.inner.writer).is_some())
            .finish()
    }
}

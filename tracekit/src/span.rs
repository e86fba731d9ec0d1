//! A single timed, tagged unit of work.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::constants::{MANUAL_DROP_KEY, MANUAL_KEEP_KEY, NUMERIC_TAGS};
use crate::context::{Context, SamplingPriority};
use crate::ext::errors::{ERROR_MSG, ERROR_STACK, ERROR_TYPE};
use crate::tracer::Tracer;
use crate::util::acquire;

/// Immutable snapshot of a finished span; the unit queued for transmission.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Id of the trace this span belongs to.
    pub trace_id: u64,
    /// Id of this span.
    pub span_id: u64,
    /// Id of the parent span, `None` for a root span.
    pub parent_id: Option<u64>,
    /// Operation name.
    pub name: String,
    /// Service the span was recorded for.
    pub service: Option<String>,
    /// Resource being operated on; defaults to the span name.
    pub resource: String,
    /// Span type, e.g. `http` or `sql`.
    pub span_type: Option<String>,
    /// Wall-clock start time.
    pub start: SystemTime,
    /// Time spent in the unit of work.
    pub duration: Duration,
    /// Whether the span recorded an error.
    pub error: bool,
    /// String tags.
    pub meta: HashMap<String, String>,
    /// Numeric tags.
    pub metrics: HashMap<String, f64>,
}

struct SpanInner {
    name: String,
    service: Option<String>,
    resource: String,
    span_type: Option<String>,
    meta: HashMap<String, String>,
    metrics: HashMap<String, f64>,
    error: bool,
    start: SystemTime,
    started_at: Instant,
    duration: Option<Duration>,
}

/// An open span.
///
/// `Span` is a cheap handle: clones observe and mutate the same span, which
/// is what lets `tracer.current_span()` hand out the live span to
/// instrumentation. Identifiers and back-references are fixed at creation;
/// everything else is mutable until [`finish`] is called, after which the
/// span is snapshotted for transmission and further mutation is ignored by
/// the pipeline.
///
/// A span that is never finished keeps its trace from flushing. Use
/// [`Tracer::wrap`](crate::Tracer::wrap) or a `finish()` on every exit path.
///
/// [`finish`]: Span::finish
#[derive(Clone)]
pub struct Span {
    trace_id: u64,
    span_id: u64,
    parent_id: Option<u64>,
    context: Option<Context>,
    tracer: Option<Tracer>,
    inner: Arc<Mutex<SpanInner>>,
}

impl Span {
    pub(crate) fn from_builder(
        builder: SpanBuilder,
        trace_id: u64,
        span_id: u64,
        parent_id: Option<u64>,
        context: Option<Context>,
        tracer: Option<Tracer>,
    ) -> Span {
        Span {
            trace_id,
            span_id,
            parent_id,
            context,
            tracer,
            inner: Arc::new(Mutex::new(SpanInner {
                resource: builder
                    .resource
                    .unwrap_or_else(|| builder.name.clone()),
                name: builder.name,
                service: builder.service,
                span_type: builder.span_type,
                meta: HashMap::new(),
                metrics: HashMap::new(),
                error: false,
                start: builder.start_time.unwrap_or_else(SystemTime::now),
                started_at: Instant::now(),
                duration: None,
            })),
        }
    }

    /// Id of the trace this span belongs to.
    pub fn trace_id(&self) -> u64 {
        self.trace_id
    }

    /// Id of this span.
    pub fn span_id(&self) -> u64 {
        self.span_id
    }

    /// Id of the parent span, `None` for a root span.
    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// The context this span was opened in, if any.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Operation name.
    pub fn name(&self) -> String {
        acquire(&self.inner).name.clone()
    }

    /// Service recorded on the span.
    pub fn service(&self) -> Option<String> {
        acquire(&self.inner).service.clone()
    }

    /// Set the service.
    pub fn set_service(&self, service: impl Into<String>) {
        acquire(&self.inner).service = Some(service.into());
    }

    /// Resource being operated on.
    pub fn resource(&self) -> String {
        acquire(&self.inner).resource.clone()
    }

    /// Set the resource.
    pub fn set_resource(&self, resource: impl Into<String>) {
        acquire(&self.inner).resource = resource.into();
    }

    /// Span type, e.g. `http` or `sql`.
    pub fn span_type(&self) -> Option<String> {
        acquire(&self.inner).span_type.clone()
    }

    /// Set the span type.
    pub fn set_span_type(&self, span_type: impl Into<String>) {
        acquire(&self.inner).span_type = Some(span_type.into());
    }

    /// Store a tag on the span.
    ///
    /// A few keys are special: `manual.keep` and `manual.drop` adjust the
    /// owning trace's sampling priority instead of storing a tag, keys in
    /// [`NUMERIC_TAGS`] are redirected to metrics, and `error`-class keys
    /// flip the error flag.
    pub fn set_tag<V: fmt::Display>(&self, key: &str, value: V) {
        let value = value.to_string();
        if key == MANUAL_KEEP_KEY {
            if let Some(context) = &self.context {
                context.set_sampling_priority(Some(SamplingPriority::UserKeep));
            }
            return;
        }
        if key == MANUAL_DROP_KEY {
            if let Some(context) = &self.context {
                context.set_sampling_priority(Some(SamplingPriority::UserReject));
            }
            return;
        }
        if NUMERIC_TAGS.contains(&key) {
            match value.parse::<f64>() {
                Ok(value) => self.set_metric(key, value),
                Err(_) => {
                    tracing::debug!(key, value = %value, "dropping non-numeric value for numeric tag")
                }
            }
            return;
        }

        let mut inner = acquire(&self.inner);
        if key == "error" {
            inner.error = !matches!(value.as_str(), "0" | "false" | "False");
            return;
        }
        if key.starts_with("error.") {
            inner.error = true;
        }
        inner.meta.insert(key.to_string(), value);
    }

    /// Store several tags at once.
    pub fn set_tags<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>)
    where
        K: AsRef<str>,
        V: fmt::Display,
    {
        for (key, value) in tags {
            self.set_tag(key.as_ref(), value);
        }
    }

    /// Value of a tag, if set.
    pub fn get_tag(&self, key: &str) -> Option<String> {
        acquire(&self.inner).meta.get(key).cloned()
    }

    /// Store a numeric tag. Non-finite values are dropped with a debug-level
    /// diagnostic rather than crashing instrumented code.
    pub fn set_metric(&self, key: &str, value: f64) {
        if !value.is_finite() {
            tracing::debug!(key, value, "dropping non-finite metric value");
            return;
        }
        acquire(&self.inner).metrics.insert(key.to_string(), value);
    }

    /// Value of a metric, if set.
    pub fn get_metric(&self, key: &str) -> Option<f64> {
        acquire(&self.inner).metrics.get(key).copied()
    }

    /// Whether the span recorded an error.
    pub fn error(&self) -> bool {
        acquire(&self.inner).error
    }

    /// Set or clear the error flag directly.
    pub fn set_error(&self, error: bool) {
        acquire(&self.inner).error = error;
    }

    /// Record an error on the span: sets the standard `error.type`,
    /// `error.msg` and `error.stack` tags and flips the error flag.
    pub fn record_error<E>(&self, error: &E)
    where
        E: std::error::Error + ?Sized,
    {
        self.set_tag(ERROR_TYPE, std::any::type_name::<E>());
        self.set_tag(ERROR_MSG, error);

        let mut stack = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push_str("\ncaused by: ");
            stack.push_str(&cause.to_string());
            source = cause.source();
        }
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            stack.push('\n');
            stack.push_str(&backtrace.to_string());
        }
        self.set_tag(ERROR_STACK, stack);
    }

    /// Whether `finish` has been called.
    pub fn finished(&self) -> bool {
        acquire(&self.inner).duration.is_some()
    }

    /// Duration recorded at finish, if finished.
    pub fn duration(&self) -> Option<Duration> {
        acquire(&self.inner).duration
    }

    /// Wall-clock start time.
    pub fn start_time(&self) -> SystemTime {
        acquire(&self.inner).start
    }

    /// Close the span, recording its duration from the monotonic clock.
    ///
    /// Finishing is idempotent: later calls leave the recorded duration
    /// untouched and never re-enqueue the trace.
    pub fn finish(&self) {
        self.finish_inner(None);
    }

    /// Close the span with an explicit duration.
    pub fn finish_with_duration(&self, duration: Duration) {
        self.finish_inner(Some(duration));
    }

    fn finish_inner(&self, duration: Option<Duration>) {
        let data = {
            let mut inner = acquire(&self.inner);
            if inner.duration.is_some() {
                return;
            }
            let elapsed = duration.unwrap_or_else(|| inner.started_at.elapsed());
            inner.duration = Some(elapsed);
            snapshot_locked(self, &inner)
        };

        if let Some(context) = &self.context {
            if let Some(trace) = context.close_span(data) {
                if let Some(tracer) = &self.tracer {
                    tracer.record(trace);
                }
            }
        }
    }

    /// Snapshot the span's current state. Unfinished spans report a zero
    /// duration.
    pub fn snapshot(&self) -> SpanData {
        let inner = acquire(&self.inner);
        snapshot_locked(self, &inner)
    }
}

fn snapshot_locked(span: &Span, inner: &SpanInner) -> SpanData {
    SpanData {
        trace_id: span.trace_id,
        span_id: span.span_id,
        parent_id: span.parent_id,
        name: inner.name.clone(),
        service: inner.service.clone(),
        resource: inner.resource.clone(),
        span_type: inner.span_type.clone(),
        start: inner.start,
        duration: inner.duration.unwrap_or_default(),
        error: inner.error,
        meta: inner.meta.clone(),
        metrics: inner.metrics.clone(),
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = acquire(&self.inner);
        f.debug_struct("Span")
            .field("name", &inner.name)
            .field("trace_id", &self.trace_id)
            .field("span_id", &self.span_id)
            .field("parent_id", &self.parent_id)
            .field("finished", &inner.duration.is_some())
            .finish()
    }
}

/// Configures and starts a [`Span`].
#[derive(Debug)]
pub struct SpanBuilder {
    pub(crate) tracer: Option<Tracer>,
    pub(crate) name: String,
    pub(crate) service: Option<String>,
    pub(crate) resource: Option<String>,
    pub(crate) span_type: Option<String>,
    pub(crate) child_of: Option<Context>,
    pub(crate) start_time: Option<SystemTime>,
}

impl SpanBuilder {
    /// Start describing a span with the given operation name. Without a
    /// tracer the resulting span is detached: it records tags and timing but
    /// is never shipped anywhere, which is useful in tests.
    pub fn new(name: impl Into<String>) -> SpanBuilder {
        SpanBuilder {
            tracer: None,
            name: name.into(),
            service: None,
            resource: None,
            span_type: None,
            child_of: None,
            start_time: None,
        }
    }

    pub(crate) fn with_tracer(mut self, tracer: Tracer) -> SpanBuilder {
        self.tracer = Some(tracer);
        self
    }

    /// Service this span belongs to.
    pub fn with_service(mut self, service: impl Into<String>) -> SpanBuilder {
        self.service = Some(service.into());
        self
    }

    /// Resource being operated on.
    pub fn with_resource(mut self, resource: impl Into<String>) -> SpanBuilder {
        self.resource = Some(resource.into());
        self
    }

    /// Span type, e.g. `http` or `sql`.
    pub fn with_span_type(mut self, span_type: impl Into<String>) -> SpanBuilder {
        self.span_type = Some(span_type.into());
        self
    }

    /// Parent the span into an explicit context instead of the provider's
    /// active one. Used with contexts built by propagator extraction.
    pub fn with_child_of(mut self, context: Context) -> SpanBuilder {
        self.child_of = Some(context);
        self
    }

    /// Explicit wall-clock start time.
    pub fn with_start_time(mut self, start_time: SystemTime) -> SpanBuilder {
        self.start_time = Some(start_time);
        self
    }

    /// Start the span.
    pub fn start(self) -> Span {
        match self.tracer.clone() {
            Some(tracer) => tracer.start_span(self),
            None => {
                let trace_id = crate::ids::new_id();
                let span_id = crate::ids::new_id();
                Span::from_builder(self, trace_id, span_id, None, None, None)
            }
        }
    }
}

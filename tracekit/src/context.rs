//! Trace context: the state of one logical trace as seen by the current
//! execution unit.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::constants::{ORIGIN_KEY, SAMPLING_PRIORITY_KEY};
use crate::span::{Span, SpanData};
use crate::util::acquire;

/// Hint given to the backend on whether a trace should be kept.
///
/// In a distributed setup the priority must be set before any context
/// propagation (spawn, RPC call) to be effective downstream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SamplingPriority {
    /// The user explicitly asked for this trace to be rejected.
    UserReject,
    /// The built-in sampler decided to reject this trace.
    AutoReject,
    /// The built-in sampler decided to keep this trace.
    AutoKeep,
    /// The user explicitly asked for this trace to be kept.
    UserKeep,
}

impl SamplingPriority {
    /// Integer value used on the wire and in span metrics.
    pub fn as_i64(self) -> i64 {
        match self {
            SamplingPriority::UserReject => -1,
            SamplingPriority::AutoReject => 0,
            SamplingPriority::AutoKeep => 1,
            SamplingPriority::UserKeep => 2,
        }
    }

    /// Decode an integer priority; values outside the enum are rejected.
    pub fn from_i64(value: i64) -> Option<SamplingPriority> {
        match value {
            -1 => Some(SamplingPriority::UserReject),
            0 => Some(SamplingPriority::AutoReject),
            1 => Some(SamplingPriority::AutoKeep),
            2 => Some(SamplingPriority::UserKeep),
            _ => None,
        }
    }

    /// Whether this priority keeps the trace.
    pub fn is_keep(self) -> bool {
        matches!(self, SamplingPriority::AutoKeep | SamplingPriority::UserKeep)
    }
}

const MAX_TRACE_STATE_MEMBERS: usize = 32;

/// Ordered vendor key/value pairs carried alongside a W3C trace context.
///
/// Parsing is all-or-nothing: a malformed member, a duplicate key or more
/// than 32 members discards the entire header, per the W3C rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceState(Vec<(String, String)>);

impl TraceState {
    /// Parse a `tracestate` header value. Invalid input yields the empty
    /// state, never an error.
    pub fn from_header(header: &str) -> TraceState {
        let mut members: Vec<(String, String)> = Vec::new();
        for member in header.split(',') {
            let member = member.trim_matches(|c| c == ' ' || c == '\t');
            // empty members are valid, but nothing to record
            if member.is_empty() {
                continue;
            }
            let Some((key, value)) = member.split_once('=') else {
                return TraceState::default();
            };
            if !valid_key(key) || !valid_value(value) {
                return TraceState::default();
            }
            if members.iter().any(|(existing, _)| existing == key) {
                // duplicate keys are not legal in the header
                return TraceState::default();
            }
            members.push((key.to_string(), value.to_string()));
            if members.len() > MAX_TRACE_STATE_MEMBERS {
                return TraceState::default();
            }
        }
        TraceState(members)
    }

    /// Render the state back into header form.
    pub fn header(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Value stored for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find_map(|(k, v)| (k == key).then(|| v.as_str()))
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the state carries no members.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate members in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// `[a-z][_0-9a-z*/\-]{0,255}`, optionally `tenant@vendor` with the tenant
/// part capped at 241 bytes and the vendor part at 14.
fn valid_key(key: &str) -> bool {
    fn simple(part: &str, max_len: usize) -> bool {
        let bytes = part.as_bytes();
        !bytes.is_empty()
            && bytes.len() <= max_len
            && bytes[0].is_ascii_lowercase()
            && bytes[1..].iter().all(|&b| {
                b.is_ascii_lowercase()
                    || b.is_ascii_digit()
                    || matches!(b, b'_' | b'-' | b'*' | b'/')
            })
    }

    match key.split_once('@') {
        None => simple(key, 256),
        Some((tenant, vendor)) => simple(tenant, 241) && simple(vendor, 14),
    }
}

/// Printable ASCII minus `,` and `=`, 1..=256 bytes, not ending in a space.
fn valid_value(value: &str) -> bool {
    let bytes = value.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 256
        && bytes
            .iter()
            .all(|&b| (0x20..=0x7e).contains(&b) && b != b',' && b != b'=')
        && bytes[bytes.len() - 1] != b' '
}

#[derive(Default)]
struct ContextInner {
    trace_id: Option<u64>,
    span_id: Option<u64>,
    sampling_priority: Option<SamplingPriority>,
    origin: Option<String>,
    trace_state: TraceState,
    open: Vec<Span>,
    finished: Vec<SpanData>,
    root: Option<Span>,
    current: Option<Span>,
}

/// The state of one logical trace as observed by one execution unit.
///
/// `Context` is a cheap handle; `clone()` shares the same underlying state
/// (this is what the context provider hands around within one execution
/// unit). To parent a trace into a *new* concurrent unit use [`fork`],
/// which copies the identifiers but never the live span list.
///
/// All span bookkeeping is guarded by an internal mutex, so a context that
/// does leak across threads stays memory-safe; correctness still requires
/// the one-unit-one-context discipline enforced by the providers.
///
/// [`fork`]: Context::fork
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Mutex<ContextInner>>,
}

impl Context {
    /// Create a context continuing an existing trace, usually from
    /// propagation. Passing `None` everywhere yields an empty context.
    pub fn new(
        trace_id: Option<u64>,
        span_id: Option<u64>,
        sampling_priority: Option<SamplingPriority>,
    ) -> Context {
        Context {
            inner: Arc::new(Mutex::new(ContextInner {
                trace_id,
                span_id,
                sampling_priority,
                ..ContextInner::default()
            })),
        }
    }

    /// Trace id of the trace this context belongs to, if any.
    pub fn trace_id(&self) -> Option<u64> {
        acquire(&self.inner).trace_id
    }

    /// Id of the most recently active span.
    pub fn span_id(&self) -> Option<u64> {
        acquire(&self.inner).span_id
    }

    /// Current sampling priority.
    pub fn sampling_priority(&self) -> Option<SamplingPriority> {
        acquire(&self.inner).sampling_priority
    }

    /// Set the sampling priority for the whole trace.
    pub fn set_sampling_priority(&self, priority: Option<SamplingPriority>) {
        acquire(&self.inner).sampling_priority = priority;
    }

    /// Origin of the trace, e.g. `synthetics`.
    pub fn origin(&self) -> Option<String> {
        acquire(&self.inner).origin.clone()
    }

    /// Set the trace origin.
    pub fn set_origin(&self, origin: Option<String>) {
        acquire(&self.inner).origin = origin;
    }

    /// Vendor trace state carried for W3C interoperability.
    pub fn trace_state(&self) -> TraceState {
        acquire(&self.inner).trace_state.clone()
    }

    /// Replace the vendor trace state.
    pub fn set_trace_state(&self, trace_state: TraceState) {
        acquire(&self.inner).trace_state = trace_state;
    }

    /// Whether this context carries no trace at all.
    pub fn is_empty(&self) -> bool {
        acquire(&self.inner).trace_id.is_none()
    }

    /// The span currently active in this context.
    pub fn current_span(&self) -> Option<Span> {
        acquire(&self.inner).current.clone()
    }

    /// The root span of the trace currently accumulating in this context.
    pub fn root_span(&self) -> Option<Span> {
        acquire(&self.inner).root.clone()
    }

    /// Number of spans opened in this context and not yet finished.
    pub fn open_span_count(&self) -> usize {
        acquire(&self.inner).open.len()
    }

    /// Copy this context for a new concurrent execution unit.
    ///
    /// The fork carries the trace id, the id of the most recently active
    /// span, the sampling priority, origin and trace state, but starts with
    /// an empty span list: spans opened in the new unit flush independently
    /// of the ones still open here.
    pub fn fork(&self) -> Context {
        let inner = acquire(&self.inner);
        Context {
            inner: Arc::new(Mutex::new(ContextInner {
                trace_id: inner.trace_id,
                span_id: inner.span_id,
                sampling_priority: inner.sampling_priority,
                origin: inner.origin.clone(),
                trace_state: inner.trace_state.clone(),
                ..ContextInner::default()
            })),
        }
    }

    /// Register a newly started span with this context.
    pub(crate) fn add_span(&self, span: &Span) {
        let mut inner = acquire(&self.inner);
        inner.trace_id = Some(span.trace_id());
        inner.span_id = Some(span.span_id());
        if inner.root.is_none() {
            inner.root = Some(span.clone());
        }
        inner.open.push(span.clone());
        inner.current = Some(span.clone());
    }

    /// Record a finished span. Returns the full accumulated trace exactly
    /// once: when the last open span closes.
    pub(crate) fn close_span(&self, data: SpanData) -> Option<Vec<SpanData>> {
        let mut inner = acquire(&self.inner);
        let position = inner
            .open
            .iter()
            .position(|open| open.span_id() == data.span_id)?;
        inner.open.remove(position);

        let parent = data
            .parent_id
            .and_then(|parent| inner.open.iter().find(|s| s.span_id() == parent).cloned());
        if let Some(parent) = &parent {
            inner.span_id = Some(parent.span_id());
        }
        inner.current = parent;

        inner.finished.push(data);
        if !inner.open.is_empty() {
            return None;
        }

        let mut trace = std::mem::take(&mut inner.finished);
        inner.root = None;
        inner.current = None;

        // the local root (a span whose parent is not part of this trace)
        // carries the trace-level decision and origin
        let local_ids: std::collections::HashSet<u64> =
            trace.iter().map(|span| span.span_id).collect();
        let root = trace
            .iter()
            .position(|span| {
                span.parent_id
                    .map_or(true, |parent| !local_ids.contains(&parent))
            })
            .unwrap_or(0);
        if let Some(root) = trace.get_mut(root) {
            if let Some(priority) = inner.sampling_priority {
                root.metrics
                    .insert(SAMPLING_PRIORITY_KEY.to_string(), priority.as_i64() as f64);
            }
            if let Some(origin) = &inner.origin {
                root.meta.insert(ORIGIN_KEY.to_string(), origin.clone());
            }
        }
        Some(trace)
    }

    #[cfg(test)]
    pub(crate) fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = acquire(&self.inner);
        f.debug_struct("Context")
            .field("trace_id", &inner.trace_id)
            .field("span_id", &inner.span_id)
            .field("sampling_priority", &inner.sampling_priority)
            .field("origin", &inner.origin)
            .field("open_spans", &inner.open.len())
            .finish()
    }
}

//! Trace filters, applied by the writer worker before export.

use std::fmt;

use regex::Regex;

use crate::export::Trace;

/// A processing step in the writer's filter chain.
///
/// Filters run in registration order. A filter may pass the trace through
/// unchanged, mutate it, or return `None` to drop it entirely, in which
/// case later filters never see it.
pub trait TraceFilter: Send + Sync + fmt::Debug {
    /// Process one trace.
    fn process_trace(&self, trace: Trace) -> Option<Trace>;
}

/// Drops traces whose root span's `http.url` matches any of the configured
/// patterns. Typically used to mute health checks:
///
/// ```
/// use tracekit::filter::FilterRequestsOnUrl;
///
/// let filter = FilterRequestsOnUrl::new([r"http://.*/healthcheck$"]).unwrap();
/// # let _ = filter;
/// ```
#[derive(Debug)]
pub struct FilterRequestsOnUrl {
    patterns: Vec<Regex>,
}

impl FilterRequestsOnUrl {
    /// Compile the given patterns. Invalid patterns fail fast at
    /// configuration time.
    pub fn new<I, S>(patterns: I) -> Result<FilterRequestsOnUrl, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| Regex::new(pattern.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(FilterRequestsOnUrl { patterns })
    }
}

impl TraceFilter for FilterRequestsOnUrl {
    fn process_trace(&self, trace: Trace) -> Option<Trace> {
        let root = trace
            .iter()
            .find(|span| span.parent_id.is_none())
            .or_else(|| trace.first())?;
        if let Some(url) = root.meta.get(crate::ext::http::URL) {
            if self.patterns.iter().any(|pattern| pattern.is_match(url)) {
                return None;
            }
        }
        Some(trace)
    }
}

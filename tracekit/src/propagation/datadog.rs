//! Datadog header propagation.
//!
//! Identifiers travel as ASCII decimal integers, the sampling priority as
//! its exact signed integer, and the origin as a raw string. This is the
//! only format that round-trips the USER/AUTO priority distinction.

use crate::context::{Context, SamplingPriority};
use crate::propagation::{Extractor, Injector, Propagator};

const TRACE_ID_HEADER: &str = "x-datadog-trace-id";
const PARENT_ID_HEADER: &str = "x-datadog-parent-id";
const SAMPLING_PRIORITY_HEADER: &str = "x-datadog-sampling-priority";
const ORIGIN_HEADER: &str = "x-datadog-origin";

/// Propagates contexts through `x-datadog-*` headers.
#[derive(Clone, Debug, Default)]
pub struct DatadogPropagator {
    _private: (),
}

impl DatadogPropagator {
    /// Create a new `DatadogPropagator`.
    pub fn new() -> Self {
        DatadogPropagator::default()
    }
}

/// Look a header up under its plain name and, failing that, under the
/// CGI/WSGI-style spelling (`HTTP_` prefix, dashes to underscores) that
/// gateway-shaped carriers use.
fn get_header<'a>(carrier: &'a dyn Extractor, name: &str) -> Option<&'a str> {
    if let Some(value) = carrier.get(name) {
        return Some(value);
    }
    let wsgi_name = format!("http_{}", name.replace('-', "_"));
    carrier.get(&wsgi_name)
}

fn parse_decimal_id(value: &str) -> Option<u64> {
    let id = value.trim().parse::<u64>().ok()?;
    (id != 0).then_some(id)
}

impl Propagator for DatadogPropagator {
    fn inject(&self, context: &Context, carrier: &mut dyn Injector) {
        let (Some(trace_id), Some(span_id)) = (context.trace_id(), context.span_id()) else {
            return;
        };
        carrier.set(TRACE_ID_HEADER, trace_id.to_string());
        carrier.set(PARENT_ID_HEADER, span_id.to_string());
        if let Some(priority) = context.sampling_priority() {
            carrier.set(SAMPLING_PRIORITY_HEADER, priority.as_i64().to_string());
        }
        if let Some(origin) = context.origin() {
            carrier.set(ORIGIN_HEADER, origin);
        }
    }

    fn extract(&self, carrier: &dyn Extractor) -> Context {
        let Some(trace_id) = get_header(carrier, TRACE_ID_HEADER).and_then(parse_decimal_id)
        else {
            return Context::default();
        };
        let Some(parent_id) = get_header(carrier, PARENT_ID_HEADER).and_then(parse_decimal_id)
        else {
            return Context::default();
        };

        let sampling_priority = get_header(carrier, SAMPLING_PRIORITY_HEADER)
            .and_then(|value| value.trim().parse::<i64>().ok())
            .and_then(SamplingPriority::from_i64);

        let context = Context::new(Some(trace_id), Some(parent_id), sampling_priority);
        if let Some(origin) = get_header(carrier, ORIGIN_HEADER) {
            context.set_origin(Some(origin.to_string()));
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn extract(headers: &[(&str, &str)]) -> Context {
        let mut carrier = HashMap::new();
        for (key, value) in headers {
            Injector::set(&mut carrier, key, value.to_string());
        }
        DatadogPropagator::new().extract(&carrier)
    }

    #[test]
    fn extracts_full_headers() {
        let context = extract(&[
            ("x-datadog-trace-id", "1234"),
            ("x-datadog-parent-id", "5678"),
            ("x-datadog-sampling-priority", "1"),
            ("x-datadog-origin", "synthetics"),
        ]);
        assert_eq!(context.trace_id(), Some(1234));
        assert_eq!(context.span_id(), Some(5678));
        assert_eq!(
            context.sampling_priority(),
            Some(SamplingPriority::AutoKeep)
        );
        assert_eq!(context.origin(), Some("synthetics".to_string()));
    }

    #[test]
    fn extracts_wsgi_style_headers() {
        let context = extract(&[
            ("HTTP_X_DATADOG_TRACE_ID", "42"),
            ("HTTP_X_DATADOG_PARENT_ID", "43"),
            ("HTTP_X_DATADOG_SAMPLING_PRIORITY", "2"),
        ]);
        assert_eq!(context.trace_id(), Some(42));
        assert_eq!(context.span_id(), Some(43));
        assert_eq!(
            context.sampling_priority(),
            Some(SamplingPriority::UserKeep)
        );
    }

    #[rustfmt::skip]
    fn malformed_cases() -> Vec<Vec<(&'static str, &'static str)>> {
        vec![
            vec![],
            vec![("x-datadog-trace-id", "garbage"), ("x-datadog-parent-id", "12")],
            vec![("x-datadog-trace-id", "1234")],                                     // missing parent
            vec![("x-datadog-trace-id", "1234"), ("x-datadog-parent-id", "garbage")],
            vec![("x-datadog-trace-id", "0"), ("x-datadog-parent-id", "12")],         // zero means absent
            vec![("x-datadog-trace-id", "-5"), ("x-datadog-parent-id", "12")],
            vec![("x-datadog-sampling-priority", "1")],
        ]
    }

    #[test]
    fn malformed_input_yields_an_empty_context() {
        for headers in malformed_cases() {
            let context = extract(&headers);
            assert!(context.is_empty(), "headers: {headers:?}");
            assert_eq!(context.span_id(), None);
        }
    }

    #[test]
    fn unknown_priority_is_dropped_but_ids_survive() {
        let context = extract(&[
            ("x-datadog-trace-id", "1"),
            ("x-datadog-parent-id", "2"),
            ("x-datadog-sampling-priority", "9"),
        ]);
        assert_eq!(context.trace_id(), Some(1));
        assert_eq!(context.sampling_priority(), None);
    }

    #[test]
    fn inject_writes_decimal_headers() {
        let context = Context::new(Some(1234), Some(5678), Some(SamplingPriority::UserReject));
        context.set_origin(Some("synthetics".to_string()));

        let mut carrier: HashMap<String, String> = HashMap::new();
        DatadogPropagator::new().inject(&context, &mut carrier);

        assert_eq!(carrier.get("x-datadog-trace-id"), Some(&"1234".to_string()));
        assert_eq!(carrier.get("x-datadog-parent-id"), Some(&"5678".to_string()));
        assert_eq!(
            carrier.get("x-datadog-sampling-priority"),
            Some(&"-1".to_string())
        );
        assert_eq!(
            carrier.get("x-datadog-origin"),
            Some(&"synthetics".to_string())
        );
    }

    #[test]
    fn inject_of_an_empty_context_writes_nothing() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        DatadogPropagator::new().inject(&Context::default(), &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn round_trip_preserves_exact_priority() {
        for priority in [
            SamplingPriority::UserReject,
            SamplingPriority::AutoReject,
            SamplingPriority::AutoKeep,
            SamplingPriority::UserKeep,
        ] {
            let context = Context::new(Some(99), Some(100), Some(priority));
            let mut carrier: HashMap<String, String> = HashMap::new();
            let propagator = DatadogPropagator::new();
            propagator.inject(&context, &mut carrier);

            let extracted = propagator.extract(&carrier);
            assert_eq!(extracted.trace_id(), Some(99));
            assert_eq!(extracted.span_id(), Some(100));
            assert_eq!(extracted.sampling_priority(), Some(priority));
        }
    }
}

//! W3C Trace Context propagation (`traceparent` / `tracestate`).
//!
//! The `traceparent` header has the form
//! `{2-hex-version}-{32-hex-trace-id}-{16-hex-span-id}-{2-hex-flags}`.
//! Version `00` forbids any trailing segment and version `ff` is invalid
//! outright. The format carries a single sampled bit, so extraction can
//! only ever yield an AUTO priority: the USER/AUTO distinction does not
//! survive this propagator. That is a limitation of the format, not of
//! this implementation.

use crate::context::{Context, SamplingPriority, TraceState};
use crate::propagation::{Extractor, Injector, Propagator};

const TRACEPARENT_HEADER: &str = "traceparent";
const TRACESTATE_HEADER: &str = "tracestate";

/// Propagates contexts in W3C Trace Context format.
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Create a new `TraceContextPropagator`.
    pub fn new() -> Self {
        TraceContextPropagator::default()
    }

    fn extract_context(&self, carrier: &dyn Extractor) -> Option<Context> {
        let header = carrier.get(TRACEPARENT_HEADER)?;
        let header = header.trim_matches(|c| c == ' ' || c == '\t');

        let parts: Vec<&str> = header.splitn(5, '-').collect();
        if parts.len() < 4 {
            return None;
        }
        if !is_lower_hex(parts[0], 2)
            || !is_lower_hex(parts[1], 32)
            || !is_lower_hex(parts[2], 16)
            || !is_lower_hex(parts[3], 2)
        {
            return None;
        }

        let version = u8::from_str_radix(parts[0], 16).ok()?;
        if version == 0xff {
            return None;
        }
        if version == 0 && parts.len() != 4 {
            return None;
        }

        let trace_id_128 = u128::from_str_radix(parts[1], 16).ok()?;
        if trace_id_128 == 0 {
            return None;
        }
        // 64-bit id model: the low bits are what this runtime can carry
        let trace_id = trace_id_128 as u64;
        if trace_id == 0 {
            return None;
        }
        let span_id = u64::from_str_radix(parts[2], 16).ok()?;
        if span_id == 0 {
            return None;
        }
        let flags = u8::from_str_radix(parts[3], 16).ok()?;

        // the sampled bit cannot distinguish USER from AUTO, so AUTO it is
        let priority = if flags & 0x1 != 0 {
            SamplingPriority::AutoKeep
        } else {
            SamplingPriority::AutoReject
        };

        let context = Context::new(Some(trace_id), Some(span_id), Some(priority));
        if let Some(tracestate) = carrier.get(TRACESTATE_HEADER) {
            context.set_trace_state(TraceState::from_header(tracestate));
        }
        Some(context)
    }
}

fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

impl Propagator for TraceContextPropagator {
    fn inject(&self, context: &Context, carrier: &mut dyn Injector) {
        let (Some(trace_id), Some(span_id)) = (context.trace_id(), context.span_id()) else {
            return;
        };
        let sampled = context
            .sampling_priority()
            .map(|priority| priority.is_keep())
            .unwrap_or(false) as u8;
        carrier.set(
            TRACEPARENT_HEADER,
            format!("00-{trace_id:032x}-{span_id:016x}-{sampled:02x}"),
        );
        let trace_state = context.trace_state();
        if !trace_state.is_empty() {
            carrier.set(TRACESTATE_HEADER, trace_state.header());
        }
    }

    fn extract(&self, carrier: &dyn Extractor) -> Context {
        self.extract_context(carrier).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TRACE_ID_LOW: u64 = 0xa3ce_929d_0e0e_4736;
    const SPAN_ID: u64 = 0x00f0_67aa_0ba9_02b7;

    fn extract(traceparent: &str, tracestate: Option<&str>) -> Context {
        let mut carrier = HashMap::new();
        Injector::set(&mut carrier, TRACEPARENT_HEADER, traceparent.to_string());
        if let Some(tracestate) = tracestate {
            Injector::set(&mut carrier, TRACESTATE_HEADER, tracestate.to_string());
        }
        TraceContextPropagator::new().extract(&carrier)
    }

    #[rustfmt::skip]
    fn valid_cases() -> Vec<(&'static str, SamplingPriority)> {
        vec![
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00", SamplingPriority::AutoReject),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", SamplingPriority::AutoKeep),
            // only the sampled bit is significant
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-03", SamplingPriority::AutoKeep),
            // later versions may carry trailing segments
            ("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra", SamplingPriority::AutoKeep),
            // surrounding whitespace is tolerated
            (" 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01\t", SamplingPriority::AutoKeep),
        ]
    }

    #[test]
    fn extracts_valid_traceparents() {
        for (header, priority) in valid_cases() {
            let context = extract(header, None);
            assert_eq!(context.trace_id(), Some(TRACE_ID_LOW), "header: {header}");
            assert_eq!(context.span_id(), Some(SPAN_ID), "header: {header}");
            assert_eq!(
                context.sampling_priority(),
                Some(priority),
                "header: {header}"
            );
        }
    }

    #[rustfmt::skip]
    fn invalid_cases() -> Vec<(&'static str, &'static str)> {
        vec![
            ("", "empty header"),
            ("00", "too few parts"),
            ("0000-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "wrong version length"),
            ("00-4bf92f3577b34da6a3ce929d0e0e473-00f067aa0ba902b7-01", "short trace id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e47361-00f067aa0ba902b7-01", "long trace id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b-01", "short span id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-0", "short flags"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-011", "long flags"),
            ("qw-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "bogus version"),
            ("00-qw000000000000000000000000000000-00f067aa0ba902b7-01", "bogus trace id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-qw00000000000000-01", "bogus span id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-qw", "bogus flags"),
            ("A0-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "uppercase version"),
            ("00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01", "uppercase trace id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00F067AA0BA902B7-01", "uppercase span id"),
            ("00-00000000000000000000000000000000-00f067aa0ba902b7-01", "all-zero trace id"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01", "all-zero span id"),
            ("ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01", "version ff"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra", "version 00 with trailing"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-", "version 00 with empty trailing"),
            ("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7", "missing flags"),
        ]
    }

    #[test]
    fn rejects_invalid_traceparents() {
        for (header, reason) in invalid_cases() {
            let context = extract(header, None);
            assert!(context.is_empty(), "{reason}: {header}");
        }
    }

    #[test]
    fn tracestate_travels_with_the_context() {
        let context = extract(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            Some("congo=t61rcWkgMzE,rojo=00f067aa0ba902b7"),
        );
        let trace_state = context.trace_state();
        assert_eq!(trace_state.get("congo"), Some("t61rcWkgMzE"));
        assert_eq!(trace_state.get("rojo"), Some("00f067aa0ba902b7"));
    }

    #[test]
    fn duplicate_tracestate_keys_discard_the_whole_header() {
        let context = extract(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            Some("a=1,a=2"),
        );
        assert!(!context.is_empty());
        assert!(context.trace_state().is_empty());

        let context = extract(
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            Some("a=1,b=2"),
        );
        assert_eq!(context.trace_state().get("a"), Some("1"));
        assert_eq!(context.trace_state().get("b"), Some("2"));
    }

    #[test]
    fn inject_formats_version_00() {
        let context = Context::new(
            Some(TRACE_ID_LOW),
            Some(SPAN_ID),
            Some(SamplingPriority::AutoKeep),
        );
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject(&context, &mut carrier);
        assert_eq!(
            carrier.get(TRACEPARENT_HEADER),
            Some(&"00-0000000000000000a3ce929d0e0e4736-00f067aa0ba902b7-01".to_string())
        );
        assert_eq!(carrier.get(TRACESTATE_HEADER), None);
    }

    #[test]
    fn inject_without_priority_clears_the_sampled_bit() {
        let context = Context::new(Some(1), Some(2), None);
        let mut carrier: HashMap<String, String> = HashMap::new();
        TraceContextPropagator::new().inject(&context, &mut carrier);
        assert!(carrier
            .get(TRACEPARENT_HEADER)
            .is_some_and(|header| header.ends_with("-00")));
    }

    #[test]
    fn round_trip_is_lossy_but_stable() {
        let propagator = TraceContextPropagator::new();

        // USER_KEEP cannot survive: it degrades to AUTO_KEEP and stays there
        let context = Context::new(Some(7), Some(8), Some(SamplingPriority::UserKeep));
        context.set_trace_state(TraceState::from_header("vendor=value"));
        let mut carrier: HashMap<String, String> = HashMap::new();
        propagator.inject(&context, &mut carrier);

        let first_hop = propagator.extract(&carrier);
        assert_eq!(first_hop.trace_id(), Some(7));
        assert_eq!(first_hop.span_id(), Some(8));
        assert_eq!(
            first_hop.sampling_priority(),
            Some(SamplingPriority::AutoKeep)
        );
        assert_eq!(first_hop.trace_state().header(), "vendor=value");

        let mut second_carrier: HashMap<String, String> = HashMap::new();
        propagator.inject(&first_hop, &mut second_carrier);
        assert_eq!(carrier.get(TRACEPARENT_HEADER), second_carrier.get(TRACEPARENT_HEADER));
        assert_eq!(carrier.get(TRACESTATE_HEADER), second_carrier.get(TRACESTATE_HEADER));
    }
}

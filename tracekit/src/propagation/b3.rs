//! B3 header propagation.
//!
//! Supports both the multi-header form (`X-B3-TraceId`, `X-B3-SpanId`,
//! `X-B3-Sampled`, `X-B3-Flags`) and the single `b3` header
//! (`{trace-id}-{span-id}[-{sampled}[-{parent-span-id}]]`). When both are
//! present the single header takes precedence; when it is invalid,
//! extraction falls back to the multi-header form.
//!
//! Header names are kept lowercase: HTTP sends `X-B3-*` while gRPC sends
//! `x-b3-*`, and carriers normalize case anyway.

use crate::context::{Context, SamplingPriority};
use crate::propagation::{Extractor, Injector, Propagator};

const TRACE_ID_HEADER: &str = "x-b3-traceid";
const SPAN_ID_HEADER: &str = "x-b3-spanid";
const SAMPLED_HEADER: &str = "x-b3-sampled";
const FLAGS_HEADER: &str = "x-b3-flags";
const SINGLE_HEADER: &str = "b3";

/// Which header form [`B3Propagator`] writes on inject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum B3Encoding {
    /// The `x-b3-*` header set.
    MultipleHeader,
    /// The single `b3` header.
    SingleHeader,
    /// Both at once.
    SingleAndMultiHeader,
}

impl B3Encoding {
    fn writes_single(self) -> bool {
        matches!(
            self,
            B3Encoding::SingleHeader | B3Encoding::SingleAndMultiHeader
        )
    }

    fn writes_multi(self) -> bool {
        matches!(
            self,
            B3Encoding::MultipleHeader | B3Encoding::SingleAndMultiHeader
        )
    }
}

/// Propagates contexts through B3 headers.
#[derive(Clone, Debug)]
pub struct B3Propagator {
    inject_encoding: B3Encoding,
}

impl Default for B3Propagator {
    fn default() -> Self {
        B3Propagator {
            inject_encoding: B3Encoding::MultipleHeader,
        }
    }
}

impl B3Propagator {
    /// A propagator injecting the multi-header form.
    pub fn new() -> Self {
        B3Propagator::default()
    }

    /// A propagator injecting the given header form.
    pub fn with_encoding(encoding: B3Encoding) -> Self {
        B3Propagator {
            inject_encoding: encoding,
        }
    }

    fn extract_single(&self, carrier: &dyn Extractor) -> Option<Context> {
        let header = carrier.get(SINGLE_HEADER)?;
        let parts: Vec<&str> = header.split_terminator('-').collect();
        if !(2..=4).contains(&parts.len()) {
            return None;
        }

        let trace_id = parse_trace_id(parts[0])?;
        let span_id = parse_span_id(parts[1])?;
        let priority = if parts.len() > 2 {
            Some(parse_sampled(parts[2])?)
        } else {
            None
        };
        // a parent segment must at least be well-formed, its value is unused
        if parts.len() == 4 {
            parse_span_id(parts[3])?;
        }

        Some(Context::new(Some(trace_id), Some(span_id), priority))
    }

    fn extract_multi(&self, carrier: &dyn Extractor) -> Option<Context> {
        let trace_id = parse_trace_id(carrier.get(TRACE_ID_HEADER)?)?;
        let span_id = parse_span_id(carrier.get(SPAN_ID_HEADER)?)?;

        let debug = carrier.get(FLAGS_HEADER) == Some("1");
        let priority = if debug {
            // debug implies sampled, X-B3-Sampled is ignored
            Some(SamplingPriority::AutoKeep)
        } else {
            match carrier.get(SAMPLED_HEADER) {
                Some(sampled) => Some(parse_sampled(sampled)?),
                None => None,
            }
        };

        Some(Context::new(Some(trace_id), Some(span_id), priority))
    }
}

/// Lowercase hex, 16 or 32 chars; 128-bit ids keep their low 64 bits.
fn parse_trace_id(value: &str) -> Option<u64> {
    if value.len() != 16 && value.len() != 32 {
        return None;
    }
    if !is_lower_hex(value) {
        return None;
    }
    let id = u128::from_str_radix(value, 16).ok()? as u64;
    (id != 0).then_some(id)
}

/// Lowercase hex, exactly 16 chars.
fn parse_span_id(value: &str) -> Option<u64> {
    if value.len() != 16 || !is_lower_hex(value) {
        return None;
    }
    let id = u64::from_str_radix(value, 16).ok()?;
    (id != 0).then_some(id)
}

fn is_lower_hex(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// `1`/`0`, `true`/`false` in any case, or `d` (debug, which implies
/// sampled).
fn parse_sampled(value: &str) -> Option<SamplingPriority> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "d" => Some(SamplingPriority::AutoKeep),
        "0" | "false" => Some(SamplingPriority::AutoReject),
        _ => None,
    }
}

impl Propagator for B3Propagator {
    fn inject(&self, context: &Context, carrier: &mut dyn Injector) {
        let (Some(trace_id), Some(span_id)) = (context.trace_id(), context.span_id()) else {
            return;
        };
        // 64-bit ids are zero-left-padded to the 128-bit canonical form
        let sampled = context
            .sampling_priority()
            .map(|priority| if priority.is_keep() { "1" } else { "0" });

        if self.inject_encoding.writes_single() {
            let mut value = format!("{trace_id:032x}-{span_id:016x}");
            if let Some(flag) = sampled {
                value.push('-');
                value.push_str(flag);
            }
            carrier.set(SINGLE_HEADER, value);
        }
        if self.inject_encoding.writes_multi() {
            carrier.set(TRACE_ID_HEADER, format!("{trace_id:032x}"));
            carrier.set(SPAN_ID_HEADER, format!("{span_id:016x}"));
            if let Some(flag) = sampled {
                carrier.set(SAMPLED_HEADER, flag.to_string());
            }
        }
    }

    fn extract(&self, carrier: &dyn Extractor) -> Context {
        self.extract_single(carrier)
            .or_else(|| self.extract_multi(carrier))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const TRACE_ID_LOW: u64 = 0xa3ce_929d_0e0e_4736;
    const SPAN_ID: &str = "00f067aa0ba902b7";
    const SPAN_ID_U64: u64 = 0x00f0_67aa_0ba9_02b7;

    fn carrier_from(headers: &[(&str, &str)]) -> HashMap<String, String> {
        let mut carrier = HashMap::new();
        for (key, value) in headers {
            Injector::set(&mut carrier, key, value.to_string());
        }
        carrier
    }

    #[rustfmt::skip]
    fn single_header_cases() -> Vec<(&'static str, Option<(u64, u64, Option<SamplingPriority>)>)> {
        vec![
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7",
             Some((TRACE_ID_LOW, SPAN_ID_U64, None))),                                    // deferred
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-0",
             Some((TRACE_ID_LOW, SPAN_ID_U64, Some(SamplingPriority::AutoReject)))),
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1",
             Some((TRACE_ID_LOW, SPAN_ID_U64, Some(SamplingPriority::AutoKeep)))),
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-d",
             Some((TRACE_ID_LOW, SPAN_ID_U64, Some(SamplingPriority::AutoKeep)))),        // debug
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1-00000000000000cd",
             Some((TRACE_ID_LOW, SPAN_ID_U64, Some(SamplingPriority::AutoKeep)))),        // parent id
            ("463ac35c9f6413ad-00f067aa0ba902b7-1",
             Some((0x463a_c35c_9f64_13ad, SPAN_ID_U64, Some(SamplingPriority::AutoKeep)))), // 64-bit id
            ("0", None),
            ("-", None),
            ("0-1-2-3-4-5-6-7", None),
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-q", None),                // bad sampled
            ("4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-1", None),                // upper case
            ("4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-1-cd", None),             // short parent
        ]
    }

    #[test]
    fn extract_single_header() {
        let propagator = B3Propagator::new();
        for (header, expected) in single_header_cases() {
            let carrier = carrier_from(&[("b3", header)]);
            let context = propagator.extract(&carrier);
            match expected {
                Some((trace_id, span_id, priority)) => {
                    assert_eq!(context.trace_id(), Some(trace_id), "header: {header}");
                    assert_eq!(context.span_id(), Some(span_id), "header: {header}");
                    assert_eq!(context.sampling_priority(), priority, "header: {header}");
                }
                None => assert!(context.is_empty(), "header: {header}"),
            }
        }
    }

    #[rustfmt::skip]
    fn multi_header_cases() -> Vec<(Vec<(&'static str, &'static str)>, Option<Option<SamplingPriority>>)> {
        vec![
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID)], Some(None)),   // deferred
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "0")], Some(Some(SamplingPriority::AutoReject))),
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "1")], Some(Some(SamplingPriority::AutoKeep))),
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "true")], Some(Some(SamplingPriority::AutoKeep))),
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "True")], Some(Some(SamplingPriority::AutoKeep))),
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "False")], Some(Some(SamplingPriority::AutoReject))),
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (FLAGS_HEADER, "1")], Some(Some(SamplingPriority::AutoKeep))),  // debug
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "0"), (FLAGS_HEADER, "1")], Some(Some(SamplingPriority::AutoKeep))), // debug wins
            (vec![(SPAN_ID_HEADER, SPAN_ID)], None),                                      // missing trace id
            (vec![(TRACE_ID_HEADER, TRACE_ID)], None),                                    // missing span id
            (vec![(TRACE_ID_HEADER, "ab0000000000"), (SPAN_ID_HEADER, SPAN_ID)], None),   // bad length
            (vec![(TRACE_ID_HEADER, TRACE_ID), (SPAN_ID_HEADER, SPAN_ID), (SAMPLED_HEADER, "10")], None),
            (vec![(TRACE_ID_HEADER, "4BF92F3577B34DA6A3CE929D0E0E4736"), (SPAN_ID_HEADER, SPAN_ID)], None),
        ]
    }

    #[test]
    fn extract_multi_header() {
        let propagator = B3Propagator::new();
        for (headers, expected) in multi_header_cases() {
            let carrier = carrier_from(&headers);
            let context = propagator.extract(&carrier);
            match expected {
                Some(priority) => {
                    assert_eq!(context.trace_id(), Some(TRACE_ID_LOW), "headers: {headers:?}");
                    assert_eq!(context.span_id(), Some(SPAN_ID_U64), "headers: {headers:?}");
                    assert_eq!(context.sampling_priority(), priority, "headers: {headers:?}");
                }
                None => assert!(context.is_empty(), "headers: {headers:?}"),
            }
        }
    }

    #[test]
    fn single_header_takes_precedence() {
        let carrier = carrier_from(&[
            ("b3", "000000000000000000000000000000ab-00000000000000cd-0"),
            (TRACE_ID_HEADER, TRACE_ID),
            (SPAN_ID_HEADER, SPAN_ID),
            (SAMPLED_HEADER, "1"),
        ]);
        let context = B3Propagator::new().extract(&carrier);
        assert_eq!(context.trace_id(), Some(0xab));
        assert_eq!(context.span_id(), Some(0xcd));
        assert_eq!(
            context.sampling_priority(),
            Some(SamplingPriority::AutoReject)
        );
    }

    #[test]
    fn invalid_single_header_falls_back_to_multi() {
        let carrier = carrier_from(&[
            ("b3", "-"),
            (TRACE_ID_HEADER, TRACE_ID),
            (SPAN_ID_HEADER, SPAN_ID),
            (SAMPLED_HEADER, "0"),
        ]);
        let context = B3Propagator::new().extract(&carrier);
        assert_eq!(context.trace_id(), Some(TRACE_ID_LOW));
        assert_eq!(
            context.sampling_priority(),
            Some(SamplingPriority::AutoReject)
        );
    }

    #[test]
    fn inject_multi_pads_trace_ids_to_32_hex() {
        let context = Context::new(
            Some(0x463a_c35c_9f64_13ad),
            Some(SPAN_ID_U64),
            Some(SamplingPriority::AutoKeep),
        );
        let mut carrier: HashMap<String, String> = HashMap::new();
        B3Propagator::new().inject(&context, &mut carrier);

        assert_eq!(
            carrier.get(TRACE_ID_HEADER),
            Some(&"0000000000000000463ac35c9f6413ad".to_string())
        );
        assert_eq!(carrier.get(SPAN_ID_HEADER), Some(&SPAN_ID.to_string()));
        assert_eq!(carrier.get(SAMPLED_HEADER), Some(&"1".to_string()));
        assert_eq!(carrier.get(SINGLE_HEADER), None);
    }

    #[test]
    fn inject_single_header_forms() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        let context = Context::new(Some(0xab), Some(0xcd), None);
        B3Propagator::with_encoding(B3Encoding::SingleHeader).inject(&context, &mut carrier);
        // deferred sampling omits the flag entirely
        assert_eq!(
            carrier.get(SINGLE_HEADER),
            Some(&"000000000000000000000000000000ab-00000000000000cd".to_string())
        );
        assert_eq!(carrier.get(TRACE_ID_HEADER), None);

        let mut carrier: HashMap<String, String> = HashMap::new();
        context.set_sampling_priority(Some(SamplingPriority::UserReject));
        B3Propagator::with_encoding(B3Encoding::SingleAndMultiHeader)
            .inject(&context, &mut carrier);
        assert_eq!(
            carrier.get(SINGLE_HEADER),
            Some(&"000000000000000000000000000000ab-00000000000000cd-0".to_string())
        );
        assert_eq!(carrier.get(SAMPLED_HEADER), Some(&"0".to_string()));
    }

    #[test]
    fn user_and_auto_keep_both_serialize_sampled() {
        for priority in [SamplingPriority::UserKeep, SamplingPriority::AutoKeep] {
            let context = Context::new(Some(1), Some(2), Some(priority));
            let mut carrier: HashMap<String, String> = HashMap::new();
            B3Propagator::new().inject(&context, &mut carrier);
            assert_eq!(carrier.get(SAMPLED_HEADER), Some(&"1".to_string()));
        }
    }

    #[test]
    fn round_trip_reproduces_identifiers() {
        let propagator = B3Propagator::new();
        let carrier = carrier_from(&[
            (TRACE_ID_HEADER, "463ac35c9f6413ad"),
            (SPAN_ID_HEADER, SPAN_ID),
            (FLAGS_HEADER, "1"),
        ]);
        let context = propagator.extract(&carrier);

        let mut reinjected: HashMap<String, String> = HashMap::new();
        propagator.inject(&context, &mut reinjected);
        assert_eq!(
            reinjected.get(TRACE_ID_HEADER),
            Some(&"0000000000000000463ac35c9f6413ad".to_string())
        );
        assert_eq!(reinjected.get(SPAN_ID_HEADER), Some(&SPAN_ID.to_string()));
        assert_eq!(reinjected.get(SAMPLED_HEADER), Some(&"1".to_string()));
    }

    #[test]
    fn empty_context_injects_nothing() {
        let mut carrier: HashMap<String, String> = HashMap::new();
        B3Propagator::new().inject(&Context::default(), &mut carrier);
        assert!(carrier.is_empty());
    }
}

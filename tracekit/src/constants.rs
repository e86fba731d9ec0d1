//! Well-known tag and metric keys understood by the tracing backend.

/// Metric key carrying the sampling decision on the root span of a trace.
pub const SAMPLING_PRIORITY_KEY: &str = "_sampling_priority_v1";

/// Meta key carrying the origin of a distributed trace (e.g. `synthetics`).
pub const ORIGIN_KEY: &str = "_origin";

/// Meta key naming the deployment environment.
pub const ENV_KEY: &str = "env";

/// Metric key for the per-span analytics sample rate.
pub const ANALYTICS_SAMPLE_RATE_KEY: &str = "_analytics.sample_rate";

/// Tag keys whose values are numeric and are stored as metrics even when
/// they arrive through `set_tag`.
pub const NUMERIC_TAGS: &[&str] = &[ANALYTICS_SAMPLE_RATE_KEY];

/// Setting this tag forces the trace to be kept by the backend.
pub const MANUAL_KEEP_KEY: &str = "manual.keep";

/// Setting this tag forces the trace to be rejected by the backend.
pub const MANUAL_DROP_KEY: &str = "manual.drop";

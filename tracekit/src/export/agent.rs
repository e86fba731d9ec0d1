//! HTTP exporter shipping msgpack-encoded traces to a local agent.

use std::fmt;
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use url::Url;

use crate::error::{ConfigError, ExportError, ExportResult};
use crate::export::{Trace, TraceExporter};

/// Default collector endpoint.
const DEFAULT_AGENT_ENDPOINT: &str = "http://127.0.0.1:8126";

/// Default service name when neither the span nor the exporter carries one.
const DEFAULT_SERVICE_NAME: &str = "unnamed-rust-service";

/// Header informing the agent of the number of traces in the payload.
const TRACE_COUNT_HEADER: &str = "X-Datadog-Trace-Count";

const TRACES_PATH: &str = "/v0.3/traces";

/// Exporter sending traces to a trace agent over HTTP.
///
/// The payload is the agent's v0.3 msgpack format: an array of traces, each
/// an array of span maps.
pub struct AgentExporter {
    request_url: Url,
    client: reqwest::blocking::Client,
    service_name: String,
}

impl AgentExporter {
    /// Start building an exporter against the default local agent endpoint.
    pub fn builder() -> AgentExporterBuilder {
        AgentExporterBuilder::default()
    }

    fn send(&self, traces: &[Trace]) -> ExportResult {
        let trace_count = traces.len();
        let payload = encode(traces, &self.service_name)?;
        let response = self
            .client
            .put(self.request_url.clone())
            .header("Content-Type", "application/msgpack")
            .header(TRACE_COUNT_HEADER, trace_count.to_string())
            .body(payload)
            .send()
            .map_err(|err| ExportError::Transport(Box::new(err)))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ExportError::Status(response.status().as_u16()))
        }
    }
}

impl fmt::Debug for AgentExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentExporter")
            .field("request_url", &self.request_url.as_str())
            .field("service_name", &self.service_name)
            .finish()
    }
}

impl TraceExporter for AgentExporter {
    fn export(&mut self, traces: Vec<Trace>) -> BoxFuture<'static, ExportResult> {
        // the writer worker drives this off the hot path, blocking is fine
        let result = self.send(&traces);
        Box::pin(std::future::ready(result))
    }
}

/// Builder for [`AgentExporter`].
#[derive(Debug)]
pub struct AgentExporterBuilder {
    agent_endpoint: String,
    service_name: String,
    timeout: Duration,
}

impl Default for AgentExporterBuilder {
    fn default() -> Self {
        AgentExporterBuilder {
            agent_endpoint: DEFAULT_AGENT_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl AgentExporterBuilder {
    /// Address of the trace agent, e.g. `http://localhost:8126`.
    pub fn with_agent_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.agent_endpoint = endpoint.into();
        self
    }

    /// Service name applied to spans that carry none of their own.
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Request timeout for each export call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the exporter. Fails fast on an unparseable endpoint.
    pub fn build(self) -> Result<AgentExporter, ConfigError> {
        let request_url = Url::parse(&self.agent_endpoint)
            .and_then(|url| url.join(TRACES_PATH))
            .map_err(|_| ConfigError::InvalidEndpoint(self.agent_endpoint.clone()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|err| ConfigError::HttpClient(err.to_string()))?;
        Ok(AgentExporter {
            request_url,
            client,
            service_name: self.service_name,
        })
    }
}

fn encode(traces: &[Trace], default_service: &str) -> Result<Vec<u8>, ExportError> {
    use rmp::encode;

    let mut payload = Vec::new();
    encode::write_array_len(&mut payload, traces.len() as u32).map_err(encode_error)?;

    for trace in traces {
        encode::write_array_len(&mut payload, trace.len() as u32).map_err(encode_error)?;

        for span in trace {
            let start = span
                .start
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|since_epoch| since_epoch.as_nanos() as i64)
                .unwrap_or(0);

            let field_count = if span.span_type.is_some() { 12 } else { 11 };
            encode::write_map_len(&mut payload, field_count).map_err(encode_error)?;

            if let Some(span_type) = &span.span_type {
                encode::write_str(&mut payload, "type").map_err(encode_error)?;
                encode::write_str(&mut payload, span_type).map_err(encode_error)?;
            }

            encode::write_str(&mut payload, "service").map_err(encode_error)?;
            encode::write_str(&mut payload, span.service.as_deref().unwrap_or(default_service))
                .map_err(encode_error)?;

            encode::write_str(&mut payload, "name").map_err(encode_error)?;
            encode::write_str(&mut payload, &span.name).map_err(encode_error)?;

            encode::write_str(&mut payload, "resource").map_err(encode_error)?;
            encode::write_str(&mut payload, &span.resource).map_err(encode_error)?;

            encode::write_str(&mut payload, "trace_id").map_err(encode_error)?;
            encode::write_u64(&mut payload, span.trace_id).map_err(encode_error)?;

            encode::write_str(&mut payload, "span_id").map_err(encode_error)?;
            encode::write_u64(&mut payload, span.span_id).map_err(encode_error)?;

            encode::write_str(&mut payload, "parent_id").map_err(encode_error)?;
            encode::write_u64(&mut payload, span.parent_id.unwrap_or(0)).map_err(encode_error)?;

            encode::write_str(&mut payload, "start").map_err(encode_error)?;
            encode::write_i64(&mut payload, start).map_err(encode_error)?;

            encode::write_str(&mut payload, "duration").map_err(encode_error)?;
            encode::write_i64(&mut payload, span.duration.as_nanos() as i64)
                .map_err(encode_error)?;

            encode::write_str(&mut payload, "error").map_err(encode_error)?;
            encode::write_i32(&mut payload, span.error as i32).map_err(encode_error)?;

            encode::write_str(&mut payload, "meta").map_err(encode_error)?;
            encode::write_map_len(&mut payload, span.meta.len() as u32).map_err(encode_error)?;
            for (key, value) in &span.meta {
                encode::write_str(&mut payload, key).map_err(encode_error)?;
                encode::write_str(&mut payload, value).map_err(encode_error)?;
            }

            encode::write_str(&mut payload, "metrics").map_err(encode_error)?;
            encode::write_map_len(&mut payload, span.metrics.len() as u32)
                .map_err(encode_error)?;
            for (key, value) in &span.metrics {
                encode::write_str(&mut payload, key).map_err(encode_error)?;
                encode::write_f64(&mut payload, *value).map_err(encode_error)?;
            }
        }
    }

    Ok(payload)
}

fn encode_error<E: fmt::Display>(err: E) -> ExportError {
    ExportError::Encode(err.to_string())
}

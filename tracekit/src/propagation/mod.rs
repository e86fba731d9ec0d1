//! Wire-format propagators: stateless codecs translating a [`Context`] to
//! and from HTTP header representations for cross-process trace
//! continuity.
//!
//! All propagators share one error philosophy: malformed wire input never
//! raises, it degrades to an empty context. Tracing must never break the
//! request it observes.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::context::Context;
use crate::error::ConfigError;
use crate::util::{read, write};

pub mod b3;
pub mod datadog;
pub mod trace_context;

pub use b3::{B3Encoding, B3Propagator};
pub use datadog::DatadogPropagator;
pub use trace_context::TraceContextPropagator;

/// Writes string key/value pairs into a carrier such as a header map.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Reads string key/value pairs from a carrier such as a header map.
pub trait Extractor {
    /// Get a value from a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the HashMap, normalizing the key to
    /// lowercase.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the HashMap, ignoring key case.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|value| value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(|key| key.as_str()).collect()
    }
}

/// A codec between a [`Context`] and a string-keyed carrier.
pub trait Propagator: Send + Sync + fmt::Debug {
    /// Write the context's trace identity into the carrier.
    fn inject(&self, context: &Context, carrier: &mut dyn Injector);

    /// Build a context from the carrier. Missing or malformed input yields
    /// an empty context, never an error.
    fn extract(&self, carrier: &dyn Extractor) -> Context;
}

/// Constructor for the propagator used on HTTP boundaries.
pub type PropagatorFactory = fn() -> Box<dyn Propagator>;

static HTTP_PROPAGATOR_FACTORY: RwLock<Option<PropagatorFactory>> = RwLock::new(None);

/// Select the propagator used by HTTP instrumentation globally.
pub fn set_http_propagator_factory(factory: PropagatorFactory) {
    *write(&HTTP_PROPAGATOR_FACTORY) = Some(factory);
}

/// An instance of the configured HTTP propagator. Defaults to the Datadog
/// header format.
pub fn http_propagator() -> Box<dyn Propagator> {
    match *read(&HTTP_PROPAGATOR_FACTORY) {
        Some(factory) => factory(),
        None => Box::new(DatadogPropagator::new()),
    }
}

/// Look a propagator up by name. Unknown names fail fast: this runs in
/// developer-controlled setup code, not on the request path.
pub fn propagator_named(name: &str) -> Result<Box<dyn Propagator>, ConfigError> {
    match name {
        "datadog" => Ok(Box::new(DatadogPropagator::new())),
        "b3" => Ok(Box::new(B3Propagator::new())),
        "b3 single header" => Ok(Box::new(B3Propagator::with_encoding(
            B3Encoding::SingleHeader,
        ))),
        "w3c" => Ok(Box::new(TraceContextPropagator::new())),
        other => Err(ConfigError::UnknownPropagator(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_carrier_is_case_insensitive() {
        let mut carrier = HashMap::new();
        Injector::set(&mut carrier, "Header-Name", "value".to_string());

        assert_eq!(Extractor::get(&carrier, "HEADER-NAME"), Some("value"));
        assert_eq!(Extractor::get(&carrier, "header-name"), Some("value"));
        assert_eq!(Extractor::get(&carrier, "missing"), None);
        assert_eq!(Extractor::keys(&carrier), vec!["header-name"]);
    }

    #[test]
    fn propagators_resolve_by_name() {
        assert!(propagator_named("datadog").is_ok());
        assert!(propagator_named("b3").is_ok());
        assert!(propagator_named("b3 single header").is_ok());
        assert!(propagator_named("w3c").is_ok());
        assert!(matches!(
            propagator_named("zipkin-thrift"),
            Err(ConfigError::UnknownPropagator(_))
        ));
    }

    #[test]
    fn factory_overrides_the_default_http_propagator() {
        // default first, then override; one test to avoid ordering races on
        // the global factory
        assert!(format!("{:?}", http_propagator()).contains("Datadog"));

        set_http_propagator_factory(|| Box::new(B3Propagator::new()));
        assert!(format!("{:?}", http_propagator()).contains("B3"));
    }
}

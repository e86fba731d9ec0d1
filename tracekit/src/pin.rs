//! Per-object tracing configuration, attached out-of-band.
//!
//! Instrumentation shims use a `Pin` to decide which tracer and service
//! name apply when tracing calls made through a specific client or
//! connection object. The association lives in a process-wide side table
//! keyed by object address, not on the object itself.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::tracer::Tracer;
use crate::util::acquire;

static REGISTRY: OnceLock<Mutex<HashMap<usize, Pin>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<usize, Pin>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn key_of<T: ?Sized>(target: &T) -> usize {
    (target as *const T).cast::<()>() as usize
}

/// Tracing configuration pinned onto an arbitrary object.
///
/// The table keys on the address of the referent, so pin the long-lived
/// object itself (the connection, the client), not a temporary, and call
/// [`remove_from`](Pin::remove_from) when the object is dropped — the side
/// table cannot observe the object's lifetime on its own.
#[derive(Clone, Debug)]
pub struct Pin {
    service: Option<String>,
    app: Option<String>,
    tags: HashMap<String, String>,
    tracer: Option<Tracer>,
    enabled: bool,
}

impl Pin {
    /// A pin carrying a service name.
    pub fn new(service: impl Into<String>) -> Pin {
        Pin {
            service: Some(service.into()),
            app: None,
            tags: HashMap::new(),
            tracer: None,
            enabled: true,
        }
    }

    /// Name of the application or library being instrumented.
    pub fn with_app(mut self, app: impl Into<String>) -> Pin {
        self.app = Some(app.into());
        self
    }

    /// Add a tag applied by shims to spans traced through this object.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Pin {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Use a specific tracer instead of the process default.
    pub fn with_tracer(mut self, tracer: Tracer) -> Pin {
        self.tracer = Some(tracer);
        self
    }

    /// Enable or disable tracing through this object.
    pub fn with_enabled(mut self, enabled: bool) -> Pin {
        self.enabled = enabled;
        self
    }

    /// Service name carried by the pin.
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Application name carried by the pin.
    pub fn app(&self) -> Option<&str> {
        self.app.as_deref()
    }

    /// Tags carried by the pin.
    pub fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }

    /// Whether tracing through this object is enabled.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The tracer shims should use: the pinned one, or the process default.
    pub fn tracer(&self) -> Tracer {
        self.tracer.clone().unwrap_or_else(crate::global::tracer)
    }

    /// Attach this pin to `target`, replacing any previous pin.
    pub fn onto<T: ?Sized>(self, target: &T) {
        acquire(registry()).insert(key_of(target), self);
    }

    /// The pin attached to `target`, if any.
    pub fn get_from<T: ?Sized>(target: &T) -> Option<Pin> {
        acquire(registry()).get(&key_of(target)).cloned()
    }

    /// Detach and return the pin attached to `target`.
    pub fn remove_from<T: ?Sized>(target: &T) -> Option<Pin> {
        acquire(registry()).remove(&key_of(target))
    }
}

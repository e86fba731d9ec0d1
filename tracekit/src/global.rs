//! Process-wide default tracer.
//!
//! The tracer is designed to be passed explicitly through application
//! wiring; this registry exists only for the outermost composition
//! boundary, where shims need an ambient default (see [`Pin::tracer`]).
//!
//! [`Pin::tracer`]: crate::Pin::tracer

use std::sync::RwLock;

use crate::tracer::Tracer;
use crate::util::{read, write};

static GLOBAL_TRACER: RwLock<Option<Tracer>> = RwLock::new(None);

/// The process default tracer, created on first use.
pub fn tracer() -> Tracer {
    if let Some(tracer) = read(&GLOBAL_TRACER).as_ref() {
        return tracer.clone();
    }
    write(&GLOBAL_TRACER)
        .get_or_insert_with(Tracer::new)
        .clone()
}

/// Install `tracer` as the process default.
pub fn set_tracer(tracer: Tracer) {
    *write(&GLOBAL_TRACER) = Some(tracer);
}

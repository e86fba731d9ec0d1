//! Pluggable storage for the active [`Context`] of an execution unit.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::Context;

/// Strategy deciding where an execution unit's active [`Context`] lives.
///
/// Exactly one provider is active per tracer; switching providers is a
/// configuration action, not something done per call.
pub trait ContextProvider: Send + Sync + fmt::Debug {
    /// The active context for the current execution unit, created lazily if
    /// none exists yet.
    fn active(&self) -> Context;

    /// Make `context` the active one for the current execution unit and
    /// return it.
    fn activate(&self, context: Context) -> Context;

    /// Whether the current execution unit already has a context, without
    /// creating one.
    fn has_active(&self) -> bool;
}

static NEXT_PROVIDER_SLOT: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static ACTIVE_CONTEXTS: RefCell<HashMap<u64, Context>> = RefCell::new(HashMap::new());
}

/// Default provider backed by per-thread storage.
///
/// Suitable for synchronous code and thread-per-request servers. Each
/// provider instance owns its own slot, so two tracers never observe each
/// other's contexts even on the same thread.
#[derive(Debug)]
pub struct ThreadLocalProvider {
    slot: u64,
}

impl ThreadLocalProvider {
    /// Create a provider with a fresh storage slot.
    pub fn new() -> ThreadLocalProvider {
        ThreadLocalProvider {
            slot: NEXT_PROVIDER_SLOT.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for ThreadLocalProvider {
    fn default() -> Self {
        ThreadLocalProvider::new()
    }
}

impl ContextProvider for ThreadLocalProvider {
    fn active(&self) -> Context {
        ACTIVE_CONTEXTS.with(|contexts| {
            contexts
                .borrow_mut()
                .entry(self.slot)
                .or_default()
                .clone()
        })
    }

    fn activate(&self, context: Context) -> Context {
        ACTIVE_CONTEXTS.with(|contexts| {
            contexts.borrow_mut().insert(self.slot, context.clone());
        });
        context
    }

    fn has_active(&self) -> bool {
        ACTIVE_CONTEXTS.with(|contexts| contexts.borrow().contains_key(&self.slot))
    }
}

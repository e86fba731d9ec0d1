//! Carrying trace context across asynchronous tasks.
//!
//! Async executors migrate tasks between worker threads, so thread-local
//! context storage alone cannot follow a logical request. The combinators
//! here pin a [`Context`] to a future: every time the future is polled the
//! context is activated in the tracer's provider, and the previous context
//! is restored afterwards.
//!
//! A spawned task receives a [`fork`](Context::fork) of its creator's
//! context, never the original handle, so concurrent units cannot race on
//! one span list.

use std::future::Future;
use std::pin::Pin;
use std::task::Poll;

use pin_project_lite::pin_project;

use crate::context::Context;
use crate::tracer::Tracer;

pin_project! {
    /// A future with a trace [`Context`] attached to every poll.
    #[derive(Debug)]
    pub struct WithContext<F> {
        #[pin]
        future: F,
        tracer: Tracer,
        context: Context,
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let provider = this.tracer.context_provider();
        let previous = provider.active();
        provider.activate(this.context.clone());
        let result = this.future.poll(cx);
        provider.activate(previous);
        result
    }
}

/// Extension trait attaching trace contexts to futures.
pub trait FutureExt: Sized {
    /// Run this future with `context` active in `tracer`'s provider on
    /// every poll.
    fn with_trace_context(self, tracer: &Tracer, context: Context) -> WithContext<Self> {
        WithContext {
            future: self,
            tracer: tracer.clone(),
            context,
        }
    }

    /// Run this future with a fork of the currently active context. Call at
    /// spawn time: the spawned task continues the trace independently of
    /// the spawning unit.
    fn in_current_trace_context(self, tracer: &Tracer) -> WithContext<Self> {
        let context = tracer.active_context().fork();
        self.with_trace_context(tracer, context)
    }
}

impl<T: Sized> FutureExt for T {}

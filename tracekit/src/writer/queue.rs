use std::collections::VecDeque;
use std::sync::Mutex;

use crate::export::Trace;
use crate::util::acquire;

/// Counters accumulated by the queue between two stat resets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct QueueStats {
    pub dropped: u64,
    pub accepted: u64,
    pub accepted_spans: u64,
}

#[derive(Default)]
struct QueueInner {
    traces: VecDeque<Trace>,
    stats: QueueStats,
}

/// Fixed-capacity queue of finished traces.
///
/// Producers never block and never observe an error: when the queue is
/// full the oldest entry is dropped silently and counted.
pub(crate) struct TraceQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

impl TraceQueue {
    pub(crate) fn new(capacity: usize) -> TraceQueue {
        TraceQueue {
            capacity,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub(crate) fn push(&self, trace: Trace) {
        let mut inner = acquire(&self.inner);
        if inner.traces.len() >= self.capacity {
            inner.traces.pop_front();
            inner.stats.dropped += 1;
        }
        inner.stats.accepted += 1;
        inner.stats.accepted_spans += trace.len() as u64;
        inner.traces.push_back(trace);
    }

    pub(crate) fn drain(&self) -> Vec<Trace> {
        let mut inner = acquire(&self.inner);
        inner.traces.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        acquire(&self.inner).traces.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the accumulated counters and zero them.
    pub(crate) fn reset_stats(&self) -> QueueStats {
        let mut inner = acquire(&self.inner);
        std::mem::take(&mut inner.stats)
    }
}

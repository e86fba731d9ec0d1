//! The asynchronous trace writer.
//!
//! Decouples span production (synchronous, on the request path) from
//! transmission (a single background worker per writer). Finished traces go
//! into a bounded queue that drops its oldest entry on overflow; the worker
//! wakes on a fixed interval or on an explicit flush/stop signal, runs the
//! filter chain, and hands surviving traces to the exporter. Transport
//! failures are counted and logged, never raised and never retried.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_executor::block_on;

use crate::error::{ConfigError, ShutdownError};
use crate::export::{Trace, TraceExporter};
use crate::filter::TraceFilter;
use crate::util::acquire;

mod queue;
use queue::TraceQueue;

/// Environment variable overriding the flush interval, in milliseconds.
pub const WRITER_INTERVAL_MS_ENV: &str = "TRACEKIT_WRITER_INTERVAL_MS";
/// Environment variable overriding the queue capacity.
pub const WRITER_MAX_QUEUE_SIZE_ENV: &str = "TRACEKIT_WRITER_MAX_QUEUE_SIZE";

const DEFAULT_MAX_QUEUE_SIZE: usize = 1_000;
const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Sink for the writer's optional runtime counters and gauges.
///
/// This is a side channel for operational visibility, not required for
/// correctness; the writer emits into it once per flush interval.
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Record an instantaneous value.
    fn gauge(&self, name: &str, value: f64);
    /// Add to a counter.
    fn increment(&self, name: &str, value: u64);
}

/// Writer configuration.
#[derive(Clone, Debug)]
pub struct WriterConfig {
    pub(crate) max_queue_size: usize,
    pub(crate) interval: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfigBuilder::default()
            .build()
            .expect("default writer config is valid")
    }
}

impl WriterConfig {
    /// Start building a config from the defaults and environment overrides.
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }
}

/// Builder for [`WriterConfig`].
///
/// Defaults are overridden by `TRACEKIT_WRITER_INTERVAL_MS` and
/// `TRACEKIT_WRITER_MAX_QUEUE_SIZE` when set; unparsable values are
/// ignored.
#[derive(Debug)]
pub struct WriterConfigBuilder {
    max_queue_size: usize,
    interval: Duration,
}

impl Default for WriterConfigBuilder {
    fn default() -> Self {
        WriterConfigBuilder {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            interval: DEFAULT_INTERVAL,
        }
        .init_from_env_vars()
    }
}

impl WriterConfigBuilder {
    /// Maximum number of traces buffered between two flushes. On overflow
    /// the oldest trace is dropped.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Delay between two periodic flushes.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Build the config, failing fast on a zero queue capacity.
    pub fn build(self) -> Result<WriterConfig, ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidQueueCapacity);
        }
        Ok(WriterConfig {
            max_queue_size: self.max_queue_size,
            interval: self.interval,
        })
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = std::env::var(WRITER_MAX_QUEUE_SIZE_ENV)
            .ok()
            .and_then(|size| size.parse::<usize>().ok())
            .filter(|size| *size > 0)
        {
            self.max_queue_size = max_queue_size;
        }
        if let Some(interval) = std::env::var(WRITER_INTERVAL_MS_ENV)
            .ok()
            .and_then(|millis| millis.parse::<u64>().ok())
        {
            self.interval = Duration::from_millis(interval);
        }
        self
    }
}

enum ControlMessage {
    Flush(Sender<()>),
    Shutdown(Sender<()>),
}

/// Background flush pipeline for finished traces.
///
/// One worker thread per writer; [`write`](AgentWriter::write) never blocks
/// and never surfaces an error into application code.
pub struct AgentWriter {
    queue: Arc<TraceQueue>,
    filters: Arc<Mutex<Vec<Arc<dyn TraceFilter>>>>,
    control: SyncSender<ControlMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    shutdown_ack: Mutex<Option<Receiver<()>>>,
    stopped: AtomicBool,
}

impl AgentWriter {
    /// Create a writer with the default configuration.
    pub fn new<E>(exporter: E) -> AgentWriter
    where
        E: TraceExporter + 'static,
    {
        AgentWriter::builder(exporter).build()
    }

    /// Start building a writer around the given exporter.
    pub fn builder<E>(exporter: E) -> AgentWriterBuilder<E>
    where
        E: TraceExporter + 'static,
    {
        AgentWriterBuilder {
            exporter,
            config: WriterConfig::default(),
            filters: Vec::new(),
            stats: None,
        }
    }

    /// Enqueue one finished trace. Non-blocking; on queue overflow the
    /// oldest buffered trace is dropped silently.
    pub fn write(&self, trace: Trace) {
        if self.stopped.load(Ordering::Relaxed) {
            tracing::debug!("writer is stopped, dropping trace");
            return;
        }
        self.queue.push(trace);
    }

    /// Replace the filter chain. Takes effect at the next flush.
    pub fn set_filters(&self, filters: Vec<Arc<dyn TraceFilter>>) {
        *acquire(&self.filters) = filters;
    }

    /// Ask the worker to flush immediately and wait for it to finish.
    pub fn flush(&self, timeout: Duration) -> Result<(), ShutdownError> {
        if self.stopped.load(Ordering::Relaxed) {
            return Err(ShutdownError::AlreadyStopped);
        }
        let (ack, done) = mpsc::channel();
        self.control
            .try_send(ControlMessage::Flush(ack))
            .map_err(|_| ShutdownError::WorkerGone)?;
        done.recv_timeout(timeout)
            .map_err(|_| ShutdownError::Timeout(timeout))
    }

    /// Signal the worker to perform one final drain-and-flush pass and
    /// terminate. Idempotent; returns immediately.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::Relaxed) {
            return;
        }
        let (ack, done) = mpsc::channel();
        if self.control.try_send(ControlMessage::Shutdown(ack)).is_ok() {
            *acquire(&self.shutdown_ack) = Some(done);
        }
    }

    /// Wait for the worker to exit after [`stop`](AgentWriter::stop).
    ///
    /// Traces still queued when the timeout elapses are lost; the worker
    /// thread is abandoned rather than blocked on.
    pub fn join(&self, timeout: Duration) -> Result<(), ShutdownError> {
        if !self.stopped.load(Ordering::Relaxed) {
            self.stop();
        }
        let ack = acquire(&self.shutdown_ack).take();
        match ack {
            Some(done) => {
                done.recv_timeout(timeout)
                    .map_err(|_| ShutdownError::Timeout(timeout))?;
                if let Some(handle) = acquire(&self.handle).take() {
                    let _ = handle.join();
                }
                Ok(())
            }
            None if acquire(&self.handle).is_some() => Err(ShutdownError::WorkerGone),
            None => Err(ShutdownError::AlreadyStopped),
        }
    }

    /// Number of traces currently buffered.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for AgentWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentWriter")
            .field("queue_len", &self.queue.len())
            .field("queue_capacity", &self.queue.capacity())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builder for [`AgentWriter`].
#[derive(Debug)]
pub struct AgentWriterBuilder<E>
where
    E: TraceExporter + 'static,
{
    exporter: E,
    config: WriterConfig,
    filters: Vec<Arc<dyn TraceFilter>>,
    stats: Option<Arc<dyn MetricsSink>>,
}

impl<E> AgentWriterBuilder<E>
where
    E: TraceExporter + 'static,
{
    /// Use the given configuration.
    pub fn with_config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the initial filter chain.
    pub fn with_filters(mut self, filters: Vec<Arc<dyn TraceFilter>>) -> Self {
        self.filters = filters;
        self
    }

    /// Emit queue and transport counters into the given sink once per
    /// flush interval.
    pub fn with_stats(mut self, stats: Arc<dyn MetricsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Build the writer and spawn its worker thread.
    pub fn build(self) -> AgentWriter {
        let queue = Arc::new(TraceQueue::new(self.config.max_queue_size));
        let filters = Arc::new(Mutex::new(self.filters));
        let (control, control_rx) = mpsc::sync_channel(4);

        let worker_queue = queue.clone();
        let worker_filters = filters.clone();
        let stats = self.stats;
        let interval = self.config.interval;
        let mut exporter = self.exporter;

        let handle = thread::Builder::new()
            .name("tracekit-writer".to_string())
            .spawn(move || {
                let mut last_flush = Instant::now();
                loop {
                    let timeout = interval.saturating_sub(last_flush.elapsed());
                    match control_rx.recv_timeout(timeout) {
                        Ok(ControlMessage::Flush(ack)) => {
                            flush_once(&mut exporter, &worker_queue, &worker_filters, stats.as_deref());
                            last_flush = Instant::now();
                            let _ = ack.send(());
                        }
                        Ok(ControlMessage::Shutdown(ack)) => {
                            flush_once(&mut exporter, &worker_queue, &worker_filters, stats.as_deref());
                            exporter.shutdown();
                            let _ = ack.send(());
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            flush_once(&mut exporter, &worker_queue, &worker_filters, stats.as_deref());
                            last_flush = Instant::now();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            flush_once(&mut exporter, &worker_queue, &worker_filters, stats.as_deref());
                            exporter.shutdown();
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn writer thread");

        AgentWriter {
            queue,
            filters,
            control,
            handle: Mutex::new(Some(handle)),
            shutdown_ack: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }
}

fn flush_once<E: TraceExporter>(
    exporter: &mut E,
    queue: &TraceQueue,
    filters: &Mutex<Vec<Arc<dyn TraceFilter>>>,
    stats: Option<&dyn MetricsSink>,
) {
    if let Some(stats) = stats {
        stats.gauge("tracekit.writer.queue.max_length", queue.capacity() as f64);
        stats.gauge("tracekit.writer.queue.length", queue.len() as f64);
    }

    let traces = queue.drain();
    let queue_stats = queue.reset_stats();
    if queue_stats.dropped > 0 {
        tracing::warn!(
            dropped = queue_stats.dropped,
            "trace queue overflowed, oldest traces were dropped"
        );
    }
    if let Some(stats) = stats {
        stats.increment("tracekit.writer.queue.accepted", queue_stats.accepted);
        stats.increment(
            "tracekit.writer.queue.accepted_spans",
            queue_stats.accepted_spans,
        );
        stats.increment("tracekit.writer.queue.dropped", queue_stats.dropped);
    }

    let chain = acquire(filters).clone();
    let mut filtered = 0u64;
    let mut surviving = Vec::with_capacity(traces.len());
    'traces: for mut trace in traces {
        for filter in &chain {
            match filter.process_trace(trace) {
                Some(processed) => trace = processed,
                None => {
                    filtered += 1;
                    continue 'traces;
                }
            }
        }
        surviving.push(trace);
    }
    if let Some(stats) = stats {
        stats.increment("tracekit.writer.traces.filtered", filtered);
    }

    if surviving.is_empty() {
        return;
    }
    if let Some(stats) = stats {
        stats.increment("tracekit.writer.api.requests", 1);
    }
    match block_on(exporter.export(surviving)) {
        Ok(()) => {
            if let Some(stats) = stats {
                stats.increment("tracekit.writer.api.responses", 1);
            }
        }
        Err(error) => {
            tracing::warn!(%error, "failed to send traces");
            if let Some(stats) = stats {
                stats.increment("tracekit.writer.api.errors", 1);
            }
        }
    }
}

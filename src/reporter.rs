//! # Batch reporter
//!
//! Moves completed traces off the hot request path: [`BatchReporter::submit`]
//! enqueues without blocking, and a dedicated worker thread accumulates
//! traces per endpoint, assembles batches on a fixed interval, and drives
//! the exporter. Delivery failures are retried with bounded attempts and
//! exponential backoff; exhausted batches are dropped with a diagnostic,
//! never surfaced to instrumented code.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_executor::block_on;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::ReporterError;
use crate::export::{Batch, BatchExporter};
use crate::retry::RetryPolicy;
use crate::trace::Trace;

const FORCE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages exchanged between submitters and the worker thread.
#[derive(Debug)]
enum ReporterMessage {
    Submit(Box<Trace>),
    ForceFlush(SyncSender<Result<(), ReporterError>>),
    Shutdown(SyncSender<Result<(), ReporterError>>),
}

/// A batch that failed delivery and is waiting for its next attempt.
struct PendingBatch {
    batch: Batch,
    attempts: usize,
    next_attempt_at: Instant,
}

/// Background pipeline delivering completed traces to an exporter.
#[derive(Debug)]
pub struct BatchReporter {
    message_sender: SyncSender<ReporterMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_trace_count: Arc<AtomicUsize>,
}

impl BatchReporter {
    /// Spawns the worker thread around the given exporter.
    pub fn new(mut exporter: Box<dyn BatchExporter>, config: Arc<Config>) -> Self {
        let (message_sender, message_receiver) = sync_channel(config.max_queue_size);

        let handle = thread::Builder::new()
            .name("BatchReporterWorker".to_string())
            .spawn(move || {
                let policy = RetryPolicy {
                    max_retries: config.max_retries,
                    ..RetryPolicy::default()
                };
                let mut buffers: HashMap<String, Vec<Trace>> = HashMap::new();
                let mut pending: Vec<PendingBatch> = Vec::new();
                let mut last_flush = Instant::now();

                loop {
                    let timeout = config.flush_interval.saturating_sub(last_flush.elapsed());
                    match message_receiver.recv_timeout(timeout) {
                        Ok(ReporterMessage::Submit(trace)) => {
                            buffers
                                .entry(trace.effective_endpoint().to_owned())
                                .or_default()
                                .push(*trace);
                            if config.constant_flush {
                                let _ =
                                    flush(&mut exporter, &mut buffers, &mut pending, &policy, true);
                                last_flush = Instant::now();
                            }
                        }
                        Ok(ReporterMessage::ForceFlush(sender)) => {
                            let result =
                                flush(&mut exporter, &mut buffers, &mut pending, &policy, true);
                            let _ = sender.send(result);
                            last_flush = Instant::now();
                        }
                        Ok(ReporterMessage::Shutdown(sender)) => {
                            let result =
                                flush(&mut exporter, &mut buffers, &mut pending, &policy, true);
                            exporter.shutdown();
                            let _ = sender.send(result);
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if last_flush.elapsed() >= config.flush_interval {
                                let _ =
                                    flush(&mut exporter, &mut buffers, &mut pending, &policy, false);
                                last_flush = Instant::now();
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            let _ = flush(&mut exporter, &mut buffers, &mut pending, &policy, true);
                            exporter.shutdown();
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn reporter thread");

        BatchReporter {
            message_sender,
            handle: Mutex::new(Some(handle)),
            is_shutdown: AtomicBool::new(false),
            dropped_trace_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Hands a completed trace to the pipeline. Returns immediately; the
    /// trace is dropped (and counted) if the reporter is shut down or the
    /// queue is full.
    pub fn submit(&self, trace: Trace) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.count_dropped("reporter is shut down");
            return;
        }
        match self
            .message_sender
            .try_send(ReporterMessage::Submit(Box::new(trace)))
        {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.count_dropped("queue is full"),
            Err(TrySendError::Disconnected(_)) => self.count_dropped("worker is gone"),
        }
    }

    /// Forces an immediate flush of all accumulated traces, including
    /// batches waiting on a retry deadline, and blocks until delivery has
    /// been attempted or the flush deadline passes.
    pub fn force_flush(&self) -> Result<(), ReporterError> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(ReporterError::AlreadyShutdown);
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(ReporterMessage::ForceFlush(sender))
            .map_err(|_| ReporterError::ChannelClosed)?;
        receiver
            .recv_timeout(FORCE_FLUSH_TIMEOUT)
            .map_err(|_| ReporterError::FlushTimedOut(FORCE_FLUSH_TIMEOUT))?
    }

    /// Shuts the pipeline down after a best-effort final flush bounded by
    /// a short deadline. Subsequent submissions are dropped.
    pub fn shutdown(&self) -> Result<(), ReporterError> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(ReporterError::AlreadyShutdown);
        }
        let dropped = self.dropped_trace_count.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!("reporter dropped {dropped} traces before shutdown");
        }

        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .try_send(ReporterMessage::Shutdown(sender))
            .map_err(|_| ReporterError::ChannelClosed)?;
        let result = receiver
            .recv_timeout(SHUTDOWN_TIMEOUT)
            .map_err(|_| ReporterError::FlushTimedOut(SHUTDOWN_TIMEOUT))?;
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        result
    }

    fn count_dropped(&self, reason: &str) {
        if self.dropped_trace_count.fetch_add(1, Ordering::Relaxed) == 0 {
            warn!("dropping trace: {reason}; further drops will be counted silently");
        }
    }
}

impl Drop for BatchReporter {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown();
        }
    }
}

/// Drains accumulated buffers, combines them with retry-eligible pending
/// batches, and attempts one delivery. On failure every batch in the
/// attempt is requeued with a backoff deadline, or dropped once its
/// attempts are exhausted.
fn flush(
    exporter: &mut Box<dyn BatchExporter>,
    buffers: &mut HashMap<String, Vec<Trace>>,
    pending: &mut Vec<PendingBatch>,
    policy: &RetryPolicy,
    force: bool,
) -> Result<(), ReporterError> {
    let now = Instant::now();
    let mut due: Vec<PendingBatch> = Vec::new();
    let mut later: Vec<PendingBatch> = Vec::new();
    for batch in pending.drain(..) {
        if force || batch.next_attempt_at <= now {
            due.push(batch);
        } else {
            later.push(batch);
        }
    }
    *pending = later;

    let mut outgoing: Vec<(Batch, usize)> = due
        .into_iter()
        .map(|pending| (pending.batch, pending.attempts))
        .collect();
    for (endpoint, traces) in buffers.drain() {
        if !traces.is_empty() {
            outgoing.push((Batch { endpoint, traces }, 0));
        }
    }
    if outgoing.is_empty() {
        return Ok(());
    }

    let payload: Vec<Batch> = outgoing.iter().map(|(batch, _)| batch.clone()).collect();
    match block_on(exporter.export(payload)) {
        Ok(()) => {
            debug!("delivered {} trace batches", outgoing.len());
            Ok(())
        }
        Err(err) => {
            warn!("batch delivery failed: {err}");
            let now = Instant::now();
            for (batch, attempts) in outgoing {
                let attempts = attempts + 1;
                if attempts > policy.max_retries {
                    error!(
                        "dropping batch for endpoint {} ({} traces) after {} failed delivery attempts",
                        batch.endpoint,
                        batch.traces.len(),
                        attempts
                    );
                } else {
                    pending.push(PendingBatch {
                        batch,
                        attempts,
                        next_attempt_at: now + policy.backoff_delay(attempts),
                    });
                }
            }
            Err(ReporterError::Export(err))
        }
    }
}

//! The asynchronous reporting pipeline.
//!
//! Finished spans flow through four bounded queues, each drained by
//! its own batch worker: the primary span queue, a span retry queue,
//! a file queue for extracted payloads, and a file retry queue. A
//! batch that fails to export from a primary queue is re-enqueued on
//! its retry queue exactly once; a failure from a retry queue drops
//! the batch. The pipeline never blocks the traced program: full
//! queues drop, and every enqueue, export and drop is observable
//! through the finish-event hook.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::trace::batch::{BatchConfig, BatchManager};
use crate::trace::export::Exporter;
use crate::trace::queue::{self, QueueSender};
use crate::trace::span::Span;
use crate::trace::transform::Transformer;
use crate::trace::upload::UploadFile;

/// Which pipeline stage a [`FinishEvent`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinishEventKind {
    /// A finished span was offered to the span queue.
    SpanQueueEntry,
    /// A span was exported (or failed to export).
    FlushSpan,
    /// An extracted file was offered to the file queue.
    FileQueueEntry,
    /// A file was exported (or failed to export).
    FlushFile,
}

/// Telemetry about the pipeline's own queueing and export lifecycle.
#[derive(Clone, Debug)]
pub struct FinishEvent {
    /// Stage the event describes.
    pub kind: FinishEventKind,
    /// Whether the stage succeeded.
    pub ok: bool,
    /// Human readable detail, e.g. the export error.
    pub detail: String,
    /// Trace id of the span concerned; empty for file events.
    pub trace_id: String,
    /// Span id of the span concerned; empty for file events.
    pub span_id: String,
}

/// Callback receiving [`FinishEvent`]s.
pub type FinishEventHandler = Arc<dyn Fn(&FinishEvent) + Send + Sync>;

/// Receives finished spans and drives them to an exporter.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Accepts a finished span. Must not block and must not fail.
    fn on_span_end(&self, span: Span);

    /// Drains all queues and in-flight batches within `timeout`.
    fn force_flush(&self, timeout: Duration) -> Result<()>;

    /// Flushes, stops intake and joins the workers.
    fn shutdown(&self, timeout: Duration) -> Result<()>;
}

#[derive(Clone)]
struct EventSink {
    handler: Option<FinishEventHandler>,
}

impl EventSink {
    fn emit(&self, kind: FinishEventKind, ok: bool, detail: &str, trace_id: &str, span_id: &str) {
        if let Some(handler) = &self.handler {
            handler(&FinishEvent {
                kind,
                ok,
                detail: detail.to_owned(),
                trace_id: trace_id.to_owned(),
                span_id: span_id.to_owned(),
            });
        }
    }
}

struct Managers {
    span: BatchManager,
    span_retry: BatchManager,
    file: BatchManager,
    file_retry: BatchManager,
}

impl Managers {
    // Drain order matters: a failed span batch must reach the retry
    // queue before it is drained, and extracted files must reach the
    // file queue before that one is.
    fn in_drain_order(&mut self) -> [&mut BatchManager; 4] {
        [
            &mut self.span,
            &mut self.span_retry,
            &mut self.file,
            &mut self.file_retry,
        ]
    }
}

/// The default four-queue [`SpanProcessor`].
pub struct BatchSpanProcessor {
    span_queue: QueueSender<Span>,
    events: EventSink,
    stopped: AtomicBool,
    terminated: AtomicBool,
    managers: Mutex<Managers>,
}

impl fmt::Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("span_queue", &self.span_queue)
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

impl BatchSpanProcessor {
    /// Spawns the four batch workers against `exporter`.
    pub fn new(exporter: Arc<dyn Exporter>, config: &Config) -> Self {
        let transformer = Arc::new(Transformer::new(
            config.workspace_id.clone(),
            config.ultra_large_report,
        ));
        let events = EventSink {
            handler: config.finish_event_handler.clone(),
        };

        let (file_retry_tx, file_retry_rx) = queue::bounded::<UploadFile>(
            config.file_retry_queue.max_queue_length,
            config.file_retry_queue.max_batch_bytes,
        );
        let file_retry = BatchManager::spawn(
            "file-retry-export",
            file_retry_rx,
            batch_config(&config.file_retry_queue),
            file_export_fn(exporter.clone(), None, events.clone()),
        );

        let (file_tx, file_rx) = queue::bounded::<UploadFile>(
            config.file_queue.max_queue_length,
            config.file_queue.max_batch_bytes,
        );
        let file = BatchManager::spawn(
            "file-export",
            file_rx,
            batch_config(&config.file_queue),
            file_export_fn(exporter.clone(), Some(file_retry_tx), events.clone()),
        );

        let (span_retry_tx, span_retry_rx) = queue::bounded::<Span>(
            config.span_retry_queue.max_queue_length,
            config.span_retry_queue.max_batch_bytes,
        );
        let span_retry = BatchManager::spawn(
            "span-retry-export",
            span_retry_rx,
            batch_config(&config.span_retry_queue),
            span_export_fn(
                exporter.clone(),
                transformer.clone(),
                None,
                file_tx.clone(),
                events.clone(),
            ),
        );

        let (span_tx, span_rx) = queue::bounded::<Span>(
            config.span_queue.max_queue_length,
            config.span_queue.max_batch_bytes,
        );
        let span = BatchManager::spawn(
            "span-export",
            span_rx,
            batch_config(&config.span_queue),
            span_export_fn(exporter, transformer, Some(span_retry_tx), file_tx, events.clone()),
        );

        BatchSpanProcessor {
            span_queue: span_tx,
            events,
            stopped: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            managers: Mutex::new(Managers {
                span,
                span_retry,
                file,
                file_retry,
            }),
        }
    }

    fn lock_managers(&self) -> std::sync::MutexGuard<'_, Managers> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_span_end(&self, span: Span) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let size = span.byte_estimate();
        let trace_id = span.trace_id().to_string();
        let span_id = span.span_id().to_string();
        if self.span_queue.try_enqueue(span, size) {
            self.events.emit(
                FinishEventKind::SpanQueueEntry,
                true,
                "span enqueued",
                &trace_id,
                &span_id,
            );
        } else {
            warn!(
                %trace_id,
                %span_id,
                dropped_total = self.span_queue.dropped(),
                "span queue full, dropping span"
            );
            self.events.emit(
                FinishEventKind::SpanQueueEntry,
                false,
                "span queue full",
                &trace_id,
                &span_id,
            );
        }
    }

    fn force_flush(&self, timeout: Duration) -> Result<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Ok(());
        }
        let deadline = Instant::now() + timeout;
        let mut managers = self.lock_managers();
        for manager in managers.in_drain_order() {
            if !manager.flush(deadline) {
                return Err(Error::FlushTimeout(timeout));
            }
        }
        Ok(())
    }

    fn shutdown(&self, timeout: Duration) -> Result<()> {
        let flushed = self.force_flush(timeout);
        if self.terminated.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stopped.store(true, Ordering::Release);
        let deadline = Instant::now() + timeout;
        let mut all_acked = true;
        let mut managers = self.lock_managers();
        for manager in managers.in_drain_order() {
            all_acked &= manager.shutdown(deadline);
        }
        drop(managers);
        flushed?;
        if !all_acked {
            return Err(Error::FlushTimeout(timeout));
        }
        Ok(())
    }
}

fn batch_config(queue: &crate::config::QueueConfig) -> BatchConfig {
    BatchConfig {
        max_batch_length: queue.max_batch_length,
        max_batch_bytes: queue.max_batch_bytes,
        flush_interval: queue.flush_interval,
    }
}

// Builds the export closure for a span queue. `retry` is the retry
// queue for the primary worker and `None` for the retry worker, which
// drops failed batches instead of re-enqueueing them.
fn span_export_fn(
    exporter: Arc<dyn Exporter>,
    transformer: Arc<Transformer>,
    retry: Option<QueueSender<Span>>,
    file_queue: QueueSender<UploadFile>,
    events: EventSink,
) -> impl FnMut(Vec<Span>) + Send + 'static {
    move |batch: Vec<Span>| {
        let (upload_spans, upload_files) = transformer.transform(&batch);
        match exporter.export_spans(&upload_spans) {
            Ok(()) => {
                for span in &upload_spans {
                    events.emit(
                        FinishEventKind::FlushSpan,
                        true,
                        "span exported",
                        &span.trace_id,
                        &span.span_id,
                    );
                }
                for file in upload_files {
                    let size = file.data.len();
                    let tos_key = file.tos_key.clone();
                    if file_queue.try_enqueue(file, size) {
                        events.emit(FinishEventKind::FileQueueEntry, true, &tos_key, "", "");
                    } else {
                        warn!(%tos_key, "file queue full, dropping extracted payload");
                        events.emit(FinishEventKind::FileQueueEntry, false, &tos_key, "", "");
                    }
                }
            }
            Err(err) => {
                let detail = format!("span export failed: {err}");
                match &retry {
                    // Requeueing is not the span's final disposition;
                    // the fail event fires once, on the drop below.
                    Some(retry_queue) => {
                        debug!(count = batch.len(), %err, "re-queueing failed span batch for retry");
                        for span in batch {
                            let trace_id = span.trace_id().to_string();
                            let span_id = span.span_id().to_string();
                            let size = span.byte_estimate();
                            if !retry_queue.try_enqueue(span, size) {
                                warn!(%trace_id, %span_id, "span retry queue full, dropping span");
                            }
                        }
                    }
                    None => {
                        for span in &batch {
                            let trace_id = span.trace_id().to_string();
                            let span_id = span.span_id().to_string();
                            warn!(%trace_id, %span_id, %err, "dropping span after failed retry");
                            events.emit(
                                FinishEventKind::FlushSpan,
                                false,
                                &detail,
                                &trace_id,
                                &span_id,
                            );
                        }
                    }
                }
            }
        }
    }
}

fn file_export_fn(
    exporter: Arc<dyn Exporter>,
    retry: Option<QueueSender<UploadFile>>,
    events: EventSink,
) -> impl FnMut(Vec<UploadFile>) + Send + 'static {
    move |batch: Vec<UploadFile>| match exporter.export_files(&batch) {
        Ok(()) => {
            for file in &batch {
                events.emit(FinishEventKind::FlushFile, true, &file.tos_key, "", "");
            }
        }
        Err(err) => {
            let detail = format!("file export failed: {err}");
            match &retry {
                // As with spans, the fail event fires once, at the
                // final drop from the retry queue.
                Some(retry_queue) => {
                    debug!(count = batch.len(), %err, "re-queueing failed file batch for retry");
                    for file in batch {
                        let size = file.data.len();
                        let tos_key = file.tos_key.clone();
                        if !retry_queue.try_enqueue(file, size) {
                            warn!(%tos_key, "file retry queue full, dropping file");
                        }
                    }
                }
                None => {
                    for file in &batch {
                        warn!(tos_key = %file.tos_key, %err, "dropping file after failed retry");
                        events.emit(FinishEventKind::FlushFile, false, &detail, "", "");
                    }
                }
            }
        }
    }
}

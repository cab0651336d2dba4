//! End-to-end pipeline scenarios against an in-memory exporter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use cozeloop::trace::{Exporter, UploadFile, UploadSpan};
use cozeloop::{
    propagation, Client, FinishEvent, FinishEventKind, InMemoryExporter, QueueConfig, SpanBuilder,
};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn quiet_queue(base: QueueConfig) -> QueueConfig {
    // Interval flushes off so tests observe only explicit drains.
    QueueConfig {
        flush_interval: Duration::from_secs(600),
        ..base
    }
}

fn quiet_client_builder(exporter: &InMemoryExporter) -> cozeloop::ClientBuilder {
    Client::builder()
        .workspace_id("7001")
        .exporter(Arc::new(exporter.clone()))
        .install_signal_handler(false)
        .span_queue(quiet_queue(QueueConfig::span_default()))
        .span_retry_queue(quiet_queue(QueueConfig::span_retry_default()))
        .file_queue(quiet_queue(QueueConfig::file_default()))
        .file_retry_queue(quiet_queue(QueueConfig::file_retry_default()))
}

fn event_collector() -> (Arc<Mutex<Vec<FinishEvent>>>, cozeloop::FinishEventHandler) {
    let events: Arc<Mutex<Vec<FinishEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let handler: cozeloop::FinishEventHandler = Arc::new(move |event: &FinishEvent| {
        sink.lock().unwrap().push(event.clone());
    });
    (events, handler)
}

#[test]
fn happy_path_exports_single_root_span() {
    let exporter = InMemoryExporter::new();
    let client = quiet_client_builder(&exporter).build().unwrap();

    let span = client.start_span("op", "custom");
    span.set_input("hello");
    span.set_output("world");
    span.finish();
    client.flush(FLUSH_TIMEOUT).unwrap();

    let batches = exporter.span_batches();
    assert_eq!(batches.len(), 1, "expected exactly one span export call");
    assert_eq!(batches[0].len(), 1);
    let exported = &batches[0][0];
    assert_eq!(exported.parent_id, "0");
    assert_eq!(exported.status_code, 0);
    assert_eq!(exported.input, "hello");
    assert_eq!(exported.output, "world");
    assert_eq!(exported.trace_id.len(), 32);
    assert_eq!(exported.span_id.len(), 16);
    assert!(exporter.file_batches().is_empty(), "no file export expected");
}

#[test]
fn parent_and_child_export_together() {
    let exporter = InMemoryExporter::new();
    let client = quiet_client_builder(&exporter).build().unwrap();

    let parent = client.start_span("A", "custom");
    let child = {
        let _guard = parent.set_as_current();
        let child = client.start_span("B", "model");
        child.set_model_name("gpt-4o");
        child
    };
    child.finish();
    parent.finish();
    client.flush(FLUSH_TIMEOUT).unwrap();

    let batches = exporter.span_batches();
    assert_eq!(batches.len(), 1, "both spans should share one export call");
    let spans = &batches[0];
    assert_eq!(spans.len(), 2);
    let a = spans.iter().find(|s| s.span_name == "A").unwrap();
    let b = spans.iter().find(|s| s.span_name == "B").unwrap();
    assert_eq!(a.parent_id, "0");
    assert_eq!(b.parent_id, a.span_id);
    assert_eq!(b.trace_id, a.trace_id);
    assert_eq!(b.tags_string["model_name"], "gpt-4o");
}

#[test]
fn failed_spans_retry_once_then_drop() {
    let exporter = InMemoryExporter::new();
    exporter.fail_spans(true);
    let (events, handler) = event_collector();
    let client = quiet_client_builder(&exporter)
        .finish_event_handler(handler)
        .build()
        .unwrap();

    let mut span_ids = Vec::new();
    for i in 0..3 {
        let span = client.start_span(format!("doomed-{i}"), "custom");
        span_ids.push(span.span_id().to_string());
        span.finish();
    }
    client.close(FLUSH_TIMEOUT).unwrap();

    // Each span is submitted exactly twice: primary then retry.
    let mut submissions: HashMap<String, usize> = HashMap::new();
    for span in exporter.finished_spans() {
        *submissions.entry(span.span_id).or_default() += 1;
    }
    for span_id in &span_ids {
        assert_eq!(submissions[span_id], 2, "span {span_id} submissions");
    }

    let events = events.lock().unwrap();
    let flush_failures = events
        .iter()
        .filter(|e| e.kind == FinishEventKind::FlushSpan && !e.ok)
        .count();
    assert_eq!(flush_failures, 3, "one fail event per span, at its final drop");

    // Nothing lingers for a later export.
    drop(events);
    assert_eq!(exporter.finished_spans().len(), 6);
}

#[test]
fn header_round_trip_recovers_identifiers_and_baggage() {
    let exporter = InMemoryExporter::new();
    let client = quiet_client_builder(&exporter).build().unwrap();

    let span = client.start_span("outbound", "custom");
    span.set_baggage([("k", "v"), ("x", "y z")]);
    let headers = span.to_header();
    assert!(headers.contains_key("x-cozeloop-traceparent"));

    // The receiving process sees only the header map.
    let remote = propagation::extract(&headers).unwrap();
    assert_eq!(remote.trace_id, span.trace_id());
    assert_eq!(remote.span_id, span.span_id());
    assert_eq!(remote.baggage["k"], "v");
    assert_eq!(remote.baggage["x"], "y z");

    let continued = SpanBuilder::new("inbound", "custom")
        .with_parent(remote)
        .start(&client);
    assert_eq!(continued.trace_id(), span.trace_id());
    assert_eq!(continued.parent_span_id(), span.span_id());
    assert_eq!(continued.baggage()["x"], "y z");
}

#[test]
fn oversize_input_is_extracted_to_file_upload() {
    let exporter = InMemoryExporter::new();
    let client = quiet_client_builder(&exporter)
        .ultra_large_report(true)
        .build()
        .unwrap();

    let payload = "x".repeat(2 * 1024 * 1024);
    let span = client.start_span("big", "custom");
    span.set_input(payload.clone());
    span.finish();
    client.flush(FLUSH_TIMEOUT).unwrap();

    let spans = exporter.finished_spans();
    assert_eq!(spans.len(), 1);
    let exported = &spans[0];
    assert_ne!(exported.input, payload, "input should be a reference");
    assert!(exported.input.ends_with("_text_large_text"));

    let index: HashMap<String, Vec<String>> =
        serde_json::from_str(&exported.object_storage).unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index["input"], vec![exported.input.clone()]);

    let file_batches = exporter.file_batches();
    assert_eq!(file_batches.len(), 1, "expected exactly one file export call");
    assert_eq!(file_batches[0].len(), 1);
    let file = &file_batches[0][0];
    assert!(file.tos_key.ends_with("_text_large_text"));
    assert_eq!(file.data.len(), payload.len());
}

/// An exporter whose span exports block until the gate opens.
#[derive(Debug)]
struct GatedExporter {
    inner: InMemoryExporter,
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedExporter {
    fn new(inner: InMemoryExporter) -> Self {
        GatedExporter {
            inner,
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    fn open_gate(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    fn wait_for_entry(&self) {
        while self.entered.load(Ordering::SeqCst) == 0 {
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Exporter for GatedExporter {
    fn export_spans(&self, spans: &[UploadSpan]) -> cozeloop::Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        self.inner.export_spans(spans)
    }

    fn export_files(&self, files: &[UploadFile]) -> cozeloop::Result<()> {
        self.inner.export_files(files)
    }
}

#[test]
fn overflowing_span_queue_drops_instead_of_blocking() {
    let recording = InMemoryExporter::new();
    let gated = Arc::new(GatedExporter::new(recording.clone()));
    let (events, handler) = event_collector();

    let client = Client::builder()
        .workspace_id("7001")
        .exporter(gated.clone())
        .finish_event_handler(handler)
        .install_signal_handler(false)
        .span_queue(QueueConfig {
            max_queue_length: 4,
            max_batch_length: 1,
            ..quiet_queue(QueueConfig::span_default())
        })
        .span_retry_queue(quiet_queue(QueueConfig::span_retry_default()))
        .file_queue(quiet_queue(QueueConfig::file_default()))
        .file_retry_queue(quiet_queue(QueueConfig::file_retry_default()))
        .build()
        .unwrap();

    // Occupy the consumer inside a blocked export.
    client.start_span("plug", "custom").finish();
    gated.wait_for_entry();

    // Ten more spans race against a stalled consumer: the queue holds
    // at most four, the rest drop.
    for i in 0..10 {
        client.start_span(format!("burst-{i}"), "custom").finish();
    }

    let dropped = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| e.kind == FinishEventKind::SpanQueueEntry && !e.ok)
        .count();
    assert_eq!(dropped, 6, "queue of 4 must shed 6 of 10 spans");

    gated.open_gate();
    client.close(FLUSH_TIMEOUT).unwrap();

    // The plug span plus the four that fit.
    assert_eq!(recording.finished_spans().len(), 5);
}

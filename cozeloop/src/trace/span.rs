use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use crate::client::Client;
use crate::config::TagLimits;
use crate::context::{Context, ContextGuard};
use crate::trace::span_processor::SpanProcessor;
use crate::trace::{SpanContext, SpanId, TraceId};

// Reserved system tag carrying the error message set by `set_error`.
const ERROR_TAG: &str = "error";
// Derived system tag: input_tokens + output_tokens.
const TOKENS_TAG: &str = "tokens";

const MODEL_NAME_TAG: &str = "model_name";
const MODEL_PROVIDER_TAG: &str = "model_provider";
const INPUT_TOKENS_TAG: &str = "input_tokens";
const OUTPUT_TOKENS_TAG: &str = "output_tokens";
const CALL_OPTIONS_TAG: &str = "call_options";
const LATENCY_FIRST_RESP_TAG: &str = "latency_first_resp";
const PROMPT_KEY_TAG: &str = "prompt_key";
const PROMPT_VERSION_TAG: &str = "prompt_version";
const RUNTIME_TAG: &str = "runtime";
const USER_ID_TAG: &str = "user_id";
const MESSAGE_ID_TAG: &str = "message_id";
const THREAD_ID_TAG: &str = "thread_id";
const DEPLOYMENT_ENV_TAG: &str = "deployment_env";

/// A typed attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    /// UTF-8 text.
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
}

impl TagValue {
    pub(crate) fn byte_len(&self) -> usize {
        match self {
            TagValue::Str(s) => s.len(),
            TagValue::Int(_) | TagValue::Float(_) => 8,
            TagValue::Bool(_) => 1,
        }
    }

    // Truncation happens at set time so queued sizes stay bounded.
    fn truncate_to(&mut self, cap: usize) {
        if let TagValue::Str(s) = self {
            if s.len() > cap {
                let mut end = cap;
                while end > 0 && !s.is_char_boundary(end) {
                    end -= 1;
                }
                s.truncate(end);
            }
        }
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_owned())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        TagValue::Int(value.into())
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Float(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

/// Structured values are serialized to their JSON text form.
impl From<serde_json::Value> for TagValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => TagValue::Str(s),
            serde_json::Value::Bool(b) => TagValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    TagValue::Int(i)
                } else {
                    TagValue::Float(n.as_f64().unwrap_or_default())
                }
            }
            other => TagValue::Str(other.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SpanState {
    pub(crate) duration_micros: i64,
    pub(crate) status_code: i32,
    pub(crate) log_id: String,
    pub(crate) tags: HashMap<String, TagValue>,
    pub(crate) system_tags: HashMap<String, TagValue>,
    pub(crate) input: Option<serde_json::Value>,
    pub(crate) output: Option<serde_json::Value>,
    pub(crate) input_bytes: usize,
    pub(crate) output_bytes: usize,
    pub(crate) baggage: HashMap<String, String>,
    pub(crate) tag_bytes: usize,
}

#[derive(Debug)]
struct SpanInner {
    trace_id: TraceId,
    span_id: SpanId,
    parent_span_id: SpanId,
    name: String,
    span_type: String,
    workspace_id: String,
    service_name: String,
    start_time: SystemTime,
    started_at_micros: i64,
    limits: TagLimits,
    finished: AtomicBool,
    state: Mutex<SpanState>,
    processor: Arc<dyn SpanProcessor>,
}

/// A timed, named unit of work.
///
/// `Span` is a cheaply cloneable handle; all clones refer to the same
/// record. Recording methods never fail and never panic into the
/// caller: out-of-bound writes are dropped and logged at debug level.
/// After [`finish`](Span::finish) the record is immutable and further
/// setter calls have no effect.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Span")
            .field("trace_id", &self.inner.trace_id)
            .field("span_id", &self.inner.span_id)
            .field("name", &self.inner.name)
            .field("finished", &self.inner.finished.load(Ordering::Relaxed))
            .finish()
    }
}

impl Span {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        trace_id: TraceId,
        span_id: SpanId,
        parent_span_id: SpanId,
        name: String,
        span_type: String,
        workspace_id: String,
        service_name: String,
        start_time: SystemTime,
        baggage: HashMap<String, String>,
        limits: TagLimits,
        processor: Arc<dyn SpanProcessor>,
    ) -> Self {
        let started_at_micros = unix_micros(start_time);
        Span {
            inner: Arc::new(SpanInner {
                trace_id,
                span_id,
                parent_span_id,
                name,
                span_type,
                workspace_id,
                service_name,
                start_time,
                started_at_micros,
                limits,
                finished: AtomicBool::new(false),
                state: Mutex::new(SpanState {
                    baggage,
                    ..SpanState::default()
                }),
                processor,
            }),
        }
    }

    /// The trace this span belongs to.
    pub fn trace_id(&self) -> TraceId {
        self.inner.trace_id
    }

    /// This span's id.
    pub fn span_id(&self) -> SpanId {
        self.inner.span_id
    }

    /// The parent span id; [`SpanId::ZERO`] for a trace root.
    pub fn parent_span_id(&self) -> SpanId {
        self.inner.parent_span_id
    }

    /// The span name given at start.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The span type given at start.
    pub fn span_type(&self) -> &str {
        &self.inner.span_type
    }

    /// Whether [`finish`](Span::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// A snapshot of the current baggage.
    pub fn baggage(&self) -> HashMap<String, String> {
        self.with_state(|state| state.baggage.clone())
    }

    /// Installs this span as the active span of the current scope.
    pub fn set_as_current(&self) -> ContextGuard {
        Context::current_with_span(self.clone()).attach()
    }

    /// Serializes this span's identifiers and baggage into a header
    /// map for propagation to a downstream process.
    pub fn to_header(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        crate::propagation::inject_span(self, &mut headers);
        headers
    }

    /// Records the span input. Structured values are normalized to
    /// JSON; plain strings are kept as-is.
    pub fn set_input<T: Serialize>(&self, input: T) {
        self.set_payload(input, true);
    }

    /// Records the span output.
    pub fn set_output<T: Serialize>(&self, output: T) {
        self.set_payload(output, false);
    }

    fn set_payload<T: Serialize>(&self, payload: T, is_input: bool) {
        if self.is_finished() {
            return;
        }
        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(err) => {
                debug!(span_id = %self.inner.span_id, %err, "dropping unserializable payload");
                return;
            }
        };
        let encoded_len = match &value {
            serde_json::Value::String(s) => s.len(),
            other => other.to_string().len(),
        };
        self.with_state(|state| {
            if is_input {
                state.input = Some(value);
                state.input_bytes = encoded_len;
            } else {
                state.output = Some(value);
                state.output_bytes = encoded_len;
            }
        });
    }

    /// Records an error message under the reserved `error` system tag.
    ///
    /// The status code is left untouched; callers that want a non-zero
    /// status set it explicitly with [`set_status_code`](Span::set_status_code).
    pub fn set_error(&self, message: impl Into<String>) {
        self.insert_tag(ERROR_TAG.to_owned(), TagValue::Str(message.into()), true);
    }

    /// Sets the span status code; `0` means success.
    pub fn set_status_code(&self, status_code: i32) {
        if self.is_finished() {
            return;
        }
        self.with_state(|state| state.status_code = status_code);
    }

    /// Sets the log id correlating this span with request logs.
    pub fn set_log_id(&self, log_id: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        let log_id = log_id.into();
        self.with_state(|state| state.log_id = log_id);
    }

    /// Sets a single tag.
    pub fn set_tag(&self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.insert_tag(key.into(), value.into(), false);
    }

    /// Merges a batch of tags.
    pub fn set_tags<K, V>(&self, tags: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<TagValue>,
    {
        for (key, value) in tags {
            self.insert_tag(key.into(), value.into(), false);
        }
    }

    /// Merges baggage entries.
    ///
    /// Baggage propagates to child spans and across processes through
    /// the wire carrier; it is not exported with the span itself.
    pub fn set_baggage<K, V>(&self, baggage: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        if self.is_finished() {
            return;
        }
        self.with_state(|state| {
            for (key, value) in baggage {
                state.baggage.insert(key.into(), value.into());
            }
        });
    }

    /// Sets a single baggage entry.
    pub fn set_baggage_item(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set_baggage([(key.into(), value.into())]);
    }

    /// Records the model name, e.g. `gpt-4o`.
    pub fn set_model_name(&self, model_name: impl Into<String>) {
        self.set_tag(MODEL_NAME_TAG, model_name.into());
    }

    /// Records the model provider, e.g. `openai`.
    pub fn set_model_provider(&self, provider: impl Into<String>) {
        self.set_tag(MODEL_PROVIDER_TAG, provider.into());
    }

    /// Records the prompt token count and refreshes the derived total.
    pub fn set_input_tokens(&self, tokens: i64) {
        self.set_tag(INPUT_TOKENS_TAG, tokens);
        self.update_token_total();
    }

    /// Records the completion token count and refreshes the derived total.
    pub fn set_output_tokens(&self, tokens: i64) {
        self.set_tag(OUTPUT_TOKENS_TAG, tokens);
        self.update_token_total();
    }

    /// Records model call options as a JSON tag.
    pub fn set_call_options<T: Serialize>(&self, options: T) {
        match serde_json::to_string(&options) {
            Ok(json) => self.set_tag(CALL_OPTIONS_TAG, json),
            Err(err) => debug!(%err, "dropping unserializable call options"),
        }
    }

    /// Records the latency to the first streamed response.
    pub fn set_latency_first_resp(&self, latency: Duration) {
        self.set_tag(LATENCY_FIRST_RESP_TAG, latency.as_micros() as i64);
    }

    /// Records the prompt hub key.
    pub fn set_prompt_key(&self, prompt_key: impl Into<String>) {
        self.set_tag(PROMPT_KEY_TAG, prompt_key.into());
    }

    /// Records the prompt hub version.
    pub fn set_prompt_version(&self, version: impl Into<String>) {
        self.set_tag(PROMPT_VERSION_TAG, version.into());
    }

    /// Records the runtime environment, e.g. `rust`.
    pub fn set_runtime(&self, runtime: impl Into<String>) {
        self.set_tag(RUNTIME_TAG, runtime.into());
    }

    /// Records the end-user id.
    pub fn set_user_id(&self, user_id: impl Into<String>) {
        self.set_tag(USER_ID_TAG, user_id.into());
    }

    /// Records the message id.
    pub fn set_message_id(&self, message_id: impl Into<String>) {
        self.set_tag(MESSAGE_ID_TAG, message_id.into());
    }

    /// Records the conversation thread id.
    pub fn set_thread_id(&self, thread_id: impl Into<String>) {
        self.set_tag(THREAD_ID_TAG, thread_id.into());
    }

    /// Records the deployment environment, e.g. `production`.
    pub fn set_deployment_env(&self, env: impl Into<String>) {
        self.set_tag(DEPLOYMENT_ENV_TAG, env.into());
    }

    /// Finishes the span and hands it to the reporting pipeline.
    ///
    /// Idempotent: only the first call enqueues the span.
    pub fn finish(&self) {
        self.finish_with_end_time(SystemTime::now());
    }

    /// Finishes the span with an explicit end time.
    pub fn finish_with_end_time(&self, end_time: SystemTime) {
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        let duration = end_time
            .duration_since(self.inner.start_time)
            .unwrap_or_default()
            .as_micros() as i64;
        self.with_state(|state| state.duration_micros = duration);
        self.inner.processor.on_span_end(self.clone());
    }

    fn update_token_total(&self) {
        if self.is_finished() {
            return;
        }
        let total = self.with_state(|state| {
            let input = tag_int(&state.tags, INPUT_TOKENS_TAG);
            let output = tag_int(&state.tags, OUTPUT_TOKENS_TAG);
            input.unwrap_or(0) + output.unwrap_or(0)
        });
        self.insert_tag(TOKENS_TAG.to_owned(), TagValue::Int(total), true);
    }

    fn insert_tag(&self, key: String, mut value: TagValue, system: bool) {
        if self.is_finished() {
            return;
        }
        let limits = self.inner.limits;
        if key.len() > limits.max_tag_key_bytes {
            debug!(span_id = %self.inner.span_id, key_len = key.len(), "dropping tag with oversize key");
            return;
        }
        value.truncate_to(limits.max_tag_value_bytes);
        self.with_state(|state| {
            let map = if system {
                &mut state.system_tags
            } else {
                // The count cap applies to caller-written tags only.
                if !state.tags.contains_key(&key) && state.tags.len() >= limits.max_tag_count {
                    debug!(span_id = %self.inner.span_id, key = %key, "dropping tag beyond count limit");
                    return;
                }
                &mut state.tags
            };
            if let Some(previous) = map.get(&key) {
                state.tag_bytes = state.tag_bytes.saturating_sub(key.len() + previous.byte_len());
            }
            state.tag_bytes += key.len() + value.byte_len();
            map.insert(key, value);
        });
    }

    /// Rough payload size used for queue byte budgeting.
    pub(crate) fn byte_estimate(&self) -> usize {
        const FIXED_OVERHEAD: usize = 64;
        FIXED_OVERHEAD
            + self.inner.name.len()
            + self.with_state(|state| state.tag_bytes + state.input_bytes + state.output_bytes)
    }

    pub(crate) fn snapshot(&self) -> SpanSnapshot {
        let inner = &self.inner;
        self.with_state(|state| SpanSnapshot {
            trace_id: inner.trace_id,
            span_id: inner.span_id,
            parent_span_id: inner.parent_span_id,
            name: inner.name.clone(),
            span_type: inner.span_type.clone(),
            workspace_id: inner.workspace_id.clone(),
            service_name: inner.service_name.clone(),
            log_id: state.log_id.clone(),
            started_at_micros: inner.started_at_micros,
            duration_micros: state.duration_micros,
            status_code: state.status_code,
            tags: state.tags.clone(),
            system_tags: state.system_tags.clone(),
            input: state.input.clone(),
            output: state.output.clone(),
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SpanState) -> T) -> T {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

fn tag_int(tags: &HashMap<String, TagValue>, key: &str) -> Option<i64> {
    match tags.get(key) {
        Some(TagValue::Int(i)) => Some(*i),
        _ => None,
    }
}

fn unix_micros(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or_default()
}

/// An immutable copy of a finished span, fed to the transform step.
#[derive(Clone, Debug)]
pub(crate) struct SpanSnapshot {
    pub(crate) trace_id: TraceId,
    pub(crate) span_id: SpanId,
    pub(crate) parent_span_id: SpanId,
    pub(crate) name: String,
    pub(crate) span_type: String,
    pub(crate) workspace_id: String,
    pub(crate) service_name: String,
    pub(crate) log_id: String,
    pub(crate) started_at_micros: i64,
    pub(crate) duration_micros: i64,
    pub(crate) status_code: i32,
    pub(crate) tags: HashMap<String, TagValue>,
    pub(crate) system_tags: HashMap<String, TagValue>,
    pub(crate) input: Option<serde_json::Value>,
    pub(crate) output: Option<serde_json::Value>,
}

/// Options for starting a span.
///
/// The suggested span types are `model`, `tool`, `retriever`,
/// `prompt_hub`, `prompt_template` and `custom`; unknown types are
/// forwarded to the backend unchanged.
#[derive(Clone, Debug)]
pub struct SpanBuilder {
    /// Span name.
    pub name: String,
    /// Span classification.
    pub span_type: String,
    /// Explicit start time; defaults to now.
    pub start_time: Option<SystemTime>,
    /// Explicit parent recovered from wire headers.
    pub parent: Option<SpanContext>,
    /// Start a fresh trace even when an ambient parent exists.
    pub start_new_trace: bool,
    /// Override the client's workspace id for this span.
    pub workspace_id: Option<String>,
}

impl SpanBuilder {
    /// Creates a builder for a span named `name` of type `span_type`.
    pub fn new(name: impl Into<String>, span_type: impl Into<String>) -> Self {
        SpanBuilder {
            name: name.into(),
            span_type: span_type.into(),
            start_time: None,
            parent: None,
            start_new_trace: false,
            workspace_id: None,
        }
    }

    /// Sets an explicit start time.
    pub fn with_start_time(mut self, start_time: SystemTime) -> Self {
        self.start_time = Some(start_time);
        self
    }

    /// Parents the span on a context recovered from wire headers.
    pub fn with_parent(mut self, parent: SpanContext) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Starts a fresh trace, ignoring any ambient parent.
    pub fn with_new_trace(mut self) -> Self {
        self.start_new_trace = true;
        self
    }

    /// Overrides the workspace id for this span.
    pub fn with_workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    /// Starts the span on `client`.
    pub fn start(self, client: &Client) -> Span {
        client.build_span(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::trace::span_processor::SpanProcessor;
    use crate::trace::{RandomIdGenerator, IdGenerator};
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, Default)]
    struct RecordingProcessor {
        ended: StdMutex<Vec<Span>>,
    }

    impl SpanProcessor for RecordingProcessor {
        fn on_span_end(&self, span: Span) {
            self.ended.lock().unwrap().push(span);
        }

        fn force_flush(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }

        fn shutdown(&self, _timeout: Duration) -> Result<()> {
            Ok(())
        }
    }

    fn span_with(processor: Arc<RecordingProcessor>, limits: TagLimits) -> Span {
        let ids = RandomIdGenerator::default();
        Span::start(
            ids.new_trace_id(),
            ids.new_span_id(),
            SpanId::ZERO,
            "op".to_owned(),
            "custom".to_owned(),
            "7001".to_owned(),
            String::new(),
            SystemTime::now(),
            HashMap::new(),
            limits,
            processor,
        )
    }

    fn test_span() -> (Arc<RecordingProcessor>, Span) {
        let processor = Arc::new(RecordingProcessor::default());
        let span = span_with(processor.clone(), TagLimits::default());
        (processor, span)
    }

    #[test]
    fn finish_enqueues_exactly_once() {
        let (processor, span) = test_span();
        span.finish();
        span.finish();
        span.finish();
        assert_eq!(processor.ended.lock().unwrap().len(), 1);
        assert!(span.is_finished());
    }

    #[test]
    fn finish_with_end_time_sets_duration() {
        let (processor, span) = test_span();
        let end = span.inner.start_time + Duration::from_millis(250);
        span.finish_with_end_time(end);
        let ended = processor.ended.lock().unwrap();
        let duration = ended[0].with_state(|state| state.duration_micros);
        assert_eq!(duration, 250_000);
    }

    #[test]
    fn mutation_after_finish_is_ignored() {
        let (_processor, span) = test_span();
        span.set_tag("before", "kept");
        span.finish();
        span.set_tag("after", "dropped");
        span.set_input("late");
        span.set_status_code(500);

        let snapshot = span.snapshot();
        assert!(snapshot.tags.contains_key("before"));
        assert!(!snapshot.tags.contains_key("after"));
        assert!(snapshot.input.is_none());
        assert_eq!(snapshot.status_code, 0);
    }

    #[test]
    fn tag_count_is_capped() {
        let (_processor, span) = test_span();
        for i in 0..60 {
            span.set_tag(format!("key_{i}"), i as i64);
        }
        let snapshot = span.snapshot();
        assert_eq!(snapshot.tags.len(), 50);
        // Overwriting an existing key still works at the cap.
        span.set_tag("key_0", 999i64);
        assert_eq!(span.snapshot().tags["key_0"], TagValue::Int(999));
    }

    #[test]
    fn string_values_truncate_to_limit() {
        let processor = Arc::new(RecordingProcessor::default());
        let span = span_with(
            processor,
            TagLimits {
                max_tag_value_bytes: 8,
                ..TagLimits::default()
            },
        );
        span.set_tag("k", "0123456789abcdef");
        assert_eq!(span.snapshot().tags["k"], TagValue::Str("01234567".into()));
    }

    #[test]
    fn oversize_keys_drop_silently() {
        let processor = Arc::new(RecordingProcessor::default());
        let span = span_with(
            processor,
            TagLimits {
                max_tag_key_bytes: 4,
                ..TagLimits::default()
            },
        );
        span.set_tag("toolong", "v");
        assert!(span.snapshot().tags.is_empty());
    }

    #[test]
    fn error_tag_leaves_status_untouched() {
        let (_processor, span) = test_span();
        span.set_error("model exploded");
        let snapshot = span.snapshot();
        assert_eq!(
            snapshot.system_tags["error"],
            TagValue::Str("model exploded".into())
        );
        assert_eq!(snapshot.status_code, 0);
    }

    #[test]
    fn llm_setters_use_well_known_keys() {
        let (_processor, span) = test_span();
        span.set_model_name("gpt-4o");
        span.set_model_provider("openai");
        span.set_input_tokens(12);
        span.set_output_tokens(30);
        span.set_user_id("u-1");

        let snapshot = span.snapshot();
        assert_eq!(snapshot.tags["model_name"], TagValue::Str("gpt-4o".into()));
        assert_eq!(snapshot.tags["model_provider"], TagValue::Str("openai".into()));
        assert_eq!(snapshot.tags["input_tokens"], TagValue::Int(12));
        assert_eq!(snapshot.tags["output_tokens"], TagValue::Int(30));
        assert_eq!(snapshot.tags["user_id"], TagValue::Str("u-1".into()));
        assert_eq!(snapshot.system_tags["tokens"], TagValue::Int(42));
    }

    #[test]
    fn baggage_merges() {
        let (_processor, span) = test_span();
        span.set_baggage([("a", "1"), ("b", "2")]);
        span.set_baggage_item("b", "3");
        let baggage = span.baggage();
        assert_eq!(baggage["a"], "1");
        assert_eq!(baggage["b"], "3");
    }

    #[test]
    fn structured_tag_values_serialize_to_strings() {
        let (_processor, span) = test_span();
        span.set_tag("structured", serde_json::json!({"nested": [1, 2]}));
        match &span.snapshot().tags["structured"] {
            TagValue::Str(s) => assert_eq!(s, "{\"nested\":[1,2]}"),
            other => panic!("expected string tag, got {other:?}"),
        }
    }

    #[test]
    fn byte_estimate_grows_with_content() {
        let (_processor, span) = test_span();
        let before = span.byte_estimate();
        span.set_input("x".repeat(1000));
        span.set_tag("k", "v".repeat(100));
        assert!(span.byte_estimate() >= before + 1100);
    }
}

//! Maps finished spans onto their upload representation, extracting
//! oversize and binary content into side-channel file records.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use serde_json::Value;
use tracing::debug;

use crate::trace::span::{Span, SpanSnapshot, TagValue};
use crate::trace::upload::{UploadFile, UploadSpan};

// Encoded payloads above this size are extracted (ultra-large
// reporting) or truncated.
pub(crate) const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
// Inline base64 blobs below this size are left in place.
pub(crate) const MIN_BINARY_EXTRACT_BYTES: usize = 1024;

const LARGE_TEXT_SUFFIX: &str = "text_large_text";
const BINARY_KINDS: [&str; 4] = ["image", "audio", "video", "file"];

type SuffixSource = Box<dyn Fn() -> String + Send + Sync>;

/// Pure span-to-wire transformation.
///
/// Stateless apart from the configuration captured at construction;
/// given the same spans and the same suffix source the output is
/// deterministic.
pub(crate) struct Transformer {
    workspace_id: String,
    ultra_large_report: bool,
    max_payload_bytes: usize,
    suffix: SuffixSource,
}

impl fmt::Debug for Transformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transformer")
            .field("workspace_id", &self.workspace_id)
            .field("ultra_large_report", &self.ultra_large_report)
            .finish()
    }
}

impl Transformer {
    pub(crate) fn new(workspace_id: String, ultra_large_report: bool) -> Self {
        Transformer {
            workspace_id,
            ultra_large_report,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            suffix: Box::new(random_suffix),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_suffix_source(
        mut self,
        suffix: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.suffix = Box::new(suffix);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Transforms a batch of finished spans into upload spans plus the
    /// file records extracted from them.
    pub(crate) fn transform(&self, spans: &[Span]) -> (Vec<UploadSpan>, Vec<UploadFile>) {
        let mut upload_spans = Vec::with_capacity(spans.len());
        let mut upload_files = Vec::new();
        for span in spans {
            upload_spans.push(self.transform_span(span.snapshot(), &mut upload_files));
        }
        (upload_spans, upload_files)
    }

    fn transform_span(&self, snapshot: SpanSnapshot, files: &mut Vec<UploadFile>) -> UploadSpan {
        let workspace_id = if snapshot.workspace_id.is_empty() {
            self.workspace_id.clone()
        } else {
            snapshot.workspace_id.clone()
        };

        let mut span = UploadSpan {
            trace_id: snapshot.trace_id.to_string(),
            span_id: snapshot.span_id.to_string(),
            parent_id: snapshot.parent_span_id.to_parent_string(),
            span_type: snapshot.span_type.clone(),
            span_name: snapshot.name.clone(),
            started_at_micros: snapshot.started_at_micros,
            duration_micros: snapshot.duration_micros,
            status_code: snapshot.status_code,
            workspace_id: workspace_id.clone(),
            service_name: snapshot.service_name.clone(),
            log_id: snapshot.log_id.clone(),
            ..UploadSpan::default()
        };

        for (key, value) in &snapshot.tags {
            match value {
                TagValue::Str(s) => {
                    span.tags_string.insert(key.clone(), s.clone());
                }
                TagValue::Int(i) => {
                    span.tags_long.insert(key.clone(), *i);
                }
                TagValue::Float(f) => {
                    span.tags_double.insert(key.clone(), *f);
                }
                TagValue::Bool(b) => {
                    span.tags_bool.insert(key.clone(), *b);
                }
            }
        }
        for (key, value) in &snapshot.system_tags {
            match value {
                TagValue::Str(s) => {
                    span.system_tags_string.insert(key.clone(), s.clone());
                }
                TagValue::Int(i) => {
                    span.system_tags_long.insert(key.clone(), *i);
                }
                TagValue::Float(f) => {
                    span.system_tags_double.insert(key.clone(), *f);
                }
                // System tags carry no boolean column on the wire.
                TagValue::Bool(b) => {
                    span.system_tags_long.insert(key.clone(), i64::from(*b));
                }
            }
        }

        let mut storage_index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        span.input = self.render_payload(
            snapshot.input.clone(),
            &snapshot,
            "input",
            &workspace_id,
            files,
            &mut storage_index,
        );
        span.output = self.render_payload(
            snapshot.output.clone(),
            &snapshot,
            "output",
            &workspace_id,
            files,
            &mut storage_index,
        );
        if !storage_index.is_empty() {
            span.object_storage = serde_json::to_string(&storage_index).unwrap_or_default();
        }
        span
    }

    fn render_payload(
        &self,
        payload: Option<Value>,
        snapshot: &SpanSnapshot,
        field: &str,
        workspace_id: &str,
        files: &mut Vec<UploadFile>,
        storage_index: &mut BTreeMap<String, Vec<String>>,
    ) -> String {
        let Some(mut payload) = payload else {
            return String::new();
        };

        let mut keys = Vec::new();
        self.extract_binary_parts(&mut payload, snapshot, field, workspace_id, files, &mut keys);

        let mut text = match payload {
            Value::String(s) => s,
            other => other.to_string(),
        };

        if text.len() > self.max_payload_bytes {
            if self.ultra_large_report {
                let tos_key = format!(
                    "{}_{}_{}_{}",
                    snapshot.trace_id, snapshot.span_id, field, LARGE_TEXT_SUFFIX
                );
                files.push(UploadFile {
                    tos_key: tos_key.clone(),
                    space_id: workspace_id.to_owned(),
                    data: text.into_bytes(),
                    mime_hint: "text".to_owned(),
                });
                keys.push(tos_key.clone());
                text = tos_key;
            } else {
                debug!(
                    span_id = %snapshot.span_id,
                    field,
                    len = text.len(),
                    "truncating oversize payload"
                );
                let mut end = self.max_payload_bytes;
                while end > 0 && !text.is_char_boundary(end) {
                    end -= 1;
                }
                text.truncate(end);
            }
        }

        if !keys.is_empty() {
            storage_index.insert(field.to_owned(), keys);
        }
        text
    }

    // Walks a structured payload for inline base64 media parts and
    // moves each one into its own file record, leaving the tos key in
    // the part's place. Parts referencing a URL stay untouched.
    fn extract_binary_parts(
        &self,
        value: &mut Value,
        snapshot: &SpanSnapshot,
        field: &str,
        workspace_id: &str,
        files: &mut Vec<UploadFile>,
        keys: &mut Vec<String>,
    ) {
        match value {
            Value::Object(map) => {
                if let Some(kind) = binary_kind(map) {
                    if let Some(Value::String(data)) = map.get_mut("data") {
                        if data.len() >= MIN_BINARY_EXTRACT_BYTES {
                            if let Ok(bytes) = BASE64.decode(data.as_bytes()) {
                                let tos_key = format!(
                                    "{}_{}_{}_{}_{}",
                                    snapshot.trace_id,
                                    snapshot.span_id,
                                    field,
                                    kind,
                                    (self.suffix)()
                                );
                                files.push(UploadFile {
                                    tos_key: tos_key.clone(),
                                    space_id: workspace_id.to_owned(),
                                    data: bytes,
                                    mime_hint: kind,
                                });
                                keys.push(tos_key.clone());
                                *data = tos_key;
                                return;
                            }
                        }
                    }
                }
                for child in map.values_mut() {
                    self.extract_binary_parts(child, snapshot, field, workspace_id, files, keys);
                }
            }
            Value::Array(items) => {
                for child in items.iter_mut() {
                    self.extract_binary_parts(child, snapshot, field, workspace_id, files, keys);
                }
            }
            _ => {}
        }
    }
}

fn binary_kind(map: &serde_json::Map<String, Value>) -> Option<String> {
    if map.contains_key("url") {
        return None;
    }
    match map.get("type") {
        Some(Value::String(kind)) if BINARY_KINDS.contains(&kind.as_str()) => Some(kind.clone()),
        _ => None,
    }
}

fn random_suffix() -> String {
    let value = rand::thread_rng().gen::<u64>();
    format!("{value:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagLimits;
    use crate::trace::span_processor::tests::NoopProcessor;
    use crate::trace::{SpanId, TraceId};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn test_span() -> Span {
        Span::start(
            TraceId::from_u128(0xabcd),
            SpanId::from_u64(0x1234),
            SpanId::ZERO,
            "op".to_owned(),
            "custom".to_owned(),
            "7001".to_owned(),
            String::new(),
            SystemTime::now(),
            HashMap::new(),
            TagLimits::default(),
            Arc::new(NoopProcessor),
        )
    }

    fn transformer() -> Transformer {
        Transformer::new("7001".to_owned(), true).with_suffix_source(|| "feedface".to_owned())
    }

    #[test]
    fn plain_strings_stay_inline() {
        let span = test_span();
        span.set_input("hello");
        span.set_output("world");
        span.finish();

        let (spans, files) = transformer().transform(&[span]);
        assert_eq!(spans.len(), 1);
        assert!(files.is_empty());
        assert_eq!(spans[0].input, "hello");
        assert_eq!(spans[0].output, "world");
        assert_eq!(spans[0].object_storage, "");
        assert_eq!(spans[0].parent_id, "0");
    }

    #[test]
    fn tags_partition_by_type() {
        let span = test_span();
        span.set_tag("s", "v");
        span.set_tag("i", 7i64);
        span.set_tag("f", 0.5f64);
        span.set_tag("b", true);
        span.set_error("boom");
        span.finish();

        let (spans, _) = transformer().transform(&[span]);
        let up = &spans[0];
        assert_eq!(up.tags_string["s"], "v");
        assert_eq!(up.tags_long["i"], 7);
        assert_eq!(up.tags_double["f"], 0.5);
        assert!(up.tags_bool["b"]);
        assert_eq!(up.system_tags_string["error"], "boom");
    }

    #[test]
    fn oversize_payload_extracted_when_enabled() {
        let span = test_span();
        span.set_input("x".repeat(512));
        span.finish();

        let transformer = transformer().with_max_payload_bytes(256);
        let (spans, files) = transformer.transform(&[span]);
        assert_eq!(files.len(), 1);
        let expected_key = format!(
            "{}_{}_input_text_large_text",
            spans[0].trace_id, spans[0].span_id
        );
        assert_eq!(files[0].tos_key, expected_key);
        assert_eq!(files[0].data.len(), 512);
        assert_eq!(spans[0].input, expected_key);

        let index: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&spans[0].object_storage).unwrap();
        assert_eq!(index["input"], vec![expected_key]);
    }

    #[test]
    fn oversize_payload_truncated_when_disabled() {
        let span = test_span();
        span.set_input("x".repeat(512));
        span.finish();

        let transformer = Transformer::new("7001".to_owned(), false).with_max_payload_bytes(256);
        let (spans, files) = transformer.transform(&[span]);
        assert!(files.is_empty());
        assert_eq!(spans[0].input.len(), 256);
        assert_eq!(spans[0].object_storage, "");
    }

    #[test]
    fn multimodal_parts_extracted() {
        let blob = BASE64.encode(vec![0u8; 2048]);
        let span = test_span();
        span.set_input(json!({
            "messages": [
                {"role": "user", "content": "look at this"},
                {"type": "image", "data": blob},
                {"type": "image", "url": "https://example.com/cat.png"},
            ]
        }));
        span.finish();

        let (spans, files) = transformer().transform(&[span]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].data.len(), 2048);
        assert_eq!(files[0].mime_hint, "image");
        let expected_key = format!(
            "{}_{}_input_image_feedface",
            spans[0].trace_id, spans[0].span_id
        );
        assert_eq!(files[0].tos_key, expected_key);
        // The inline blob is replaced by the key; the URL part stays.
        assert!(spans[0].input.contains(&expected_key));
        assert!(spans[0].input.contains("https://example.com/cat.png"));

        let index: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&spans[0].object_storage).unwrap();
        assert_eq!(index["input"], vec![expected_key]);
    }

    #[test]
    fn storage_index_matches_emitted_files() {
        let blob = BASE64.encode(vec![1u8; 4096]);
        let span = test_span();
        span.set_input(json!([{"type": "audio", "data": blob}]));
        span.set_output("y".repeat(512));
        span.finish();

        let transformer = transformer().with_max_payload_bytes(256);
        let (spans, files) = transformer.transform(&[span]);

        let index: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&spans[0].object_storage).unwrap();
        let mut referenced: Vec<&String> = index.values().flatten().collect();
        referenced.sort();
        let mut emitted: Vec<&String> = files.iter().map(|f| &f.tos_key).collect();
        emitted.sort();
        assert_eq!(referenced, emitted);
    }

    #[test]
    fn small_inline_blobs_stay_inline() {
        let blob = BASE64.encode(vec![0u8; 16]);
        let span = test_span();
        span.set_input(json!({"type": "image", "data": blob}));
        span.finish();

        let (spans, files) = transformer().transform(&[span]);
        assert!(files.is_empty());
        assert!(spans[0].input.contains(&blob));
    }
}

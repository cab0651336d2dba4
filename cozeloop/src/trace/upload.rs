//! On-wire representations accepted by the ingestion service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A span in its upload form: identifiers as padded hex strings,
/// attribute maps partitioned by value type, and an `object_storage`
/// index referencing any content extracted into side-channel files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadSpan {
    /// 32 hex chars.
    pub trace_id: String,
    /// 16 hex chars.
    pub span_id: String,
    /// 16 hex chars, or the sentinel `"0"` for a trace root.
    pub parent_id: String,
    /// Span classification, e.g. `model`.
    pub span_type: String,
    /// Span name.
    pub span_name: String,
    /// Wall-clock start, unix microseconds.
    pub started_at_micros: i64,
    /// Span duration in microseconds.
    pub duration_micros: i64,
    /// `0` means success.
    pub status_code: i32,
    /// Owning workspace.
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    /// Reporting service, when configured.
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    /// Correlating log id, when set.
    pub log_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    /// Encoded input payload or an extracted-content reference.
    pub input: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    /// Encoded output payload or an extracted-content reference.
    pub output: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    /// JSON index mapping a field to the tos keys extracted from it.
    pub object_storage: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// String-valued user tags.
    pub tags_string: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// Integer-valued user tags.
    pub tags_long: HashMap<String, i64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// Float-valued user tags.
    pub tags_double: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// Boolean-valued user tags.
    pub tags_bool: HashMap<String, bool>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// String-valued system tags.
    pub system_tags_string: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// Integer-valued system tags.
    pub system_tags_long: HashMap<String, i64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    /// Float-valued system tags.
    pub system_tags_double: HashMap<String, f64>,
}

/// A side-channel payload extracted from a span, uploaded separately
/// from the span batch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadFile {
    /// Object storage key referenced from `UploadSpan::object_storage`.
    pub tos_key: String,
    /// Owning workspace.
    pub space_id: String,
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Content kind, e.g. `text` or `image`.
    pub mime_hint: String,
}

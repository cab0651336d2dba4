//! Client configuration and environment defaults.

use std::collections::hash_map::DefaultHasher;
use std::env;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::trace::{Exporter, FinishEventHandler};

/// Workspace id, read when the builder does not set one.
pub const ENV_WORKSPACE_ID: &str = "COZELOOP_WORKSPACE_ID";
/// Ingestion service base url.
pub const ENV_API_BASE_URL: &str = "COZELOOP_API_BASE_URL";
/// Toggle for an external local-file exporter; loaded into
/// [`Config::local_file_export_enabled`].
pub const ENV_LOCAL_FILE_EXPORT_ENABLED: &str = "COZELOOP_LOCAL_FILE_EXPORT_ENABLED";
/// File path for an external local-file exporter; loaded into
/// [`Config::local_file_export_path`].
pub const ENV_LOCAL_FILE_EXPORT_PATH: &str = "COZELOOP_LOCAL_FILE_EXPORT_PATH";

/// Default ingestion service base url.
pub const DEFAULT_API_BASE_URL: &str = "https://api.coze.cn";

const MIB: usize = 1024 * 1024;

/// Sizing of one pipeline queue and its batch worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueueConfig {
    /// Maximum buffered items; enqueue beyond this drops.
    pub max_queue_length: usize,
    /// Batch is dispatched at this many items.
    pub max_batch_length: usize,
    /// Batch is dispatched at this many accumulated bytes; doubles as
    /// the queue's buffered-byte budget.
    pub max_batch_bytes: usize,
    /// Batch is dispatched when this much time passed since the last flush.
    pub flush_interval: Duration,
}

impl QueueConfig {
    /// Defaults for the primary span queue.
    pub fn span_default() -> Self {
        QueueConfig {
            max_queue_length: 1024,
            max_batch_length: 100,
            max_batch_bytes: 4 * MIB,
            flush_interval: Duration::from_secs(1),
        }
    }

    /// Defaults for the span retry queue.
    pub fn span_retry_default() -> Self {
        QueueConfig {
            max_queue_length: 512,
            max_batch_length: 50,
            max_batch_bytes: 4 * MIB,
            flush_interval: Duration::from_secs(1),
        }
    }

    /// Defaults for the primary file queue.
    pub fn file_default() -> Self {
        QueueConfig {
            max_queue_length: 512,
            max_batch_length: 1,
            max_batch_bytes: 100 * MIB,
            flush_interval: Duration::from_secs(5),
        }
    }

    /// Defaults for the file retry queue.
    pub fn file_retry_default() -> Self {
        QueueConfig {
            max_queue_length: 512,
            max_batch_length: 1,
            max_batch_bytes: 100 * MIB,
            flush_interval: Duration::from_secs(5),
        }
    }
}

/// Bounds applied to span attributes at set time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TagLimits {
    /// Maximum number of caller-written tags per span.
    pub max_tag_count: usize,
    /// Maximum tag key length in bytes.
    pub max_tag_key_bytes: usize,
    /// String tag values are truncated to this many bytes.
    pub max_tag_value_bytes: usize,
}

impl Default for TagLimits {
    fn default() -> Self {
        TagLimits {
            max_tag_count: 50,
            max_tag_key_bytes: 1024,
            max_tag_value_bytes: 1024,
        }
    }
}

/// Everything a client needs to report traces.
///
/// `Config::default()` loads the environment variables above; the
/// [`ClientBuilder`](crate::client::ClientBuilder) layers explicit
/// settings on top.
#[derive(Clone)]
pub struct Config {
    /// Workspace spans are reported into.
    pub workspace_id: String,
    /// Ingestion service base url.
    pub api_base_url: String,
    /// Service name stamped onto every span; may be empty.
    pub service_name: String,
    /// Extract oversize payloads into side files instead of truncating.
    pub ultra_large_report: bool,
    /// Primary span queue sizing.
    pub span_queue: QueueConfig,
    /// Span retry queue sizing.
    pub span_retry_queue: QueueConfig,
    /// Primary file queue sizing.
    pub file_queue: QueueConfig,
    /// File retry queue sizing.
    pub file_retry_queue: QueueConfig,
    /// Attribute bounds.
    pub tag_limits: TagLimits,
    /// Replaces the default HTTP exporter when set.
    pub exporter: Option<Arc<dyn Exporter>>,
    /// Observer of the pipeline's own queueing and export lifecycle.
    pub finish_event_handler: Option<FinishEventHandler>,
    /// Hook for the prompt subsystem's tracing integration.
    pub enable_prompt_tracing: bool,
    /// Toggle read by an external local-file exporter; this crate
    /// ships no file sink of its own.
    pub local_file_export_enabled: bool,
    /// Path read by an external local-file exporter.
    pub local_file_export_path: Option<PathBuf>,
    /// Close cached clients on SIGINT/SIGTERM.
    pub install_signal_handler: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace_id: env::var(ENV_WORKSPACE_ID).unwrap_or_default(),
            api_base_url: env::var(ENV_API_BASE_URL)
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_owned()),
            service_name: String::new(),
            ultra_large_report: false,
            span_queue: QueueConfig::span_default(),
            span_retry_queue: QueueConfig::span_retry_default(),
            file_queue: QueueConfig::file_default(),
            file_retry_queue: QueueConfig::file_retry_default(),
            tag_limits: TagLimits::default(),
            exporter: None,
            finish_event_handler: None,
            enable_prompt_tracing: false,
            local_file_export_enabled: env::var(ENV_LOCAL_FILE_EXPORT_ENABLED)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false),
            local_file_export_path: env::var(ENV_LOCAL_FILE_EXPORT_PATH).ok().map(PathBuf::from),
            install_signal_handler: true,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("workspace_id", &self.workspace_id)
            .field("api_base_url", &self.api_base_url)
            .field("service_name", &self.service_name)
            .field("ultra_large_report", &self.ultra_large_report)
            .field("span_queue", &self.span_queue)
            .field("span_retry_queue", &self.span_retry_queue)
            .field("file_queue", &self.file_queue)
            .field("file_retry_queue", &self.file_retry_queue)
            .field("tag_limits", &self.tag_limits)
            .field("exporter", &self.exporter.as_ref().map(|_| "<custom>"))
            .field(
                "finish_event_handler",
                &self.finish_event_handler.as_ref().map(|_| "<handler>"),
            )
            .field("enable_prompt_tracing", &self.enable_prompt_tracing)
            .field("local_file_export_enabled", &self.local_file_export_enabled)
            .field("local_file_export_path", &self.local_file_export_path)
            .field("install_signal_handler", &self.install_signal_handler)
            .finish()
    }
}

impl Config {
    /// A stable fingerprint of the reporting-relevant settings, used
    /// to share one pipeline between identically configured clients.
    ///
    /// Returns `None` when the config carries a custom exporter or
    /// event handler: closures have no identity to compare, so such
    /// clients never share a pipeline.
    pub(crate) fn fingerprint(&self) -> Option<u64> {
        if self.exporter.is_some() || self.finish_event_handler.is_some() {
            return None;
        }
        let mut hasher = DefaultHasher::new();
        self.workspace_id.hash(&mut hasher);
        self.api_base_url.hash(&mut hasher);
        self.service_name.hash(&mut hasher);
        self.ultra_large_report.hash(&mut hasher);
        self.span_queue.hash(&mut hasher);
        self.span_retry_queue.hash(&mut hasher);
        self.file_queue.hash(&mut hasher);
        self.file_retry_queue.hash(&mut hasher);
        self.tag_limits.hash(&mut hasher);
        self.enable_prompt_tracing.hash(&mut hasher);
        self.local_file_export_enabled.hash(&mut hasher);
        self.local_file_export_path.hash(&mut hasher);
        Some(hasher.finish())
    }
}

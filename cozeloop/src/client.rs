//! Client construction, the shared-pipeline cache and lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::config::{Config, QueueConfig, TagLimits};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::trace::{
    BatchSpanProcessor, Exporter, FinishEventHandler, HttpExporter, IdGenerator,
    RandomIdGenerator, Span, SpanBuilder, SpanId, SpanProcessor,
};

const SIGNAL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Entry point of the SDK.
///
/// A `Client` owns (or shares) a reporting pipeline; it is cheap to
/// clone and safe to use from any thread. Clients built with an
/// identical configuration share one pipeline instance.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: Config,
    fingerprint: Option<u64>,
    processor: Arc<BatchSpanProcessor>,
    id_generator: RandomIdGenerator,
    closed: AtomicBool,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("workspace_id", &self.inner.config.workspace_id)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl Client {
    /// Creates a client from environment configuration.
    pub fn new() -> Result<Client> {
        Client::builder().build()
    }

    /// Creates a configurable client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder {
            config: Config::default(),
        }
    }

    /// Starts a span named `name` of type `span_type`, parented on the
    /// ambient current context.
    pub fn start_span(&self, name: impl Into<String>, span_type: impl Into<String>) -> Span {
        SpanBuilder::new(name, span_type).start(self)
    }

    pub(crate) fn build_span(&self, builder: SpanBuilder) -> Span {
        let generator = &self.inner.id_generator;
        let span_id = generator.new_span_id();

        let (trace_id, parent_span_id, baggage) = if let Some(parent) = builder.parent {
            (parent.trace_id, parent.span_id, parent.baggage)
        } else if builder.start_new_trace {
            (generator.new_trace_id(), SpanId::ZERO, HashMap::new())
        } else if let Some(parent) = Context::current().span() {
            (parent.trace_id(), parent.span_id(), parent.baggage())
        } else {
            (generator.new_trace_id(), SpanId::ZERO, HashMap::new())
        };

        Span::start(
            trace_id,
            span_id,
            parent_span_id,
            builder.name,
            builder.span_type,
            builder
                .workspace_id
                .unwrap_or_else(|| self.inner.config.workspace_id.clone()),
            self.inner.config.service_name.clone(),
            builder.start_time.unwrap_or_else(SystemTime::now),
            baggage,
            self.inner.config.tag_limits,
            self.inner.processor.clone() as Arc<dyn SpanProcessor>,
        )
    }

    /// Drains the pipeline, waiting up to `timeout`.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::AlreadyClosed);
        }
        self.inner.processor.force_flush(timeout)
    }

    /// Flushes, stops accepting spans and joins the pipeline workers.
    ///
    /// Spans finished after `close` are silently dropped. Returns
    /// [`Error::AlreadyClosed`] on repeated calls and
    /// [`Error::FlushTimeout`] when the drain outlived `timeout`.
    pub fn close(&self, timeout: Duration) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }
        if let Some(fingerprint) = self.inner.fingerprint {
            registry().lock_ignore_poison().remove(&fingerprint);
        }
        self.inner.processor.shutdown(timeout)
    }

    /// The workspace this client reports into.
    pub fn workspace_id(&self) -> &str {
        &self.inner.config.workspace_id
    }
}

/// Builder for [`Client`].
///
/// Unset fields fall back to [`Config::default`], which reads the
/// `COZELOOP_*` environment variables.
#[derive(Debug)]
pub struct ClientBuilder {
    config: Config,
}

impl ClientBuilder {
    /// Sets the workspace spans are reported into.
    pub fn workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.config.workspace_id = workspace_id.into();
        self
    }

    /// Sets the ingestion service base url.
    pub fn api_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.config.api_base_url = api_base_url.into();
        self
    }

    /// Sets the service name stamped onto every span.
    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.config.service_name = service_name.into();
        self
    }

    /// Extract oversize payloads into side files instead of truncating.
    pub fn ultra_large_report(mut self, enabled: bool) -> Self {
        self.config.ultra_large_report = enabled;
        self
    }

    /// Overrides the primary span queue sizing.
    pub fn span_queue(mut self, queue: QueueConfig) -> Self {
        self.config.span_queue = queue;
        self
    }

    /// Overrides the span retry queue sizing.
    pub fn span_retry_queue(mut self, queue: QueueConfig) -> Self {
        self.config.span_retry_queue = queue;
        self
    }

    /// Overrides the primary file queue sizing.
    pub fn file_queue(mut self, queue: QueueConfig) -> Self {
        self.config.file_queue = queue;
        self
    }

    /// Overrides the file retry queue sizing.
    pub fn file_retry_queue(mut self, queue: QueueConfig) -> Self {
        self.config.file_retry_queue = queue;
        self
    }

    /// Overrides the attribute bounds.
    pub fn tag_limits(mut self, limits: TagLimits) -> Self {
        self.config.tag_limits = limits;
        self
    }

    /// Replaces the default HTTP exporter.
    pub fn exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.config.exporter = Some(exporter);
        self
    }

    /// Observes the pipeline's queueing and export lifecycle.
    pub fn finish_event_handler(mut self, handler: FinishEventHandler) -> Self {
        self.config.finish_event_handler = Some(handler);
        self
    }

    /// Enables the prompt subsystem's tracing integration.
    pub fn enable_prompt_tracing(mut self, enabled: bool) -> Self {
        self.config.enable_prompt_tracing = enabled;
        self
    }

    /// Configuration surface for an external local-file exporter.
    ///
    /// This crate does not ship a file sink; a crate that does reads
    /// these fields and plugs in through [`exporter`](Self::exporter),
    /// typically teeing with a
    /// [`MultiExporter`](crate::trace::MultiExporter).
    pub fn local_file_export(mut self, enabled: bool, path: Option<PathBuf>) -> Self {
        self.config.local_file_export_enabled = enabled;
        self.config.local_file_export_path = path;
        self
    }

    /// Controls the SIGINT/SIGTERM close hook; on by default.
    pub fn install_signal_handler(mut self, enabled: bool) -> Self {
        self.config.install_signal_handler = enabled;
        self
    }

    /// Builds the client, reusing a cached pipeline when one exists
    /// for an identical configuration.
    pub fn build(self) -> Result<Client> {
        let config = self.config;
        if config.workspace_id.is_empty() {
            return Err(Error::InvalidParam(format!(
                "workspace id is required; set it on the builder or via {}",
                crate::config::ENV_WORKSPACE_ID
            )));
        }

        let fingerprint = config.fingerprint();
        if let Some(fingerprint) = fingerprint {
            if let Some(inner) = registry().lock_ignore_poison().get(&fingerprint) {
                debug!(workspace_id = %config.workspace_id, "reusing cached pipeline");
                return Ok(Client {
                    inner: inner.clone(),
                });
            }
        }

        let exporter = build_exporter(&config)?;
        let processor = Arc::new(BatchSpanProcessor::new(exporter, &config));
        let install_signals = config.install_signal_handler;
        let inner = Arc::new(ClientInner {
            fingerprint,
            processor,
            id_generator: RandomIdGenerator::default(),
            closed: AtomicBool::new(false),
            config,
        });
        if let Some(fingerprint) = fingerprint {
            registry()
                .lock_ignore_poison()
                .insert(fingerprint, inner.clone());
        }
        all_clients()
            .lock_ignore_poison()
            .push(Arc::downgrade(&inner));
        if install_signals {
            install_close_on_signal();
        }
        Ok(Client { inner })
    }
}

fn build_exporter(config: &Config) -> Result<Arc<dyn Exporter>> {
    if let Some(exporter) = config.exporter.clone() {
        return Ok(exporter);
    }
    // The local-file toggle is carried for the external file-exporter
    // collaborator; this crate ships no file sink, so the flag alone
    // cannot change the default exporter.
    Ok(Arc::new(HttpExporter::new(
        &config.api_base_url,
        config.workspace_id.clone(),
    )?))
}

// Pipeline cache keyed by configuration fingerprint.
fn registry() -> &'static Mutex<HashMap<u64, Arc<ClientInner>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Arc<ClientInner>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

// Every client ever built, for the signal hook; weak so a dropped
// client does not keep its pipeline alive.
fn all_clients() -> &'static Mutex<Vec<std::sync::Weak<ClientInner>>> {
    static ALL: OnceLock<Mutex<Vec<std::sync::Weak<ClientInner>>>> = OnceLock::new();
    ALL.get_or_init(|| Mutex::new(Vec::new()))
}

/// Closes every live client, draining their pipelines.
///
/// Used by the signal hook and by tests tearing down process-wide
/// state; returns the first close error encountered.
pub fn close_all_clients(timeout: Duration) -> Result<()> {
    registry().lock_ignore_poison().clear();
    let clients: Vec<_> = all_clients().lock_ignore_poison().drain(..).collect();
    let mut first_error = None;
    for weak in clients {
        let Some(inner) = weak.upgrade() else {
            continue;
        };
        if inner.closed.swap(true, Ordering::AcqRel) {
            continue;
        }
        if let Err(err) = inner.processor.shutdown(timeout) {
            warn!(%err, "failed to drain pipeline during close-all");
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// Installs the process-wide close hook once; later clients share it.
fn install_close_on_signal() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        let result = ctrlc::set_handler(|| {
            let _ = close_all_clients(SIGNAL_CLOSE_TIMEOUT);
            std::process::exit(130);
        });
        if let Err(err) = result {
            warn!(%err, "failed to install signal handler");
        }
    });
}

trait LockIgnorePoison<T> {
    fn lock_ignore_poison(&self) -> std::sync::MutexGuard<'_, T>;
}

impl<T> LockIgnorePoison<T> for Mutex<T> {
    fn lock_ignore_poison(&self) -> std::sync::MutexGuard<'_, T> {
        self.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

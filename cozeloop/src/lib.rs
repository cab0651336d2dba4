//! Trace SDK reporting LLM application spans to the CozeLoop
//! ingestion service.
//!
//! # Getting started
//!
//! ```no_run
//! use std::time::Duration;
//!
//! fn main() -> cozeloop::Result<()> {
//!     let client = cozeloop::Client::builder()
//!         .workspace_id("7001")
//!         .build()?;
//!
//!     let span = client.start_span("call_llm", "model");
//!     span.set_model_name("gpt-4o");
//!     span.set_input("why is the sky blue?");
//!     span.set_output("rayleigh scattering");
//!     span.finish();
//!
//!     client.close(Duration::from_secs(5))
//! }
//! ```
//!
//! Finished spans are reported asynchronously: they flow through a
//! bounded queue into batches that are exported in the background,
//! with one retry pass through a secondary queue on failure. The
//! pipeline prefers dropping to blocking; the traced program is never
//! slowed down or failed by its tracing.
//!
//! Nesting works through the ambient [`Context`]: a span installed
//! with [`Span::set_as_current`] becomes the parent of spans started
//! while its guard is alive. Across processes, [`propagation`]
//! serializes the identifiers and baggage into a header pair.

#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]

mod client;
mod config;
mod context;
mod error;
pub mod propagation;
pub mod trace;

pub use client::{close_all_clients, Client, ClientBuilder};
pub use config::{
    Config, QueueConfig, TagLimits, DEFAULT_API_BASE_URL, ENV_API_BASE_URL,
    ENV_LOCAL_FILE_EXPORT_ENABLED, ENV_LOCAL_FILE_EXPORT_PATH, ENV_WORKSPACE_ID,
};
pub use context::{Context, ContextGuard};
pub use error::{Error, Result};
pub use trace::{
    Exporter, FinishEvent, FinishEventHandler, FinishEventKind, InMemoryExporter, Span,
    SpanBuilder, SpanContext, SpanId, TraceId,
};

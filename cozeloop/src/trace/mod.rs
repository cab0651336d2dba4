//! Span lifecycle and the asynchronous reporting pipeline.

mod batch;
mod export;
mod id_generator;
mod in_memory_exporter;
mod queue;
mod span;
mod span_processor;
mod transform;
mod upload;

pub use export::{Exporter, HttpExporter, MultiExporter};
pub use id_generator::{IdGenerator, RandomIdGenerator};
pub use in_memory_exporter::InMemoryExporter;
pub use span::{Span, SpanBuilder, TagValue};
pub use span_processor::{
    BatchSpanProcessor, FinishEvent, FinishEventHandler, FinishEventKind, SpanProcessor,
};
pub use upload::{UploadFile, UploadSpan};

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;

/// A 128-bit trace identifier, rendered as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// The invalid all-zero trace id.
    pub const INVALID: TraceId = TraceId(0);

    /// Construct from a raw `u128`.
    pub const fn from_u128(value: u128) -> Self {
        TraceId(value)
    }

    /// Returns the underlying `u128` value.
    pub const fn to_u128(self) -> u128 {
        self.0
    }

    /// Parse exactly 32 lowercase hex characters.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 32 || !is_lower_hex(hex) {
            return Err(Error::InvalidParam(format!(
                "trace id must be 32 lowercase hex chars, got {hex:?}"
            )));
        }
        u128::from_str_radix(hex, 16)
            .map(TraceId)
            .map_err(|err| Error::InvalidParam(format!("trace id {hex:?}: {err}")))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({:032x})", self.0)
    }
}

/// A 64-bit span identifier, rendered as 16 lowercase hex characters.
///
/// The all-zero id is reserved: on the wire it marks a root span's
/// missing parent and is never produced by an [`IdGenerator`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// The reserved all-zero span id.
    pub const ZERO: SpanId = SpanId(0);

    /// Construct from a raw `u64`.
    pub const fn from_u64(value: u64) -> Self {
        SpanId(value)
    }

    /// Returns the underlying `u64` value.
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Parse exactly 16 lowercase hex characters.
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 16 || !is_lower_hex(hex) {
            return Err(Error::InvalidParam(format!(
                "span id must be 16 lowercase hex chars, got {hex:?}"
            )));
        }
        u64::from_str_radix(hex, 16)
            .map(SpanId)
            .map_err(|err| Error::InvalidParam(format!("span id {hex:?}: {err}")))
    }

    /// The wire rendering of this id in parent position: the reserved
    /// sentinel `"0"` for [`SpanId::ZERO`], padded hex otherwise.
    pub fn to_parent_string(self) -> String {
        if self.0 == 0 {
            "0".to_owned()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({:016x})", self.0)
    }
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// An opaque span context recovered from wire headers.
///
/// Carries only the trace identifiers and baggage; pass it to
/// [`SpanBuilder::with_parent`] to continue the trace in this process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanContext {
    /// Trace the remote span belongs to.
    pub trace_id: TraceId,
    /// The remote span's own id; becomes the local parent id.
    pub span_id: SpanId,
    /// Baggage propagated alongside the identifiers.
    pub baggage: HashMap<String, String>,
}

impl SpanContext {
    /// Create a span context from its parts.
    pub fn new(trace_id: TraceId, span_id: SpanId, baggage: HashMap<String, String>) -> Self {
        SpanContext {
            trace_id,
            span_id,
            baggage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_hex_round_trip() {
        let id = TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736);
        let hex = id.to_string();
        assert_eq!(hex.len(), 32);
        assert_eq!(TraceId::from_hex(&hex).unwrap(), id);
    }

    #[test]
    fn span_id_is_zero_padded() {
        assert_eq!(SpanId::from_u64(0xff).to_string(), "00000000000000ff");
    }

    #[test]
    fn rejects_wrong_length_and_uppercase() {
        assert!(TraceId::from_hex("abc").is_err());
        assert!(TraceId::from_hex(&"A".repeat(32)).is_err());
        assert!(SpanId::from_hex(&"f".repeat(15)).is_err());
        assert!(SpanId::from_hex(&"F".repeat(16)).is_err());
    }

    #[test]
    fn zero_span_id_renders_parent_sentinel() {
        assert_eq!(SpanId::ZERO.to_parent_string(), "0");
        assert_eq!(
            SpanId::from_u64(1).to_parent_string(),
            "0000000000000001"
        );
    }
}

//! Wire carrier for trace context, compatible with the W3C Trace
//! Context layout under vendor-prefixed header names.
//!
//! Export produces two header fields:
//!
//! - `X-Cozeloop-Traceparent`: `{version}-{trace_id}-{span_id}-{flags}`
//! - `X-Cozeloop-Tracestate`: percent-encoded `k1=v1,k2=v2` baggage
//!
//! Import parses the same pair. A malformed traceparent yields
//! [`Error::HeaderParent`]; a malformed tracestate degrades to empty
//! baggage.

use std::collections::HashMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::error::{Error, Result};
use crate::trace::{Span, SpanContext, SpanId, TraceId};

/// Header carrying the trace identifiers.
pub const TRACEPARENT_HEADER: &str = "X-Cozeloop-Traceparent";
/// Header carrying the baggage map.
pub const TRACESTATE_HEADER: &str = "X-Cozeloop-Tracestate";

const SUPPORTED_VERSION: u8 = 0;
// Spans handed to remote peers are always reported, so the sampled
// flag is fixed.
const TRACE_FLAGS: u8 = 1;

// Reserved characters within a tracestate entry.
const ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'"').add(b';').add(b',').add(b'=');

/// Adds fields to an underlying carrier such as a header map.
pub trait Injector {
    /// Sets a key/value pair on the carrier.
    fn set(&mut self, key: &str, value: String);
}

/// Reads fields from an underlying carrier such as a header map.
pub trait Extractor {
    /// Gets the value for a key, if present.
    fn get(&self, key: &str) -> Option<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }
}

/// Writes `span`'s identifiers and baggage into `injector`.
pub fn inject_span(span: &Span, injector: &mut dyn Injector) {
    inject_parts(span.trace_id(), span.span_id(), &span.baggage(), injector);
}

/// Writes an imported [`SpanContext`] back into `injector`.
pub fn inject_span_context(span_context: &SpanContext, injector: &mut dyn Injector) {
    inject_parts(
        span_context.trace_id,
        span_context.span_id,
        &span_context.baggage,
        injector,
    );
}

fn inject_parts(
    trace_id: TraceId,
    span_id: SpanId,
    baggage: &HashMap<String, String>,
    injector: &mut dyn Injector,
) {
    injector.set(
        TRACEPARENT_HEADER,
        format!("{SUPPORTED_VERSION:02x}-{trace_id}-{span_id}-{TRACE_FLAGS:02x}"),
    );
    if !baggage.is_empty() {
        injector.set(TRACESTATE_HEADER, encode_tracestate(baggage));
    }
}

/// Recovers a [`SpanContext`] from incoming headers.
///
/// Fails with [`Error::HeaderParent`] when the traceparent header is
/// absent or malformed; no partial context is returned. A malformed
/// tracestate only costs the baggage.
pub fn extract(extractor: &dyn Extractor) -> Result<SpanContext> {
    let header = extractor
        .get(TRACEPARENT_HEADER)
        .ok_or_else(|| Error::HeaderParent("missing traceparent header".to_owned()))?
        .trim();

    let parts: Vec<&str> = header.split('-').collect();
    if parts.len() != 4 {
        return Err(Error::HeaderParent(format!(
            "expected 4 segments, got {}",
            parts.len()
        )));
    }
    if parts[0].len() != 2 {
        return Err(Error::HeaderParent(format!(
            "malformed version {:?}",
            parts[0]
        )));
    }
    let version = u8::from_str_radix(parts[0], 16)
        .map_err(|_| Error::HeaderParent(format!("malformed version {:?}", parts[0])))?;
    if version != SUPPORTED_VERSION {
        return Err(Error::HeaderParent(format!("unknown version {version:#04x}")));
    }
    let trace_id = TraceId::from_hex(parts[1])
        .map_err(|_| Error::HeaderParent(format!("malformed trace id {:?}", parts[1])))?;
    if trace_id == TraceId::INVALID {
        return Err(Error::HeaderParent("all-zero trace id".to_owned()));
    }
    let span_id = SpanId::from_hex(parts[2])
        .map_err(|_| Error::HeaderParent(format!("malformed span id {:?}", parts[2])))?;
    if span_id == SpanId::ZERO {
        return Err(Error::HeaderParent("all-zero span id".to_owned()));
    }
    if parts[3].len() != 2 || u8::from_str_radix(parts[3], 16).is_err() {
        return Err(Error::HeaderParent(format!(
            "malformed trace flags {:?}",
            parts[3]
        )));
    }

    let baggage = extractor
        .get(TRACESTATE_HEADER)
        .map(decode_tracestate)
        .unwrap_or_default();

    Ok(SpanContext::new(trace_id, span_id, baggage))
}

fn encode_tracestate(baggage: &HashMap<String, String>) -> String {
    let mut entries: Vec<(&String, &String)> = baggage.iter().collect();
    entries.sort();
    entries
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                utf8_percent_encode(key, ENCODE_SET),
                utf8_percent_encode(value, ENCODE_SET)
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

// Entries that fail to decode are skipped rather than failing the
// whole extraction.
fn decode_tracestate(header: &str) -> HashMap<String, String> {
    let mut baggage = HashMap::new();
    for entry in header.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        let (Ok(key), Ok(value)) = (
            percent_decode_str(key).decode_utf8(),
            percent_decode_str(value).decode_utf8(),
        ) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        baggage.insert(key.into_owned(), value.into_owned());
    }
    baggage
}

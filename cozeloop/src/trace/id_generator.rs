use std::cell::RefCell;
use std::fmt;

use rand::{rngs, Rng, SeedableRng};

use crate::trace::{SpanId, TraceId};

/// Interface for generating trace and span ids.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    /// Generate a new `TraceId`.
    fn new_trace_id(&self) -> TraceId;

    /// Generate a new `SpanId`.
    fn new_span_id(&self) -> SpanId;
}

/// Default [`IdGenerator`] implementation.
///
/// Ids are drawn from a thread-local CSPRNG seeded from OS entropy, so
/// they are unguessable and collision-safe across distributed callers.
/// The reserved all-zero values are never produced.
#[derive(Clone, Debug, Default)]
pub struct RandomIdGenerator {
    _private: (),
}

impl IdGenerator for RandomIdGenerator {
    fn new_trace_id(&self) -> TraceId {
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let id = rng.gen::<u128>();
                if id != 0 {
                    return TraceId::from_u128(id);
                }
            }
        })
    }

    fn new_span_id(&self) -> SpanId {
        CURRENT_RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            loop {
                let id = rng.gen::<u64>();
                if id != 0 {
                    return SpanId::from_u64(id);
                }
            }
        })
    }
}

thread_local! {
    static CURRENT_RNG: RefCell<rngs::StdRng> = RefCell::new(rngs::StdRng::from_entropy());
}

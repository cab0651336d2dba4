use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Creates a bounded multi-producer single-consumer queue capped on
/// both item count and accumulated byte size.
///
/// Enqueue never blocks: an item that would exceed either bound is
/// dropped and counted. Producers reserve bytes before handing the
/// item to the channel and roll the reservation back on rejection, so
/// the queue never holds more than `max_bytes` at any instant.
pub(crate) fn bounded<T>(max_items: usize, max_bytes: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = crossbeam_channel::bounded(max_items);
    let bytes = Arc::new(AtomicUsize::new(0));
    (
        QueueSender {
            tx,
            bytes: bytes.clone(),
            max_bytes,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        QueueReceiver { rx, bytes },
    )
}

pub(crate) struct QueueSender<T> {
    tx: Sender<(T, usize)>,
    bytes: Arc<AtomicUsize>,
    max_bytes: usize,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        QueueSender {
            tx: self.tx.clone(),
            bytes: self.bytes.clone(),
            max_bytes: self.max_bytes,
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> std::fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSender")
            .field("len", &self.tx.len())
            .field("bytes", &self.bytes.load(Ordering::Relaxed))
            .field("dropped", &self.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> QueueSender<T> {
    /// Attempts to enqueue `item` accounting for `size` bytes.
    /// Returns `false` when either bound would be exceeded.
    pub(crate) fn try_enqueue(&self, item: T, size: usize) -> bool {
        let previous = self.bytes.fetch_add(size, Ordering::AcqRel);
        if previous + size > self.max_bytes {
            self.bytes.fetch_sub(size, Ordering::AcqRel);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        match self.tx.try_send((item, size)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.bytes.fetch_sub(size, Ordering::AcqRel);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of items dropped because a bound would have been exceeded.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub(crate) struct QueueReceiver<T> {
    rx: Receiver<(T, usize)>,
    bytes: Arc<AtomicUsize>,
}

impl<T> QueueReceiver<T> {
    /// The raw channel, for use in `select!` arms. Callers must pair
    /// every received item with a [`debit`](QueueReceiver::debit).
    pub(crate) fn raw(&self) -> &Receiver<(T, usize)> {
        &self.rx
    }

    /// Releases an item's byte reservation after it was received.
    pub(crate) fn debit(&self, size: usize) {
        self.bytes.fetch_sub(size, Ordering::AcqRel);
    }

    /// Non-blocking receive, already debited.
    pub(crate) fn try_recv(&self) -> Option<(T, usize)> {
        match self.rx.try_recv() {
            Ok((item, size)) => {
                self.debit(size);
                Some((item, size))
            }
            Err(_) => None,
        }
    }
}

impl<T> std::fmt::Debug for QueueReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("len", &self.rx.len())
            .field("bytes", &self.bytes.load(Ordering::Relaxed))
            .finish()
    }
}

use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, select, Receiver, Sender};
use tracing::warn;

use crate::trace::queue::QueueReceiver;

/// Thresholds and cadence for one batch worker.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BatchConfig {
    pub(crate) max_batch_length: usize,
    pub(crate) max_batch_bytes: usize,
    pub(crate) flush_interval: Duration,
}

pub(crate) enum ControlMessage {
    Flush(Sender<()>),
    Shutdown(Sender<()>),
}

/// Handle to a batch worker thread.
///
/// The worker accumulates queue items until the batch hits its count
/// or byte threshold or the flush interval elapses, then hands the
/// whole batch to `export_fn` synchronously. Control messages drain
/// the queue and flush below-threshold remainders.
#[derive(Debug)]
pub(crate) struct BatchManager {
    control: Sender<ControlMessage>,
    handle: Option<thread::JoinHandle<()>>,
    name: &'static str,
}

impl BatchManager {
    pub(crate) fn spawn<T, F>(
        name: &'static str,
        queue: QueueReceiver<T>,
        config: BatchConfig,
        export_fn: F,
    ) -> BatchManager
    where
        T: Send + 'static,
        F: FnMut(Vec<T>) + Send + 'static,
    {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name(format!("cozeloop-{name}"))
            .spawn(move || run_worker(queue, control_rx, config, export_fn))
            .ok();
        if handle.is_none() {
            warn!(worker = name, "failed to spawn batch worker");
        }
        BatchManager {
            control: control_tx,
            handle,
            name,
        }
    }

    /// Asks the worker to drain and export everything it holds, then
    /// waits for the acknowledgement. Returns `false` on deadline.
    pub(crate) fn flush(&self, deadline: Instant) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.control.send(ControlMessage::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_deadline(deadline).is_ok()
    }

    /// Drains, exports and stops the worker. Returns `false` when the
    /// worker did not acknowledge before the deadline; the thread is
    /// then left to finish detached.
    pub(crate) fn shutdown(&mut self, deadline: Instant) -> bool {
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        if self.control.send(ControlMessage::Shutdown(ack_tx)).is_err() {
            return false;
        }
        let acked = ack_rx.recv_deadline(deadline).is_ok();
        match self.handle.take() {
            Some(handle) if acked => {
                if handle.join().is_err() {
                    warn!(worker = self.name, "batch worker panicked");
                }
            }
            _ => {}
        }
        acked
    }
}

struct Batch<T> {
    items: Vec<T>,
    bytes: usize,
}

fn run_worker<T, F>(
    queue: QueueReceiver<T>,
    control: Receiver<ControlMessage>,
    config: BatchConfig,
    mut export_fn: F,
) where
    F: FnMut(Vec<T>),
{
    let mut batch = Batch {
        items: Vec::new(),
        bytes: 0,
    };
    let mut timer = after(config.flush_interval);

    loop {
        select! {
            recv(queue.raw()) -> msg => match msg {
                Ok((item, size)) => {
                    queue.debit(size);
                    batch.items.push(item);
                    batch.bytes += size;
                    if batch.items.len() >= config.max_batch_length
                        || batch.bytes >= config.max_batch_bytes
                    {
                        flush(&mut batch, &mut export_fn);
                        timer = after(config.flush_interval);
                    }
                }
                // All producers are gone; drain and exit.
                Err(_) => {
                    flush(&mut batch, &mut export_fn);
                    return;
                }
            },
            recv(control) -> msg => match msg {
                Ok(ControlMessage::Flush(ack)) => {
                    drain(&queue, &mut batch, &config, &mut export_fn);
                    flush(&mut batch, &mut export_fn);
                    timer = after(config.flush_interval);
                    let _ = ack.send(());
                }
                Ok(ControlMessage::Shutdown(ack)) => {
                    drain(&queue, &mut batch, &config, &mut export_fn);
                    flush(&mut batch, &mut export_fn);
                    let _ = ack.send(());
                    return;
                }
                Err(_) => return,
            },
            recv(timer) -> _ => {
                if !batch.items.is_empty() {
                    flush(&mut batch, &mut export_fn);
                }
                timer = after(config.flush_interval);
            },
        }
    }
}

fn drain<T, F>(queue: &QueueReceiver<T>, batch: &mut Batch<T>, config: &BatchConfig, export_fn: &mut F)
where
    F: FnMut(Vec<T>),
{
    while let Some((item, size)) = queue.try_recv() {
        batch.items.push(item);
        batch.bytes += size;
        if batch.items.len() >= config.max_batch_length || batch.bytes >= config.max_batch_bytes {
            flush(batch, export_fn);
        }
    }
}

fn flush<T, F>(batch: &mut Batch<T>, export_fn: &mut F)
where
    F: FnMut(Vec<T>),
{
    if batch.items.is_empty() {
        return;
    }
    let items = std::mem::take(&mut batch.items);
    batch.bytes = 0;
    export_fn(items);
}

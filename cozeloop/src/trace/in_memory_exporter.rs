//! In-memory exporter for testing pipelines without a backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{Error, Result};
use crate::trace::export::Exporter;
use crate::trace::upload::{UploadFile, UploadSpan};

/// An [`Exporter`] that records every batch it receives.
///
/// Clones share storage, so a test can keep one handle while the
/// pipeline owns another. Failure injection makes every subsequent
/// call return a `RemoteService` error until cleared.
#[derive(Clone, Debug, Default)]
pub struct InMemoryExporter {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    span_batches: Mutex<Vec<Vec<UploadSpan>>>,
    file_batches: Mutex<Vec<Vec<UploadFile>>>,
    fail_spans: AtomicBool,
    fail_files: AtomicBool,
}

impl InMemoryExporter {
    /// Creates an empty recording exporter.
    pub fn new() -> Self {
        InMemoryExporter::default()
    }

    /// Makes subsequent `export_spans` calls fail.
    pub fn fail_spans(&self, fail: bool) {
        self.inner.fail_spans.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `export_files` calls fail.
    pub fn fail_files(&self, fail: bool) {
        self.inner.fail_files.store(fail, Ordering::SeqCst);
    }

    /// All recorded span batches, in arrival order.
    pub fn span_batches(&self) -> Vec<Vec<UploadSpan>> {
        lock(&self.inner.span_batches).clone()
    }

    /// All recorded spans, flattened across batches.
    pub fn finished_spans(&self) -> Vec<UploadSpan> {
        lock(&self.inner.span_batches)
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// All recorded file batches, in arrival order.
    pub fn file_batches(&self) -> Vec<Vec<UploadFile>> {
        lock(&self.inner.file_batches).clone()
    }

    /// All recorded files, flattened across batches.
    pub fn uploaded_files(&self) -> Vec<UploadFile> {
        lock(&self.inner.file_batches)
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Clears recorded batches and failure flags.
    pub fn reset(&self) {
        lock(&self.inner.span_batches).clear();
        lock(&self.inner.file_batches).clear();
        self.inner.fail_spans.store(false, Ordering::SeqCst);
        self.inner.fail_files.store(false, Ordering::SeqCst);
    }
}

impl Exporter for InMemoryExporter {
    fn export_spans(&self, spans: &[UploadSpan]) -> Result<()> {
        lock(&self.inner.span_batches).push(spans.to_vec());
        if self.inner.fail_spans.load(Ordering::SeqCst) {
            return Err(Error::remote(-1, "in-memory exporter set to fail spans"));
        }
        Ok(())
    }

    fn export_files(&self, files: &[UploadFile]) -> Result<()> {
        lock(&self.inner.file_batches).push(files.to_vec());
        if self.inner.fail_files.load(Ordering::SeqCst) {
            return Err(Error::remote(-1, "in-memory exporter set to fail files"));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

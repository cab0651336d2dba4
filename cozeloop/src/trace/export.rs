use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};
use crate::trace::upload::{UploadFile, UploadSpan};

const TRACE_INGEST_PATH: &str = "/v1/loop/traces/ingest";
const FILE_UPLOAD_PATH: &str = "/v1/loop/files/upload";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// A sink consuming batches of upload spans and extracted files.
///
/// Both operations are synchronous from the pipeline's perspective;
/// a batch worker blocks on them for the duration of the call.
pub trait Exporter: Send + Sync + fmt::Debug {
    /// Exports a batch of spans.
    fn export_spans(&self, spans: &[UploadSpan]) -> Result<()>;

    /// Exports a batch of extracted files.
    fn export_files(&self, files: &[UploadFile]) -> Result<()>;
}

#[derive(Serialize)]
struct IngestRequest<'a> {
    spans: &'a [UploadSpan],
}

// Acknowledgement envelope shared by both endpoints.
#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    code: i32,
    #[serde(default)]
    msg: String,
}

/// Default exporter posting spans and files to the ingestion service.
#[derive(Debug)]
pub struct HttpExporter {
    client: reqwest::blocking::Client,
    ingest_url: String,
    upload_url: String,
    workspace_id: String,
}

impl HttpExporter {
    /// Creates an exporter against `base_url` for `workspace_id`.
    pub fn new(base_url: &str, workspace_id: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| Error::Other(Box::new(err)))?;
        let base = base_url.trim_end_matches('/');
        Ok(HttpExporter {
            client,
            ingest_url: format!("{base}{TRACE_INGEST_PATH}"),
            upload_url: format!("{base}{FILE_UPLOAD_PATH}"),
            workspace_id: workspace_id.into(),
        })
    }

    fn check_envelope(response: reqwest::blocking::Response) -> Result<()> {
        let status = response.status();
        if !status.is_success() {
            return Err(Error::remote(
                status.as_u16().into(),
                response.text().unwrap_or_default(),
            ));
        }
        let envelope: ResponseEnvelope = response.json().map_err(Error::transport)?;
        if envelope.code != 0 {
            return Err(Error::remote(envelope.code, envelope.msg));
        }
        Ok(())
    }
}

impl Exporter for HttpExporter {
    fn export_spans(&self, spans: &[UploadSpan]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(&self.ingest_url)
            .json(&IngestRequest { spans })
            .send()
            .map_err(Error::transport)?;
        Self::check_envelope(response)
    }

    fn export_files(&self, files: &[UploadFile]) -> Result<()> {
        // One file per request; the endpoint does not accept batches.
        for file in files {
            let part = reqwest::blocking::multipart::Part::bytes(file.data.clone())
                .file_name(file.tos_key.clone());
            let form = reqwest::blocking::multipart::Form::new()
                .text("workspace_id", self.workspace_id.clone())
                .text("key", file.tos_key.clone())
                .part("file", part);
            let response = self
                .client
                .post(&self.upload_url)
                .multipart(form)
                .send()
                .map_err(Error::transport)?;
            Self::check_envelope(response)?;
        }
        Ok(())
    }
}

/// Tees batches to multiple exporters.
///
/// Every child is invoked even when an earlier one fails; the first
/// error encountered is returned.
#[derive(Debug, Default)]
pub struct MultiExporter {
    exporters: Vec<Arc<dyn Exporter>>,
}

impl MultiExporter {
    /// Creates a multi-exporter, filtering out absent children.
    pub fn new(exporters: impl IntoIterator<Item = Option<Arc<dyn Exporter>>>) -> Self {
        MultiExporter {
            exporters: exporters.into_iter().flatten().collect(),
        }
    }

    /// Appends an exporter.
    pub fn add_exporter(&mut self, exporter: Arc<dyn Exporter>) {
        self.exporters.push(exporter);
    }

    /// Number of wrapped exporters.
    pub fn exporter_count(&self) -> usize {
        self.exporters.len()
    }

    fn fan_out(&self, call: impl Fn(&dyn Exporter) -> Result<()>) -> Result<()> {
        let mut first_error = None;
        for exporter in &self.exporters {
            if let Err(err) = call(exporter.as_ref()) {
                warn!(%err, "multi-exporter child failed");
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
}

impl Exporter for MultiExporter {
    fn export_spans(&self, spans: &[UploadSpan]) -> Result<()> {
        if self.exporters.is_empty() {
            return Ok(());
        }
        self.fan_out(|exporter| exporter.export_spans(spans))
    }

    fn export_files(&self, files: &[UploadFile]) -> Result<()> {
        if self.exporters.is_empty() {
            return Ok(());
        }
        self.fan_out(|exporter| exporter.export_files(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingExporter {
        span_calls: AtomicUsize,
        file_calls: AtomicUsize,
        fail: bool,
        tag: &'static str,
    }

    impl CountingExporter {
        fn new(tag: &'static str, fail: bool) -> Arc<Self> {
            Arc::new(CountingExporter {
                fail,
                tag,
                ..CountingExporter::default()
            })
        }
    }

    impl Exporter for CountingExporter {
        fn export_spans(&self, _spans: &[UploadSpan]) -> Result<()> {
            self.span_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::remote(500, self.tag))
            } else {
                Ok(())
            }
        }

        fn export_files(&self, _files: &[UploadFile]) -> Result<()> {
            self.file_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn multi_exporter_filters_absent_children() {
        let multi = MultiExporter::new([
            Some(CountingExporter::new("a", false) as Arc<dyn Exporter>),
            None,
            Some(CountingExporter::new("b", false) as Arc<dyn Exporter>),
        ]);
        assert_eq!(multi.exporter_count(), 2);
    }

    #[test]
    fn multi_exporter_invokes_all_and_returns_first_error() {
        let first = CountingExporter::new("first", true);
        let second = CountingExporter::new("second", true);
        let third = CountingExporter::new("third", false);
        let multi = MultiExporter::new([
            Some(first.clone() as Arc<dyn Exporter>),
            Some(second.clone() as Arc<dyn Exporter>),
            Some(third.clone() as Arc<dyn Exporter>),
        ]);

        let err = multi.export_spans(&[UploadSpan::default()]).unwrap_err();
        assert!(matches!(err, Error::RemoteService { msg, .. } if msg == "first"));
        assert_eq!(first.span_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.span_calls.load(Ordering::SeqCst), 1);
        assert_eq!(third.span_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_multi_exporter_succeeds() {
        let multi = MultiExporter::default();
        assert!(multi.export_spans(&[UploadSpan::default()]).is_ok());
        assert!(multi.export_files(&[UploadFile::default()]).is_ok());
    }
}

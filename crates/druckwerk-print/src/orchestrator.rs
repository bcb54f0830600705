// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job orchestration: prepare → dispatch → poll → terminate.
//
// Prepare normalizes arbitrary user uploads into an owned PDF artifact.
// Dispatch consumes the artifact unconditionally: after Submit has been
// attempted the file is either with the backend or gone, never reusable
// across retries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use druckwerk_core::config::Settings;
use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::{FileHandle, JobAttributes, JobState, OwnerId, PrintOptions};
use druckwerk_document::Convert;
use druckwerk_document::pdf;
use druckwerk_store::ArtifactStore;

use crate::backend::PrintBackend;

/// Extensions the converter is trusted to turn into a PDF.
const CONVERTIBLE_EXTENSIONS: &[&str] = &[
    "doc", "docx", "png", "txt", "jpg", "jpeg", "md", "bmp", "xlsx", "xls", "odt", "ods",
];

/// Wall-clock budget granted per sheet of paper.
const SECONDS_PER_PAPER: u64 = 60;

/// Pause between job-attribute polls.
const POLL_TICK: Duration = Duration::from_secs(1);

/// Result of the prepare phase: an owned PDF and its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub file_handle: FileHandle,
    pub pages: u32,
}

/// One tick of the poll loop, for live presentation updates.
#[derive(Debug, Clone)]
pub struct PollUpdate {
    pub iteration: u32,
    pub attributes: JobAttributes,
}

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEnd {
    /// The job reached a terminal state on its own.
    Terminal(JobState),
    /// The wall-clock budget ran out; the job was cancelled.
    TimedOut,
    /// The caller cancelled; the job was cancelled.
    Cancelled,
}

/// Terminal report of a poll, with the last attributes seen (if any).
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub end: PollEnd,
    pub last: Option<JobAttributes>,
}

/// Drives a single print job through its lifecycle.
pub struct PrintOrchestrator {
    settings: Arc<Settings>,
    store: Arc<ArtifactStore>,
    backend: Arc<dyn PrintBackend>,
    converter: Arc<dyn Convert>,
}

impl PrintOrchestrator {
    pub fn new(
        settings: Arc<Settings>,
        store: Arc<ArtifactStore>,
        backend: Arc<dyn PrintBackend>,
        converter: Arc<dyn Convert>,
    ) -> Self {
        Self {
            settings,
            store,
            backend,
            converter,
        }
    }

    // -- Prepare ---------------------------------------------------------------

    /// Normalize an upload into an owned PDF artifact with a known page
    /// count.
    ///
    /// PDFs are stored verbatim; whitelisted formats go through the
    /// converter; everything else is rejected.
    #[instrument(skip(self, bytes), fields(owner = %owner, claimed_filename, bytes_len = bytes.len()))]
    pub async fn prepare(
        &self,
        owner: &OwnerId,
        claimed_filename: &str,
        bytes: Vec<u8>,
    ) -> Result<Prepared> {
        if bytes.is_empty() {
            return Err(DruckwerkError::InvalidArgument("empty file".into()));
        }

        let extension = claimed_filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .ok_or_else(|| {
                DruckwerkError::UnsupportedFormat(format!(
                    "'{claimed_filename}' has no extension"
                ))
            })?;

        let pdf_bytes = if extension == "pdf" {
            bytes
        } else if CONVERTIBLE_EXTENSIONS.contains(&extension.as_str()) {
            self.convert_to_pdf(owner, &extension, bytes).await?
        } else {
            return Err(DruckwerkError::UnsupportedFormat(format!(
                "no support of the .{extension} format"
            )));
        };

        let pages = count_pages(pdf_bytes.clone()).await?;
        let file_handle = self.store.put(owner, "pdf", &pdf_bytes).await?;
        info!(handle = %file_handle, pages, "document prepared");
        Ok(Prepared {
            file_handle,
            pages: pages as u32,
        })
    }

    /// Ship the raw upload to the converter and collect the PDF.
    async fn convert_to_pdf(
        &self,
        owner: &OwnerId,
        extension: &str,
        bytes: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let raw_handle = self.store.put(owner, extension, &bytes).await?;
        let raw_path = self.store.path(owner, &raw_handle)?;
        let out_path: PathBuf = self
            .settings
            .temp_dir
            .join(format!("{}.pdf", Uuid::new_v4()));

        let converted = self.converter.convert(&raw_path, &out_path).await;
        // The raw upload is transient either way.
        self.store.delete(owner, &raw_handle).await?;

        match converted {
            Ok(()) => {
                let pdf_bytes = tokio::fs::read(&out_path).await?;
                let _ = tokio::fs::remove_file(&out_path).await;
                Ok(pdf_bytes)
            }
            Err(e @ (DruckwerkError::UnsupportedFormat(_) | DruckwerkError::Timeout(_))) => {
                let _ = tokio::fs::remove_file(&out_path).await;
                Err(e)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&out_path).await;
                Err(DruckwerkError::ConversionFailed(e.to_string()))
            }
        }
    }

    /// Drop a prepared artifact that will not be printed.
    pub async fn cancel_preparation(&self, owner: &OwnerId, handle: &FileHandle) -> Result<()> {
        self.store.delete(owner, handle).await
    }

    // -- Dispatch --------------------------------------------------------------

    /// Submit a prepared artifact to a printer.
    ///
    /// The artifact is consumed whether submission succeeds or fails; a
    /// retry needs a fresh prepare.
    #[instrument(skip(self, options), fields(owner = %owner, handle = %handle, printer_cups_name))]
    pub async fn dispatch(
        &self,
        owner: &OwnerId,
        handle: &FileHandle,
        printer_cups_name: &str,
        options: &PrintOptions,
    ) -> Result<i32> {
        let path = self.store.path(owner, handle)?;
        if self.settings.find_printer(printer_cups_name).is_none() {
            return Err(DruckwerkError::InvalidArgument(format!(
                "no such printer '{printer_cups_name}'"
            )));
        }

        let submitted = self
            .backend
            .submit(printer_cups_name, &path, "job", options)
            .await;

        if let Err(e) = self.store.delete(owner, handle).await {
            warn!(%handle, %e, "could not consume dispatched artifact");
        }

        let job_id = submitted?;
        info!(job_id, "job dispatched");
        Ok(job_id)
    }

    /// Cancel a backend job, tolerating jobs that are already gone.
    pub async fn cancel_job(&self, job_id: i32) -> Result<()> {
        match self.backend.cancel(job_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// One snapshot of the job, straight from the backend.
    pub async fn job_status(&self, job_id: i32) -> Result<JobAttributes> {
        self.backend.job_attributes(job_id).await
    }

    // -- Poll ------------------------------------------------------------------

    /// The wall-clock budget for a job of the given size.
    pub fn poll_budget(papers: u64) -> Duration {
        Duration::from_secs(SECONDS_PER_PAPER * papers.max(1))
    }

    /// Poll the job once per second until it terminates, the budget runs
    /// out, or `cancel` fires.
    ///
    /// Transient backend errors are logged and retried on the next tick.
    /// On budget expiry or cancellation the job is cancelled on the backend
    /// and one final snapshot is read for the closing presentation.
    #[instrument(skip(self, cancel, updates), fields(job_id, ?budget))]
    pub async fn poll_job(
        &self,
        job_id: i32,
        budget: Duration,
        cancel: CancellationToken,
        updates: Option<mpsc::UnboundedSender<PollUpdate>>,
    ) -> PollOutcome {
        let deadline = Instant::now() + budget;
        let mut iteration: u32 = 0;
        let mut last: Option<JobAttributes> = None;

        loop {
            if cancel.is_cancelled() {
                return self.wind_down(job_id, PollEnd::Cancelled).await;
            }
            if Instant::now() >= deadline {
                return self.wind_down(job_id, PollEnd::TimedOut).await;
            }

            iteration += 1;
            match self.backend.job_attributes(job_id).await {
                Ok(attributes) => {
                    if let Some(sender) = &updates {
                        let _ = sender.send(PollUpdate {
                            iteration,
                            attributes: attributes.clone(),
                        });
                    }
                    let terminal = attributes.job_state.is_terminal();
                    let state = attributes.job_state;
                    last = Some(attributes);
                    if terminal {
                        debug!(?state, "job reached terminal state");
                        return PollOutcome {
                            end: PollEnd::Terminal(state),
                            last,
                        };
                    }
                }
                Err(e) => {
                    // Transient; the next tick may succeed.
                    warn!(job_id, %e, "job attributes unavailable");
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.wind_down(job_id, PollEnd::Cancelled).await;
                }
                _ = sleep(POLL_TICK) => {}
            }
        }
    }

    /// Cancel on the backend and read a closing snapshot.
    async fn wind_down(&self, job_id: i32, end: PollEnd) -> PollOutcome {
        if let Err(e) = self.cancel_job(job_id).await {
            warn!(job_id, %e, "cancel during wind-down failed");
        }
        let last = self.backend.job_attributes(job_id).await.ok();
        info!(job_id, ?end, "poll wound down");
        PollOutcome { end, last }
    }
}

/// Page count of a PDF, computed off the async runtime.
async fn count_pages(bytes: Vec<u8>) -> Result<usize> {
    tokio::task::spawn_blocking(move || pdf::page_count(&bytes))
        .await
        .map_err(|e| DruckwerkError::Pdf(format!("page count task: {e}")))?
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use std::path::Path;

    use druckwerk_core::{NumberUp, Printer, Sides};
    use druckwerk_document::pdf::PdfBuilder;

    use super::*;
    use crate::backend::fake::FakePrintBackend;

    /// Converter that writes a fixed one-page PDF.
    struct FixedConverter;

    #[async_trait]
    impl Convert for FixedConverter {
        async fn convert(&self, _input: &Path, output: &Path) -> Result<()> {
            tokio::fs::write(output, one_page_pdf()).await?;
            Ok(())
        }
    }

    /// Converter that always reports a broken document.
    struct BrokenConverter;

    #[async_trait]
    impl Convert for BrokenConverter {
        async fn convert(&self, _input: &Path, _output: &Path) -> Result<()> {
            Err(DruckwerkError::Backend("converter exploded".into()))
        }
    }

    fn one_page_pdf() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
        encoder
            .encode(img.as_raw(), 2, 2, image::ExtendedColorType::Rgb8)
            .expect("jpeg");
        let mut builder = PdfBuilder::new();
        builder.add_jpeg_page(jpeg, 2, 2, 72.0);
        builder.finish().expect("pdf")
    }

    fn pdf_with_pages(n: u32) -> Vec<u8> {
        let mut builder = PdfBuilder::new();
        for _ in 0..n {
            let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
            let mut jpeg = Vec::new();
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
            encoder
                .encode(img.as_raw(), 2, 2, image::ExtendedColorType::Rgb8)
                .expect("jpeg");
            builder.add_jpeg_page(jpeg, 2, 2, 72.0);
        }
        builder.finish().expect("pdf")
    }

    fn settings(temp_dir: &Path) -> Arc<Settings> {
        Arc::new(Settings {
            app_root_path: String::new(),
            bind_addr: "127.0.0.1:0".into(),
            database_path: temp_dir.join("state.db"),
            cors_allow_origin_regex: ".*".into(),
            accounts: druckwerk_core::config::AccountsSettings {
                api_url: "http://accounts.test".into(),
                api_jwt_token: "svc".into(),
            },
            bot_token: "123:secret".into(),
            converter_url: "http://converter.test".into(),
            temp_dir: temp_dir.to_path_buf(),
            printers: vec![Printer {
                display_name: "Office".into(),
                cups_name: "office".into(),
                ipp: "http://10.0.0.10:631/ipp/print".into(),
            }],
            scanners: vec![],
        })
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ArtifactStore>,
        backend: Arc<FakePrintBackend>,
        orchestrator: PrintOrchestrator,
    }

    fn fixture(backend: FakePrintBackend, converter: Arc<dyn Convert>) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = settings(dir.path());
        let store = Arc::new(ArtifactStore::new(dir.path().join("artifacts")).expect("store"));
        let backend = Arc::new(backend);
        let orchestrator = PrintOrchestrator::new(
            settings,
            store.clone(),
            backend.clone(),
            converter,
        );
        Fixture {
            _dir: dir,
            store,
            backend,
            orchestrator,
        }
    }

    fn owner() -> OwnerId {
        OwnerId::from("alice")
    }

    #[tokio::test]
    async fn prepare_stores_pdf_verbatim() {
        let f = fixture(FakePrintBackend::with_states(vec![]), Arc::new(FixedConverter));
        let prepared = f
            .orchestrator
            .prepare(&owner(), "doc.pdf", pdf_with_pages(3))
            .await
            .expect("prepare");
        assert_eq!(prepared.pages, 3);
        assert!(f.store.path(&owner(), &prepared.file_handle).is_ok());
    }

    #[tokio::test]
    async fn prepare_converts_whitelisted_formats() {
        let f = fixture(FakePrintBackend::with_states(vec![]), Arc::new(FixedConverter));
        let prepared = f
            .orchestrator
            .prepare(&owner(), "notes.docx", b"fake docx".to_vec())
            .await
            .expect("prepare");
        assert_eq!(prepared.pages, 1);
    }

    #[tokio::test]
    async fn prepare_rejects_unknown_and_empty() {
        let f = fixture(FakePrintBackend::with_states(vec![]), Arc::new(FixedConverter));
        assert!(matches!(
            f.orchestrator.prepare(&owner(), "movie.mkv", b"x".to_vec()).await,
            Err(DruckwerkError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            f.orchestrator.prepare(&owner(), "doc.pdf", Vec::new()).await,
            Err(DruckwerkError::InvalidArgument(_))
        ));
        assert!(matches!(
            f.orchestrator.prepare(&owner(), "no_extension", b"x".to_vec()).await,
            Err(DruckwerkError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn converter_failures_surface_as_conversion_failed() {
        let f = fixture(FakePrintBackend::with_states(vec![]), Arc::new(BrokenConverter));
        assert!(matches!(
            f.orchestrator.prepare(&owner(), "notes.docx", b"x".to_vec()).await,
            Err(DruckwerkError::ConversionFailed(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_consumes_artifact_on_success() {
        let f = fixture(FakePrintBackend::with_states(vec![]), Arc::new(FixedConverter));
        let prepared = f
            .orchestrator
            .prepare(&owner(), "doc.pdf", pdf_with_pages(1))
            .await
            .expect("prepare");

        let job_id = f
            .orchestrator
            .dispatch(&owner(), &prepared.file_handle, "office", &PrintOptions::default())
            .await
            .expect("dispatch");
        assert_eq!(job_id, 1);
        assert!(f.store.path(&owner(), &prepared.file_handle).is_err());
    }

    #[tokio::test]
    async fn dispatch_consumes_artifact_on_failure_too() {
        let f = fixture(FakePrintBackend::failing_submit(), Arc::new(FixedConverter));
        let prepared = f
            .orchestrator
            .prepare(&owner(), "doc.pdf", pdf_with_pages(1))
            .await
            .expect("prepare");

        let result = f
            .orchestrator
            .dispatch(&owner(), &prepared.file_handle, "office", &PrintOptions::default())
            .await;
        assert!(result.is_err());
        assert!(f.store.path(&owner(), &prepared.file_handle).is_err());
    }

    #[tokio::test]
    async fn dispatch_validates_printer_before_consuming() {
        let f = fixture(FakePrintBackend::with_states(vec![]), Arc::new(FixedConverter));
        let prepared = f
            .orchestrator
            .prepare(&owner(), "doc.pdf", pdf_with_pages(1))
            .await
            .expect("prepare");

        let result = f
            .orchestrator
            .dispatch(&owner(), &prepared.file_handle, "ghost", &PrintOptions::default())
            .await;
        assert!(matches!(result, Err(DruckwerkError::InvalidArgument(_))));
        // Validation failures never reached Submit, so the artifact stays.
        assert!(f.store.path(&owner(), &prepared.file_handle).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_follows_job_to_completion() {
        use JobState::*;
        let f = fixture(
            FakePrintBackend::with_states(vec![
                FakePrintBackend::attrs(Pending),
                FakePrintBackend::attrs(Processing),
                FakePrintBackend::attrs(Completed),
            ]),
            Arc::new(FixedConverter),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = f
            .orchestrator
            .poll_job(7, Duration::from_secs(600), CancellationToken::new(), Some(tx))
            .await;

        assert_eq!(outcome.end, PollEnd::Terminal(Completed));
        assert_eq!(outcome.last.unwrap().job_state, Completed);

        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update.attributes.job_state);
        }
        assert_eq!(seen, vec![Pending, Processing, Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_times_out_and_cancels() {
        use JobState::*;
        let f = fixture(
            FakePrintBackend::with_states(vec![FakePrintBackend::attrs(Processing)]),
            Arc::new(FixedConverter),
        );

        let outcome = f
            .orchestrator
            .poll_job(7, Duration::from_secs(3), CancellationToken::new(), None)
            .await;

        assert_eq!(outcome.end, PollEnd::TimedOut);
        assert_eq!(f.backend.cancels.lock().unwrap().as_slice(), &[7]);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_honors_cancellation() {
        use JobState::*;
        let f = fixture(
            FakePrintBackend::with_states(vec![FakePrintBackend::attrs(Processing)]),
            Arc::new(FixedConverter),
        );

        let token = CancellationToken::new();
        token.cancel();
        let outcome = f
            .orchestrator
            .poll_job(9, Duration::from_secs(600), token, None)
            .await;

        assert_eq!(outcome.end, PollEnd::Cancelled);
        assert_eq!(f.backend.cancels.lock().unwrap().as_slice(), &[9]);
    }

    #[test]
    fn poll_budget_scales_with_papers() {
        assert_eq!(PrintOrchestrator::poll_budget(6), Duration::from_secs(360));
        // Degenerate jobs still get one paper's worth of patience.
        assert_eq!(PrintOrchestrator::poll_budget(0), Duration::from_secs(60));
    }

    #[test]
    fn papers_for_scenarios() {
        // S1: 3 pages, 2 copies, defaults otherwise.
        assert_eq!(
            crate::pages::count_of_papers_to_print(3, None, 1, Sides::OneSided, 2).unwrap(),
            6
        );
        // S2: 8 pages at 2x2.
        assert_eq!(
            crate::pages::count_of_papers_to_print(
                8,
                None,
                NumberUp::Four.as_u32(),
                Sides::OneSided,
                1
            )
            .unwrap(),
            2
        );
    }
}

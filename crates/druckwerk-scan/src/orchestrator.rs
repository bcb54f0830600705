// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan orchestration: start → fetch → merge → undo → finalize.
//
// The owner holds at most one growing artifact per scan session. Every
// successful fetch appends the fresh pages behind the existing ones and
// swaps the artifact atomically; undo rewrites it without the last page
// but never deletes the handle. Each in-flight device job receives exactly
// one delete across the happy and cancel paths (the backend makes
// double-delete safe anyway).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use druckwerk_core::config::Settings;
use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::{FileHandle, OwnerId, ScanOptions};
use druckwerk_document::pdf::PdfFile;
use druckwerk_document::{autocrop, pdf};
use druckwerk_store::ArtifactStore;

use crate::backend::{EsclScanBackend, ScanBackend};

/// Result of one fetch-and-merge cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub file_handle: FileHandle,
    pub page_count: u32,
}

/// Drives scan sessions against the configured scanners.
pub struct ScanOrchestrator {
    store: Arc<ArtifactStore>,
    backends: HashMap<String, Arc<dyn ScanBackend>>,
}

impl ScanOrchestrator {
    /// Build one eSCL backend per configured scanner.
    pub fn new(settings: &Settings, store: Arc<ArtifactStore>) -> Result<Self> {
        let mut backends: HashMap<String, Arc<dyn ScanBackend>> = HashMap::new();
        for scanner in &settings.scanners {
            backends.insert(
                scanner.name.clone(),
                Arc::new(EsclScanBackend::new(&scanner.escl)?),
            );
        }
        Ok(Self { store, backends })
    }

    /// Assemble from prebuilt backends (used by tests).
    pub fn with_backends(
        store: Arc<ArtifactStore>,
        backends: HashMap<String, Arc<dyn ScanBackend>>,
    ) -> Self {
        Self { store, backends }
    }

    fn backend(&self, scanner_name: &str) -> Result<&Arc<dyn ScanBackend>> {
        self.backends
            .get(scanner_name)
            .ok_or_else(|| DruckwerkError::NotFound(format!("no such scanner '{scanner_name}'")))
    }

    /// Start an acquisition. `Busy` propagates for the caller to surface.
    #[instrument(skip(self, options), fields(scanner_name))]
    pub async fn start(&self, scanner_name: &str, options: &ScanOptions) -> Result<String> {
        self.backend(scanner_name)?.start(options).await
    }

    /// Wait for the device to deliver the acquisition, then grow the
    /// owner's artifact.
    ///
    /// With no prior artifact the fresh pages become the artifact; with one
    /// the fresh pages are appended and the handle is replaced atomically.
    /// The device job is deleted before returning.
    #[instrument(skip(self), fields(owner = %owner, scanner_name, scan_job_id, prev = ?prev, crop))]
    pub async fn wait_and_merge(
        &self,
        owner: &OwnerId,
        scanner_name: &str,
        scan_job_id: &str,
        prev: Option<&FileHandle>,
        crop: bool,
    ) -> Result<MergeOutcome> {
        // Validate the previous handle before tying up the scanner.
        if let Some(prev_handle) = prev {
            self.store.path(owner, prev_handle)?;
        }
        let backend = self.backend(scanner_name)?;

        let document = backend.next_document(scan_job_id).await?;

        let document = if crop {
            run_blocking(move || autocrop::autocrop_pdf(&document)).await?
        } else {
            document
        };

        let file_handle = match prev {
            None => self.store.put(owner, "pdf", &document).await?,
            Some(prev_handle) => {
                let base = self.store.read(owner, prev_handle).await?;
                let merged =
                    run_blocking(move || PdfFile::from_bytes(&base)?.append(&document)).await?;
                self.store.replace(owner, prev_handle, "pdf", &merged).await?
            }
        };

        let merged_bytes = self.store.read(owner, &file_handle).await?;
        let page_count = run_blocking(move || pdf::page_count(&merged_bytes)).await? as u32;

        // Exactly-once delete on the happy path; 404 means someone already
        // cleaned up, which is fine.
        if let Err(e) = self.delete_job(scanner_name, scan_job_id).await {
            warn!(scan_job_id, %e, "scan job cleanup failed");
        }

        info!(handle = %file_handle, page_count, "acquisition merged");
        Ok(MergeOutcome {
            file_handle,
            page_count,
        })
    }

    /// Rewrite the artifact without its final page.
    ///
    /// The handle is replaced but never deleted; removing the last page of
    /// a one-page artifact leaves a valid empty document.
    #[instrument(skip(self), fields(owner = %owner, handle = %handle))]
    pub async fn remove_last_page(
        &self,
        owner: &OwnerId,
        handle: &FileHandle,
    ) -> Result<MergeOutcome> {
        let bytes = self.store.read(owner, handle).await?;
        let (shrunk, page_count) = run_blocking(move || {
            let file = PdfFile::from_bytes(&bytes)?;
            let shrunk = file.without_last_page()?;
            let count = pdf::page_count(&shrunk)?;
            Ok::<_, DruckwerkError>((shrunk, count))
        })
        .await?;

        let file_handle = self.store.replace(owner, handle, "pdf", &shrunk).await?;
        Ok(MergeOutcome {
            file_handle,
            page_count: page_count as u32,
        })
    }

    /// Drop the finished (or abandoned) artifact.
    pub async fn delete_file(&self, owner: &OwnerId, handle: &FileHandle) -> Result<()> {
        self.store.delete(owner, handle).await
    }

    /// Delete an in-flight device job, tolerating jobs already gone.
    pub async fn delete_job(&self, scanner_name: &str, scan_job_id: &str) -> Result<()> {
        match self.backend(scanner_name)?.delete(scan_job_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Abort a session: delete the in-flight device job (if any) and the
    /// artifact (if any).
    #[instrument(skip(self), fields(owner = %owner, scanner_name))]
    pub async fn cancel(
        &self,
        owner: &OwnerId,
        scanner_name: &str,
        scan_job_id: Option<&str>,
        artifact: Option<&FileHandle>,
    ) -> Result<()> {
        if let Some(job_id) = scan_job_id
            && let Err(e) = self.delete_job(scanner_name, job_id).await
        {
            warn!(job_id, %e, "backend job cleanup failed during cancel");
        }
        if let Some(handle) = artifact {
            self.store.delete(owner, handle).await?;
        }
        Ok(())
    }

    /// Raw ScannerCapabilities XML (diagnostic).
    pub async fn capabilities(&self, scanner_name: &str) -> Result<String> {
        self.backend(scanner_name)?.capabilities().await
    }

    /// Raw ScannerStatus XML (diagnostic).
    pub async fn scanner_status(&self, scanner_name: &str) -> Result<String> {
        self.backend(scanner_name)?.status().await
    }
}

/// Run CPU-bound PDF work off the async runtime.
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DruckwerkError::Pdf(format!("blocking task: {e}")))?
}

#[cfg(test)]
mod tests {
    use druckwerk_document::pdf::PdfBuilder;

    use super::*;
    use crate::backend::fake::FakeScanBackend;

    fn pdf_with_pages(n: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]));
        let mut jpeg = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90);
        encoder
            .encode(img.as_raw(), 2, 2, image::ExtendedColorType::Rgb8)
            .expect("jpeg");
        let mut builder = PdfBuilder::new();
        for _ in 0..n {
            builder.add_jpeg_page(jpeg.clone(), 2, 2, 72.0);
        }
        builder.finish().expect("pdf")
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<ArtifactStore>,
        backend: Arc<FakeScanBackend>,
        orchestrator: ScanOrchestrator,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(ArtifactStore::new(dir.path().join("artifacts")).expect("store"));
        let backend = Arc::new(FakeScanBackend::new());
        let mut backends: HashMap<String, Arc<dyn ScanBackend>> = HashMap::new();
        backends.insert("office-scan".to_string(), backend.clone());
        let orchestrator = ScanOrchestrator::with_backends(store.clone(), backends);
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
    async fn busy_device_propagates_as_busy() {
        let f = fixture();
        f.backend
            .script_start(Err(DruckwerkError::Busy("scanner is busy".into())));
        let result = f
            .orchestrator
            .start("office-scan", &ScanOptions::default())
            .await;
        assert!(matches!(result, Err(DruckwerkError::Busy(_))));
    }

    #[tokio::test]
    async fn unknown_scanner_is_not_found() {
        let f = fixture();
        let result = f.orchestrator.start("ghost", &ScanOptions::default()).await;
        assert!(matches!(result, Err(DruckwerkError::NotFound(_))));
    }

    #[tokio::test]
    async fn merge_grows_artifact_across_cycles() {
        let f = fixture();
        // Three acquisitions of 1, 2, and 1 pages.
        for pages in [1u32, 2, 1] {
            f.backend.script_document(pdf_with_pages(pages));
        }

        let first = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-1", None, false)
            .await
            .expect("first cycle");
        assert_eq!(first.page_count, 1);

        let second = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-2", Some(&first.file_handle), false)
            .await
            .expect("second cycle");
        assert_eq!(second.page_count, 3);
        // The previous handle was replaced.
        assert!(f.store.path(&owner(), &first.file_handle).is_err());

        let third = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-3", Some(&second.file_handle), false)
            .await
            .expect("third cycle");
        assert_eq!(third.page_count, 4);

        // Every device job was deleted exactly once.
        assert_eq!(
            f.backend.deletes.lock().unwrap().as_slice(),
            &["job-1", "job-2", "job-3"]
        );
    }

    #[tokio::test]
    async fn merge_with_missing_prev_handle_fails_fast() {
        let f = fixture();
        f.backend.script_document(pdf_with_pages(1));
        let result = f
            .orchestrator
            .wait_and_merge(
                &owner(),
                "office-scan",
                "job-1",
                Some(&FileHandle::from("feedface")),
                false,
            )
            .await;
        assert!(matches!(result, Err(DruckwerkError::NotFound(_))));
        // The document was never fetched, so no delete happened either.
        assert!(f.backend.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undo_shrinks_without_deleting_the_handle() {
        let f = fixture();
        f.backend.script_document(pdf_with_pages(3));
        let merged = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-1", None, false)
            .await
            .expect("merge");

        let after_one = f
            .orchestrator
            .remove_last_page(&owner(), &merged.file_handle)
            .await
            .expect("undo 1");
        assert_eq!(after_one.page_count, 2);

        let after_two = f
            .orchestrator
            .remove_last_page(&owner(), &after_one.file_handle)
            .await
            .expect("undo 2");
        assert_eq!(after_two.page_count, 1);

        // Undo on a one-page artifact leaves an empty artifact, not a
        // missing one.
        let empty = f
            .orchestrator
            .remove_last_page(&owner(), &after_two.file_handle)
            .await
            .expect("undo 3");
        assert_eq!(empty.page_count, 0);
        assert!(f.store.path(&owner(), &empty.file_handle).is_ok());
    }

    #[tokio::test]
    async fn finalize_deletes_artifact() {
        let f = fixture();
        f.backend.script_document(pdf_with_pages(2));
        let merged = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-1", None, false)
            .await
            .expect("merge");

        f.orchestrator
            .delete_file(&owner(), &merged.file_handle)
            .await
            .expect("finalize");
        assert!(f.store.path(&owner(), &merged.file_handle).is_err());
    }

    #[tokio::test]
    async fn cancel_cleans_job_and_artifact() {
        let f = fixture();
        f.backend.script_document(pdf_with_pages(1));
        let merged = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-1", None, false)
            .await
            .expect("merge");

        f.orchestrator
            .cancel(
                &owner(),
                "office-scan",
                Some("job-2"),
                Some(&merged.file_handle),
            )
            .await
            .expect("cancel");
        assert!(f.store.path(&owner(), &merged.file_handle).is_err());
        assert!(
            f.backend
                .deletes
                .lock()
                .unwrap()
                .contains(&"job-2".to_string())
        );
    }

    #[tokio::test]
    async fn crop_preserves_page_count() {
        let f = fixture();
        f.backend.script_document(pdf_with_pages(2));
        let merged = f
            .orchestrator
            .wait_and_merge(&owner(), "office-scan", "job-1", None, true)
            .await
            .expect("merge with crop");
        assert_eq!(merged.page_count, 2);
    }
}

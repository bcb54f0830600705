// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The eSCL scan backend.
//
// eSCL is plain HTTP against the device: POST an XML scan intent to
// /ScanJobs (the job id comes back in the Location header), GET
// /ScanJobs/{id}/NextDocument to collect one PDF, DELETE the job when done.
// The devices ship self-signed certificates, so certificate verification is
// disabled for this client only; no other part of the service inherits the
// exemption.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::ScanOptions;

/// Scan intent template, filled per request.
///
/// The fixed region is A4 at 1/100 mm (2551 x 4205) with edge
/// auto-detection left to the device.
const SCAN_INTENT_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<scan:ScanSettings xmlns:pwg="http://www.pwg.org/schemas/2010/12/sm"
                   xmlns:scan="http://schemas.hp.com/imaging/escl/2011/05/03">
    <pwg:Version>2.63</pwg:Version>
    <pwg:ScanRegions>
        <pwg:ScanRegion>
            <pwg:Height>4205</pwg:Height>
            <pwg:Width>2551</pwg:Width>
            <pwg:XOffset>0</pwg:XOffset>
            <pwg:YOffset>0</pwg:YOffset>
        </pwg:ScanRegion>
    </pwg:ScanRegions>
    <scan:InputSource>{input_source}</scan:InputSource>
    <scan:Duplex>{duplex}</scan:Duplex>
    <scan:AdfOption>Duplex</scan:AdfOption>
    <scan:EdgeAutoDetection>true</scan:EdgeAutoDetection>
    <scan:ColorMode>RGB24</scan:ColorMode>
    <scan:XResolution>{quality}</scan:XResolution>
    <scan:YResolution>{quality}</scan:YResolution>
    <pwg:DocumentFormat>application/pdf</pwg:DocumentFormat>
</scan:ScanSettings>
"#;

/// Deadline for the short control calls (start, delete, diagnostics).
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for NextDocument, which blocks until the device has scanned.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Command surface of one eSCL device.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// POST a scan intent. Returns the device-issued job id, or `Busy` when
    /// the device answers 503.
    async fn start(&self, options: &ScanOptions) -> Result<String>;

    /// Block until the device delivers the next scanned document as PDF
    /// bytes.
    async fn next_document(&self, scan_job_id: &str) -> Result<Vec<u8>>;

    /// Delete a scan job on the device. Unknown jobs delete as a no-op.
    async fn delete(&self, scan_job_id: &str) -> Result<()>;

    /// Raw ScannerCapabilities XML (diagnostic only).
    async fn capabilities(&self) -> Result<String>;

    /// Raw ScannerStatus XML (diagnostic only).
    async fn status(&self) -> Result<String>;
}

/// `ScanBackend` over a single eSCL base URL.
pub struct EsclScanBackend {
    base_url: String,
    client: reqwest::Client,
}

impl EsclScanBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            // Device certificates are self-signed; see module docs.
            .danger_accept_invalid_certs(true)
            .timeout(CONTROL_TIMEOUT)
            .build()
            .map_err(|e| DruckwerkError::Backend(format!("scan client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn render_intent(options: &ScanOptions) -> String {
        SCAN_INTENT_TEMPLATE
            .replace("{input_source}", options.input_source.escl_keyword())
            .replace("{duplex}", options.escl_duplex())
            .replace("{quality}", &options.quality.dpi().to_string())
    }

    async fn get_xml(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .send()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("{path}: {e}")))?;
        if !response.status().is_success() {
            return Err(DruckwerkError::Backend(format!(
                "{path} returned {}",
                response.status()
            )));
        }
        response
            .text()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("{path} body: {e}")))
    }
}

#[async_trait]
impl ScanBackend for EsclScanBackend {
    #[instrument(skip(self, options), fields(base = %self.base_url))]
    async fn start(&self, options: &ScanOptions) -> Result<String> {
        let body = Self::render_intent(options);
        let response = self
            .client
            .post(format!("{}/ScanJobs", self.base_url))
            .header("Content-Type", "application/xml")
            .body(body)
            .send()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("ScanJobs POST: {e}")))?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            info!("scanner is busy");
            return Err(DruckwerkError::Busy("scanner is busy".into()));
        }
        if !response.status().is_success() {
            return Err(DruckwerkError::Backend(format!(
                "ScanJobs POST returned {}",
                response.status()
            )));
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                DruckwerkError::Backend("ScanJobs response without Location header".into())
            })?;
        let job_id = location
            .rsplit_once("/ScanJobs/")
            .map(|(_, id)| id.trim_matches('/').to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                DruckwerkError::Backend(format!("unparseable scan job location '{location}'"))
            })?;

        info!(job_id, "scan job started");
        Ok(job_id)
    }

    #[instrument(skip(self), fields(base = %self.base_url, scan_job_id))]
    async fn next_document(&self, scan_job_id: &str) -> Result<Vec<u8>> {
        debug!("fetching next document");
        let response = self
            .client
            .get(format!(
                "{}/ScanJobs/{scan_job_id}/NextDocument",
                self.base_url
            ))
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DruckwerkError::Timeout("scan fetch".into())
                } else {
                    DruckwerkError::Backend(format!("NextDocument: {e}"))
                }
            })?;

        match response.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::NOT_FOUND => {
                return Err(DruckwerkError::NotFound(format!(
                    "scan job {scan_job_id}"
                )));
            }
            reqwest::StatusCode::SERVICE_UNAVAILABLE => {
                return Err(DruckwerkError::Busy("scanner is busy".into()));
            }
            s => {
                return Err(DruckwerkError::Backend(format!(
                    "NextDocument returned {s}"
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("NextDocument body: {e}")))?;
        info!(bytes_len = bytes.len(), "document fetched");
        Ok(bytes.to_vec())
    }

    #[instrument(skip(self), fields(base = %self.base_url, scan_job_id))]
    async fn delete(&self, scan_job_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/ScanJobs/{scan_job_id}", self.base_url))
            .send()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("ScanJobs DELETE: {e}")))?;

        // A job the device no longer knows counts as deleted.
        if response.status().is_success() || response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("scan job deleted");
            Ok(())
        } else {
            warn!(status = %response.status(), "scan job delete failed");
            Err(DruckwerkError::Backend(format!(
                "ScanJobs DELETE returned {}",
                response.status()
            )))
        }
    }

    async fn capabilities(&self) -> Result<String> {
        self.get_xml("ScannerCapabilities").await
    }

    async fn status(&self) -> Result<String> {
        self.get_xml("ScannerStatus").await
    }
}

// ---------------------------------------------------------------------------
// Fake backend for tests
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Scripted in-memory scanner.
    ///
    /// Each `start` consumes one scripted answer (a job id or `Busy`);
    /// each `next_document` consumes one scripted PDF.
    pub struct FakeScanBackend {
        starts: Mutex<VecDeque<Result<String>>>,
        documents: Mutex<VecDeque<Vec<u8>>>,
        pub deletes: Mutex<Vec<String>>,
    }

    impl FakeScanBackend {
        pub fn new() -> Self {
            Self {
                starts: Mutex::new(VecDeque::new()),
                documents: Mutex::new(VecDeque::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }

        pub fn script_start(&self, answer: Result<String>) {
            self.starts.lock().unwrap().push_back(answer);
        }

        pub fn script_document(&self, pdf: Vec<u8>) {
            self.documents.lock().unwrap().push_back(pdf);
        }
    }

    impl Default for FakeScanBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ScanBackend for FakeScanBackend {
        async fn start(&self, _options: &ScanOptions) -> Result<String> {
            self.starts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(DruckwerkError::Busy("unscripted start".into())))
        }

        async fn next_document(&self, scan_job_id: &str) -> Result<Vec<u8>> {
            self.documents
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| DruckwerkError::NotFound(format!("scan job {scan_job_id}")))
        }

        async fn delete(&self, scan_job_id: &str) -> Result<()> {
            self.deletes.lock().unwrap().push(scan_job_id.to_string());
            Ok(())
        }

        async fn capabilities(&self) -> Result<String> {
            Ok("<scan:ScannerCapabilities/>".into())
        }

        async fn status(&self) -> Result<String> {
            Ok("<scan:ScannerStatus/>".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use druckwerk_core::{InputSource, ScanQuality};

    use super::*;

    #[test]
    fn intent_substitutes_options() {
        let options = ScanOptions {
            duplex: true,
            quality: ScanQuality::Dpi600,
            input_source: InputSource::Adf,
            crop: false,
        };
        let intent = EsclScanBackend::render_intent(&options);
        assert!(intent.contains("<scan:InputSource>Adf</scan:InputSource>"));
        assert!(intent.contains("<scan:Duplex>true</scan:Duplex>"));
        assert!(intent.contains("<scan:XResolution>600</scan:XResolution>"));
        assert!(intent.contains("<scan:YResolution>600</scan:YResolution>"));
        assert!(!intent.contains('{'), "all placeholders substituted");
    }

    #[test]
    fn platen_never_requests_duplex() {
        let options = ScanOptions {
            duplex: true,
            quality: ScanQuality::Dpi300,
            input_source: InputSource::Platen,
            crop: false,
        };
        let intent = EsclScanBackend::render_intent(&options);
        assert!(intent.contains("<scan:Duplex>false</scan:Duplex>"));
    }

    #[test]
    fn base_url_is_normalized() {
        let backend = EsclScanBackend::new("https://10.0.0.11/eSCL/").expect("backend");
        assert_eq!(backend.base_url, "https://10.0.0.11/eSCL");
    }
}

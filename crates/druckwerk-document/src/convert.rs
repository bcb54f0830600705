// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document-to-PDF conversion seam.
//
// The conversion engine itself is an external service; this module defines
// the `Convert` contract plus the HTTP client implementation that ships the
// input file to the converter and writes the returned PDF.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use druckwerk_core::error::{DruckwerkError, Result};

/// Conversion of an arbitrary document file into a PDF.
#[async_trait]
pub trait Convert: Send + Sync {
    /// Convert the file at `input` and write the resulting PDF to `output`.
    async fn convert(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Converter client speaking multipart HTTP to the configured endpoint.
///
/// Conversions can be slow for large spreadsheets, so the client carries
/// its own generous timeout instead of the service-wide default.
pub struct HttpConverter {
    client: reqwest::Client,
    endpoint: String,
}

/// Upper bound on a single conversion round-trip.
const CONVERT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

impl HttpConverter {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CONVERT_TIMEOUT)
            .build()
            .map_err(|e| DruckwerkError::Backend(format!("converter client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl Convert for HttpConverter {
    #[instrument(skip(self), fields(input = %input.display(), output = %output.display()))]
    async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let bytes = tokio::fs::read(input).await?;
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        debug!(bytes_len = bytes.len(), "uploading document for conversion");
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );

        let response = self
            .client
            .post(format!("{}/convert", self.endpoint))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DruckwerkError::Timeout("conversion".into())
                } else {
                    DruckwerkError::Backend(format!("converter request: {e}"))
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE
        {
            return Err(DruckwerkError::UnsupportedFormat(format!(
                "converter rejected '{}'",
                input.display()
            )));
        }
        if !status.is_success() {
            return Err(DruckwerkError::ConversionFailed(format!(
                "converter returned {status}"
            )));
        }

        let pdf = response
            .bytes()
            .await
            .map_err(|e| DruckwerkError::ConversionFailed(format!("converter body: {e}")))?;
        if pdf.is_empty() {
            return Err(DruckwerkError::ConversionFailed(
                "converter returned an empty document".into(),
            ));
        }

        tokio::fs::write(output, &pdf).await?;
        info!(pdf_len = pdf.len(), "conversion complete");
        Ok(())
    }
}

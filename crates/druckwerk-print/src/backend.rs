// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The print backend port and its IPP implementation.
//
// Uses the `ipp` crate's async API for the job-control operations:
//   - Print-Job                (RFC 8011 §4.2.1)
//   - Get-Job-Attributes      (RFC 8011 §4.3.4)
//   - Cancel-Job               (RFC 8011 §4.3.3)
// Reachability and paper level go over the device's plain HTTP side
// (see `probe`), which the aggregator consumes through this same port.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use ipp::model::{IppVersion, Operation, StatusCode};
use ipp::prelude::*;
use ipp::request::IppRequestResponse;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::{JobAttributes, JobState, PrintOptions, Printer, StateReason};

use crate::pages::parse_page_ranges;

/// Default deadline for a single IPP round-trip.
const IPP_TIMEOUT: Duration = Duration::from_secs(10);

/// Submission, inspection, and cancellation of print jobs, plus the two
/// device-side probes the status aggregator needs.
#[async_trait]
pub trait PrintBackend: Send + Sync {
    /// Submit the file at `path` to the named printer. Returns the
    /// backend-issued job id.
    async fn submit(
        &self,
        printer_cups_name: &str,
        path: &Path,
        title: &str,
        options: &PrintOptions,
    ) -> Result<i32>;

    /// Current state of a job, with printer-state reasons attached.
    async fn job_attributes(&self, job_id: i32) -> Result<JobAttributes>;

    /// Cancel a job. Terminal-state and unknown jobs accept cancel as a
    /// no-op.
    async fn cancel(&self, job_id: i32) -> Result<()>;

    /// Whether the device answers HTTP at its IPP endpoint.
    async fn probe_reachable(&self, ipp: &str) -> bool;

    /// Primary cassette fill level from the device web page, percent.
    async fn paper_pct(&self, ipp: &str) -> Option<u8>;
}

/// `PrintBackend` speaking IPP to the devices named in the registry.
pub struct IppPrintBackend {
    /// cups_name → printer, resolved once at startup.
    printers: HashMap<String, Printer>,
    /// Plain HTTP client for the probe/tray endpoints.
    http: reqwest::Client,
}

impl IppPrintBackend {
    pub fn new(printers: &[Printer]) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(IPP_TIMEOUT)
            .build()
            .map_err(|e| DruckwerkError::Backend(format!("probe client: {e}")))?;
        Ok(Self {
            printers: printers
                .iter()
                .map(|p| (p.cups_name.clone(), p.clone()))
                .collect(),
            http,
        })
    }

    fn printer_uri(&self, cups_name: &str) -> Result<Uri> {
        let printer = self.printers.get(cups_name).ok_or_else(|| {
            DruckwerkError::InvalidArgument(format!("no such printer '{cups_name}'"))
        })?;
        printer
            .ipp
            .parse()
            .map_err(|e| DruckwerkError::Backend(format!("bad IPP URI '{}': {e}", printer.ipp)))
    }

    /// Any configured printer URI, for job-scoped operations where CUPS
    /// resolves the job id server-side.
    fn any_uri(&self) -> Result<Uri> {
        let printer = self
            .printers
            .values()
            .next()
            .ok_or_else(|| DruckwerkError::Backend("no printers configured".into()))?;
        printer
            .ipp
            .parse()
            .map_err(|e| DruckwerkError::Backend(format!("bad IPP URI '{}': {e}", printer.ipp)))
    }

    async fn send<R>(&self, uri: Uri, request: R) -> Result<IppRequestResponse>
    where
        R: Into<IppRequestResponse> + Send,
    {
        let client = AsyncIppClient::new(uri);
        match timeout(IPP_TIMEOUT, client.send(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(DruckwerkError::Backend(format!("IPP request: {e}"))),
            Err(_) => Err(DruckwerkError::Timeout("IPP request".into())),
        }
    }
}

#[async_trait]
impl PrintBackend for IppPrintBackend {
    #[instrument(skip(self, options), fields(printer_cups_name, title))]
    async fn submit(
        &self,
        printer_cups_name: &str,
        path: &Path,
        title: &str,
        options: &PrintOptions,
    ) -> Result<i32> {
        let uri = self.printer_uri(printer_cups_name)?;
        let bytes = tokio::fs::read(path).await?;
        let payload = IppPayload::new(Cursor::new(bytes));

        let mut builder = IppOperationBuilder::print_job(uri.clone(), payload)
            .job_title(title)
            .document_format("application/pdf");
        for attribute in job_attributes_of(options)? {
            builder = builder.attribute(attribute);
        }

        info!("sending Print-Job");
        let response = self.send(uri, builder.build()).await?;

        let code = response.header().status_code();
        if !code.is_success() {
            error!(status = ?code, "Print-Job failed");
            return Err(match code {
                StatusCode::ServerErrorBusy | StatusCode::ServerErrorServiceUnavailable => {
                    DruckwerkError::Busy(format!("printer '{printer_cups_name}' is busy"))
                }
                _ => DruckwerkError::Backend(format!("Print-Job returned status {code:?}")),
            });
        }

        let job_id = extract_job_id(response.attributes()).ok_or_else(|| {
            DruckwerkError::Backend("Print-Job response missing job-id attribute".into())
        })?;
        info!(job_id, "print job accepted");
        Ok(job_id)
    }

    #[instrument(skip(self), fields(job_id))]
    async fn job_attributes(&self, job_id: i32) -> Result<JobAttributes> {
        let uri = self.any_uri()?;
        let mut request =
            IppRequestResponse::new(IppVersion::v1_1(), Operation::GetJobAttributes, Some(uri.clone()));
        request.attributes_mut().add(
            DelimiterTag::OperationAttributes,
            IppAttribute::new("job-id", IppValue::Integer(job_id)),
        );

        debug!("sending Get-Job-Attributes");
        let response = self.send(uri, request).await?;

        let code = response.header().status_code();
        if !code.is_success() {
            return Err(match code {
                StatusCode::ClientErrorNotFound => {
                    DruckwerkError::NotFound(format!("job {job_id}"))
                }
                _ => DruckwerkError::Backend(format!(
                    "Get-Job-Attributes({job_id}) returned status {code:?}"
                )),
            });
        }

        parse_job_attributes(response.attributes(), job_id)
    }

    #[instrument(skip(self), fields(job_id))]
    async fn cancel(&self, job_id: i32) -> Result<()> {
        let uri = self.any_uri()?;
        let operation = IppOperationBuilder::cancel_job(uri.clone(), job_id).build();

        info!("sending Cancel-Job");
        let response = self.send(uri, operation).await?;

        let code = response.header().status_code();
        // Unknown and already-terminal jobs cancel as a no-op.
        if code.is_success()
            || matches!(
                code,
                StatusCode::ClientErrorNotFound | StatusCode::ClientErrorNotPossible
            )
        {
            return Ok(());
        }
        error!(status = ?code, "Cancel-Job failed");
        Err(DruckwerkError::Backend(format!(
            "Cancel-Job({job_id}) returned status {code:?}"
        )))
    }

    async fn probe_reachable(&self, ipp: &str) -> bool {
        crate::probe::probe_reachable(&self.http, ipp).await
    }

    async fn paper_pct(&self, ipp: &str) -> Option<u8> {
        crate::probe::paper_pct(&self.http, ipp).await
    }
}

// ---------------------------------------------------------------------------
// IPP attribute plumbing
// ---------------------------------------------------------------------------

/// Translate `PrintOptions` into job-template attributes.
///
/// Only options carrying a value are forwarded; `page-ranges` becomes one
/// rangeOfInteger per component.
fn job_attributes_of(options: &PrintOptions) -> Result<Vec<IppAttribute>> {
    let mut attributes = vec![
        IppAttribute::new("copies", IppValue::Integer(options.copies as i32)),
        IppAttribute::new(
            "sides",
            IppValue::Keyword(options.sides.ipp_keyword().to_string()),
        ),
        IppAttribute::new(
            "number-up",
            IppValue::Integer(options.number_up.as_u32() as i32),
        ),
    ];

    if let Some(ranges) = &options.page_ranges {
        let parsed = parse_page_ranges(ranges)?;
        let values: Vec<IppValue> = parsed
            .iter()
            .map(|r| IppValue::RangeOfInteger {
                min: r.start as i32,
                max: r.end as i32,
            })
            .collect();
        let value = match values.len() {
            0 => return Err(DruckwerkError::InvalidArgument("empty page ranges".into())),
            1 => values.into_iter().next().unwrap_or(IppValue::Integer(0)),
            _ => IppValue::Array(values),
        };
        attributes.push(IppAttribute::new("page-ranges", value));
    }
    Ok(attributes)
}

/// Extract the `job-id` integer from a response's job attributes group.
fn extract_job_id(attrs: &IppAttributes) -> Option<i32> {
    for group in attrs.groups_of(DelimiterTag::JobAttributes) {
        if let Some(attr) = group.attributes().get("job-id")
            && let IppValue::Integer(id) = attr.value()
        {
            return Some(*id);
        }
    }
    None
}

/// Map a Get-Job-Attributes response into the domain snapshot.
fn parse_job_attributes(attrs: &IppAttributes, job_id: i32) -> Result<JobAttributes> {
    let group = attrs
        .groups_of(DelimiterTag::JobAttributes)
        .next()
        .ok_or_else(|| {
            DruckwerkError::Backend(format!("job {job_id}: response has no job attributes"))
        })?;
    let attributes = group.attributes();

    let job_state = attributes
        .get("job-state")
        .and_then(|a| match a.value() {
            IppValue::Enum(v) => JobState::from_ipp_enum(*v),
            IppValue::Integer(v) => JobState::from_ipp_enum(*v),
            _ => None,
        })
        .ok_or_else(|| {
            DruckwerkError::Backend(format!("job {job_id}: missing or bad job-state"))
        })?;

    let job_state_reasons = attributes
        .get("job-state-reasons")
        .map(|a| keywords_of(a.value()))
        .unwrap_or_default();

    let printer_state_reasons = attributes
        .get("job-printer-state-reasons")
        .map(|a| {
            keywords_of(a.value())
                .iter()
                .map(|k| StateReason::parse(k))
                .collect()
        })
        .unwrap_or_default();

    Ok(JobAttributes {
        job_state,
        job_state_reasons,
        job_state_message: text_of(attributes.get("job-state-message")),
        printer_state_reasons,
        printer_state_message: text_of(attributes.get("job-printer-state-message")),
    })
}

/// Flatten a single keyword or a 1setOf keywords into strings.
fn keywords_of(value: &IppValue) -> Vec<String> {
    match value {
        IppValue::Array(items) => items.iter().flat_map(keywords_of).collect(),
        IppValue::Keyword(k) => vec![k.clone()],
        other => vec![format!("{other}")],
    }
}

fn text_of(attribute: Option<&IppAttribute>) -> Option<String> {
    let text = format!("{}", attribute?.value());
    if text.is_empty() { None } else { Some(text) }
}

// ---------------------------------------------------------------------------
// Fake backend for tests
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    use std::sync::Mutex;

    use super::*;

    /// Scripted in-memory backend.
    ///
    /// `submit` hands out sequential job ids (or a scripted failure);
    /// `job_attributes` replays the scripted state sequence, repeating the
    /// final entry once exhausted.
    pub struct FakePrintBackend {
        states: Mutex<Vec<JobAttributes>>,
        cursor: Mutex<usize>,
        fail_submit: bool,
        pub submits: Mutex<Vec<(String, String, PrintOptions)>>,
        pub cancels: Mutex<Vec<i32>>,
    }

    impl FakePrintBackend {
        pub fn with_states(states: Vec<JobAttributes>) -> Self {
            Self {
                states: Mutex::new(states),
                cursor: Mutex::new(0),
                fail_submit: false,
                submits: Mutex::new(Vec::new()),
                cancels: Mutex::new(Vec::new()),
            }
        }

        pub fn failing_submit() -> Self {
            let mut fake = Self::with_states(Vec::new());
            fake.fail_submit = true;
            fake
        }

        /// Plain attribute snapshot in the given state.
        pub fn attrs(state: JobState) -> JobAttributes {
            JobAttributes {
                job_state: state,
                job_state_reasons: vec![],
                job_state_message: None,
                printer_state_reasons: vec![],
                printer_state_message: None,
            }
        }
    }

    #[async_trait]
    impl PrintBackend for FakePrintBackend {
        async fn submit(
            &self,
            printer_cups_name: &str,
            path: &Path,
            _title: &str,
            options: &PrintOptions,
        ) -> Result<i32> {
            if self.fail_submit {
                return Err(DruckwerkError::Backend("scripted submit failure".into()));
            }
            self.submits.lock().unwrap().push((
                printer_cups_name.to_string(),
                path.display().to_string(),
                options.clone(),
            ));
            Ok(self.submits.lock().unwrap().len() as i32)
        }

        async fn job_attributes(&self, job_id: i32) -> Result<JobAttributes> {
            let states = self.states.lock().unwrap();
            if states.is_empty() {
                return Err(DruckwerkError::NotFound(format!("job {job_id}")));
            }
            let mut cursor = self.cursor.lock().unwrap();
            let attrs = states[(*cursor).min(states.len() - 1)].clone();
            *cursor += 1;
            Ok(attrs)
        }

        async fn cancel(&self, job_id: i32) -> Result<()> {
            self.cancels.lock().unwrap().push(job_id);
            Ok(())
        }

        async fn probe_reachable(&self, _ipp: &str) -> bool {
            true
        }

        async fn paper_pct(&self, _ipp: &str) -> Option<u8> {
            Some(100)
        }
    }
}

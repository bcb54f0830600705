// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckwerk print/scan service.

use serde::{Deserialize, Serialize};

/// Verified user identity resolved from a bearer credential.
///
/// Every artifact, chat-state row, and job is scoped to exactly one owner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Opaque token identifying a stored artifact.
///
/// The textual form never contains path separators; resolution to a real
/// path happens only inside the artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle(pub String);

impl FileHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FileHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A configured printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printer {
    /// Human-readable name shown in menus.
    pub display_name: String,
    /// CUPS queue name used to address the printer when submitting jobs.
    pub cups_name: String,
    /// IPP endpoint (ipp:// or http://host:631/...) of the device.
    pub ipp: String,
}

/// A configured eSCL scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scanner {
    /// Human-readable name shown in menus.
    pub display_name: String,
    /// Stable identifier used in API calls.
    pub name: String,
    /// Base URL of the device's eSCL endpoint (https://host/eSCL).
    pub escl: String,
}

/// IPP job lifecycle states (RFC 8011 `job-state` enum values 3..=9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    PendingHeld,
    Processing,
    ProcessingStopped,
    Canceled,
    Aborted,
    Completed,
}

impl JobState {
    /// Map the wire-level `job-state` enum value.
    pub fn from_ipp_enum(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::PendingHeld),
            5 => Some(Self::Processing),
            6 => Some(Self::ProcessingStopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Terminal states end the poll loop.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Aborted | Self::Completed)
    }
}

/// Severity of a `printer-state-reasons` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasonSeverity {
    Error,
    Warning,
    Report,
    None,
}

/// A single printer-state reason with its parsed severity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateReason {
    pub reason: String,
    pub severity: ReasonSeverity,
}

impl StateReason {
    /// Split a keyword like `media-empty-error` into `(media-empty, Error)`.
    ///
    /// Keywords without a recognised suffix keep severity `None`.
    pub fn parse(keyword: &str) -> Self {
        for (suffix, severity) in [
            ("-error", ReasonSeverity::Error),
            ("-warning", ReasonSeverity::Warning),
            ("-report", ReasonSeverity::Report),
        ] {
            if let Some(stripped) = keyword.strip_suffix(suffix) {
                return Self {
                    reason: stripped.to_string(),
                    severity,
                };
            }
        }
        Self {
            reason: keyword.to_string(),
            severity: ReasonSeverity::None,
        }
    }
}

/// Snapshot of a print job as reported by the print backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttributes {
    pub job_state: JobState,
    pub job_state_reasons: Vec<String>,
    pub job_state_message: Option<String>,
    pub printer_state_reasons: Vec<StateReason>,
    pub printer_state_message: Option<String>,
}

impl JobAttributes {
    /// The most severe printer-state reason, if any reason carries one.
    pub fn worst_printer_reason(&self) -> Option<&StateReason> {
        self.printer_state_reasons
            .iter()
            .filter(|r| r.severity != ReasonSeverity::None)
            .min_by_key(|r| r.severity)
    }
}

/// One-sided or duplex printing (`sides` IPP attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sides {
    OneSided,
    TwoSidedLongEdge,
}

impl Sides {
    /// IPP `sides` keyword (RFC 8011 §5.2.8).
    pub fn ipp_keyword(&self) -> &'static str {
        match self {
            Self::OneSided => "one-sided",
            Self::TwoSidedLongEdge => "two-sided-long-edge",
        }
    }

    /// Pages that fit on one sheet of paper.
    pub fn pages_per_sheet(&self) -> u32 {
        match self {
            Self::OneSided => 1,
            Self::TwoSidedLongEdge => 2,
        }
    }
}

impl Default for Sides {
    fn default() -> Self {
        Self::OneSided
    }
}

/// Pages-per-side layout (`number-up` IPP attribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberUp {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
    #[serde(rename = "4")]
    Four,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "9")]
    Nine,
    #[serde(rename = "16")]
    Sixteen,
}

impl NumberUp {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Six => 6,
            Self::Nine => 9,
            Self::Sixteen => 16,
        }
    }

    /// Grid label shown in menus (`2x2` for four pages per side).
    pub fn layout_label(&self) -> &'static str {
        match self {
            Self::One => "1x1",
            Self::Two => "1x2",
            Self::Four => "2x2",
            Self::Six => "2x3",
            Self::Nine => "3x3",
            Self::Sixteen => "4x4",
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::One),
            2 => Some(Self::Two),
            4 => Some(Self::Four),
            6 => Some(Self::Six),
            9 => Some(Self::Nine),
            16 => Some(Self::Sixteen),
            _ => None,
        }
    }
}

impl Default for NumberUp {
    fn default() -> Self {
        Self::One
    }
}

/// Options forwarded to the print backend when submitting a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    pub copies: u32,
    /// Raw page-ranges string (`1-4,7`), `None` prints the whole document.
    #[serde(default)]
    pub page_ranges: Option<String>,
    #[serde(default)]
    pub sides: Sides,
    #[serde(default)]
    pub number_up: NumberUp,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            copies: 1,
            page_ranges: None,
            sides: Sides::OneSided,
            number_up: NumberUp::One,
        }
    }
}

impl PrintOptions {
    /// Render as IPP option pairs in canonical attribute naming.
    ///
    /// Only options carrying a value are forwarded; an absent `page-ranges`
    /// is omitted entirely rather than sent as an empty string.
    pub fn to_ipp_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("copies", self.copies.to_string()),
            ("sides", self.sides.ipp_keyword().to_string()),
            ("number-up", self.number_up.as_u32().to_string()),
        ];
        if let Some(ranges) = &self.page_ranges {
            pairs.push(("page-ranges", ranges.clone()));
        }
        pairs
    }
}

/// Scan resolution in DPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanQuality {
    #[serde(rename = "200")]
    Dpi200,
    #[serde(rename = "300")]
    Dpi300,
    #[serde(rename = "400")]
    Dpi400,
    #[serde(rename = "600")]
    Dpi600,
}

impl ScanQuality {
    pub fn dpi(&self) -> u32 {
        match self {
            Self::Dpi200 => 200,
            Self::Dpi300 => 300,
            Self::Dpi400 => 400,
            Self::Dpi600 => 600,
        }
    }
}

impl Default for ScanQuality {
    fn default() -> Self {
        Self::Dpi300
    }
}

/// Where the scanner pulls paper from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    /// Flatbed glass; one page per acquisition.
    Platen,
    /// Automatic document feeder.
    Adf,
}

impl InputSource {
    /// Value for the eSCL `InputSource` element.
    pub fn escl_keyword(&self) -> &'static str {
        match self {
            Self::Platen => "Platen",
            Self::Adf => "Adf",
        }
    }
}

impl Default for InputSource {
    fn default() -> Self {
        Self::Platen
    }
}

/// Options serialized into the eSCL scan intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Scan both sides of each sheet. Only honored for `Adf` input.
    #[serde(default)]
    pub duplex: bool,
    #[serde(default)]
    pub quality: ScanQuality,
    #[serde(default)]
    pub input_source: InputSource,
    /// Run the auto-crop pipeline on each acquired document.
    #[serde(default)]
    pub crop: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duplex: false,
            quality: ScanQuality::Dpi300,
            input_source: InputSource::Platen,
            crop: false,
        }
    }
}

impl ScanOptions {
    /// Value for the eSCL `Duplex` element.
    ///
    /// The flatbed cannot scan both sides in one pass, so duplex is forced
    /// off unless the feeder is selected.
    pub fn escl_duplex(&self) -> &'static str {
        match (self.input_source, self.duplex) {
            (InputSource::Adf, true) => "true",
            _ => "false",
        }
    }
}

/// Aggregated health of a configured printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterStatus {
    pub printer: Printer,
    pub offline: bool,
    /// Remaining toner, percent. Absent when the device value is untrusted.
    pub toner_pct: Option<u8>,
    /// Primary cassette fill level, percent.
    pub paper_pct: Option<u8>,
}

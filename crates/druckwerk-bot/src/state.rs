// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The per-owner conversation state.
//
// Each state tag carries exactly the context its flow needs, so an
// impossible combination (a print job id without a file, a scan session in
// the middle of a print flow) cannot be represented. At most one of the
// print and scan flows is active per owner by construction.

use serde::{Deserialize, Serialize};

use druckwerk_core::{FileHandle, NumberUp, ScanOptions, ScanQuality, Sides};

use crate::transport::MessageId;

/// Print-flow context accumulated while the user fills in the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintDraft {
    /// Selected printer (cups name); the menu stays disarmed without one.
    pub printer: Option<String>,
    /// Page count of the prepared PDF.
    pub pages: u32,
    /// The prepared PDF artifact.
    pub file_handle: FileHandle,
    pub copies: u32,
    pub page_ranges: Option<String>,
    pub sides: Sides,
    pub number_up: NumberUp,
    /// The long-lived message anchoring this job's callbacks.
    pub confirmation_message_id: MessageId,
    /// The transient sub-menu message, when one is open.
    pub job_settings_message_id: Option<MessageId>,
}

/// A dispatched print job being polled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintingJob {
    pub draft: PrintDraft,
    pub job_id: i32,
}

/// How the scanner is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// One page per acquisition from the flatbed glass.
    Manual,
    /// The document feeder pulls the whole stack.
    Auto,
}

/// Scan-flow context accumulated while the user fills in the menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDraft {
    pub mode: Option<ScanMode>,
    pub scanner: Option<String>,
    pub quality: ScanQuality,
    /// Both sides of each sheet; only meaningful in `Auto` mode.
    pub duplex: bool,
    pub crop: bool,
    /// Optional name for the resulting document.
    pub name: Option<String>,
    pub confirmation_message_id: MessageId,
    pub job_settings_message_id: Option<MessageId>,
}

impl ScanDraft {
    /// The wire options this draft resolves to.
    ///
    /// Manual mode always scans simplex from the glass; auto mode feeds
    /// from the ADF with the configured duplex setting.
    pub fn scan_options(&self) -> ScanOptions {
        use druckwerk_core::InputSource;
        match self.mode {
            Some(ScanMode::Auto) => ScanOptions {
                duplex: self.duplex,
                quality: self.quality,
                input_source: InputSource::Adf,
                crop: self.crop,
            },
            _ => ScanOptions {
                duplex: false,
                quality: self.quality,
                input_source: InputSource::Platen,
                crop: self.crop,
            },
        }
    }
}

/// A scan session with its growing artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSession {
    pub draft: ScanDraft,
    /// The merged artifact, absent until the first acquisition lands.
    pub artifact: Option<FileHandle>,
    pub page_count: u32,
    /// The in-flight device job, while one exists.
    pub scan_job_id: Option<String>,
}

/// The conversation state tag with its per-state context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChatState {
    #[default]
    Default,

    // -- Print flow --
    PrintSettingsMenu(PrintDraft),
    SetupPrinter(PrintDraft),
    SetupCopies(PrintDraft),
    SetupPages(PrintDraft),
    SetupSides(PrintDraft),
    SetupLayout(PrintDraft),
    Printing(PrintingJob),

    // -- Scan flow --
    ScanSettingsMenu(ScanDraft),
    SetupScanMode(ScanDraft),
    SetupScanner(ScanDraft),
    SetupScanQuality(ScanDraft),
    SetupScanSides(ScanDraft),
    SetupScanCrop(ScanDraft),
    SetupScanName(ScanDraft),
    Scanning(ScanSession),
    ScanPauseMenu(ScanSession),
}

impl ChatState {
    /// The confirmation message anchoring the active flow, if any.
    pub fn confirmation_message_id(&self) -> Option<MessageId> {
        match self {
            Self::Default => None,
            Self::PrintSettingsMenu(d)
            | Self::SetupPrinter(d)
            | Self::SetupCopies(d)
            | Self::SetupPages(d)
            | Self::SetupSides(d)
            | Self::SetupLayout(d) => Some(d.confirmation_message_id),
            Self::Printing(j) => Some(j.draft.confirmation_message_id),
            Self::ScanSettingsMenu(d)
            | Self::SetupScanMode(d)
            | Self::SetupScanner(d)
            | Self::SetupScanQuality(d)
            | Self::SetupScanSides(d)
            | Self::SetupScanCrop(d)
            | Self::SetupScanName(d) => Some(d.confirmation_message_id),
            Self::Scanning(s) | Self::ScanPauseMenu(s) => Some(s.draft.confirmation_message_id),
        }
    }

    /// The open sub-menu message, if any.
    pub fn job_settings_message_id(&self) -> Option<MessageId> {
        match self {
            Self::PrintSettingsMenu(d)
            | Self::SetupPrinter(d)
            | Self::SetupCopies(d)
            | Self::SetupPages(d)
            | Self::SetupSides(d)
            | Self::SetupLayout(d) => d.job_settings_message_id,
            Self::Printing(j) => j.draft.job_settings_message_id,
            Self::ScanSettingsMenu(d)
            | Self::SetupScanMode(d)
            | Self::SetupScanner(d)
            | Self::SetupScanQuality(d)
            | Self::SetupScanSides(d)
            | Self::SetupScanCrop(d)
            | Self::SetupScanName(d) => d.job_settings_message_id,
            _ => None,
        }
    }
}

/// The persisted row: state plus the preferences that outlive a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChatRow {
    pub state: ChatState,
    /// Printer remembered across jobs.
    pub preferred_printer: Option<String>,
    /// Scanner remembered across jobs.
    pub preferred_scanner: Option<String>,
    /// Set after the first scan; later `/scan` calls default to manual
    /// mode instead of asking.
    pub scanned_before: bool,
}

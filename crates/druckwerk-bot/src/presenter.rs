// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Message texts and inline keyboards for the chat flows.
//
// Presentation only — nothing here mutates state. The glyph sequences are
// cosmetic; the contract is that the text updates while a job runs and
// settles on a fixed terminal form.

use druckwerk_core::{
    JobAttributes, JobState, NumberUp, PrinterStatus, ReasonSeverity, ScanQuality, Sides,
};

use crate::state::{PrintDraft, ScanDraft, ScanMode, ScanSession};
use crate::transport::{Button, Keyboard};

/// Rotating glyphs shown while a job is processing.
const THROBBER: [&str; 4] = ["⤹", "⤿", "⤻", "⤺"];

/// Suffix appended when a confirmation message outlives its job.
pub const EXPIRED_SUFFIX: &str = "\nThis job has expired 🕒";

pub fn help_text() -> String {
    concat!(
        "Send me a document to print it, or use /scan to scan paper into a PDF.\n",
        "I support PDF uploads directly and convert common office formats for you.",
    )
    .to_string()
}

pub fn file_too_large() -> String {
    "File is too large\n\nMaximum size is 20 MB".to_string()
}

pub fn albums_unsupported() -> String {
    "Multiple files are not supported yet, send one file at a time".to_string()
}

// ---------------------------------------------------------------------------
// Print flow
// ---------------------------------------------------------------------------

fn sides_label(sides: Sides) -> &'static str {
    match sides {
        Sides::OneSided => "One side",
        Sides::TwoSidedLongEdge => "Both sides",
    }
}

/// One-line printer health summary for menus.
pub fn printer_status_line(status: Option<&PrinterStatus>) -> String {
    let Some(status) = status else {
        return "—".to_string();
    };
    let mut line = status.printer.display_name.clone();
    if status.offline {
        line.push_str(", ☠️ Offline");
    } else {
        match (status.toner_pct, status.paper_pct) {
            (Some(toner), Some(paper)) => {
                line.push_str(&format!(" 🩸 {toner}% 📄 {paper}%"));
            }
            (Some(toner), None) => line.push_str(&format!(" 🩸 {toner}%")),
            (None, Some(paper)) => {
                let presence = if paper > 0 { "is present" } else { "is absent" };
                line.push_str(&format!(", 📄 paper {presence}"));
            }
            (None, None) => {}
        }
    }
    line
}

/// The confirmation-menu caption plus its keyboard.
pub fn print_menu(
    draft: &PrintDraft,
    status: Option<&PrinterStatus>,
    papers: u64,
    headline: Option<&str>,
) -> (String, Keyboard) {
    let mut caption = format!("{}\n", headline.unwrap_or("Document is ready to be printed"));
    caption.push_str(&format!("Total papers: {papers}\n"));
    caption.push_str(&format!("🖨 {}\n", printer_status_line(status)));

    let printer_label = status
        .map(|s| s.printer.display_name.clone())
        .unwrap_or_else(|| "—".to_string());
    let ranges_label = draft.page_ranges.clone().unwrap_or_else(|| "all".into());

    let keyboard = Keyboard::rows(vec![
        vec![
            Button::new("Printer", "menu:printer"),
            Button::new(format!("✏️ {printer_label}"), "menu:printer"),
        ],
        vec![
            Button::new("Copies", "menu:copies"),
            Button::new(format!("✏️ {}", draft.copies), "menu:copies"),
        ],
        vec![
            Button::new("Layout", "menu:layout"),
            Button::new(format!("✏️ {}", draft.number_up.layout_label()), "menu:layout"),
        ],
        vec![
            Button::new("Pages", "menu:pages"),
            Button::new(format!("✏️ {ranges_label}"), "menu:pages"),
        ],
        vec![
            Button::new("Print on", "menu:sides"),
            Button::new(format!("✏️ {}", sides_label(draft.sides)), "menu:sides"),
        ],
        vec![
            Button::new("✖️ Cancel", "menu:cancel"),
            Button::new("✅ Confirm", "menu:confirm"),
        ],
    ]);

    (caption, keyboard)
}

fn job_state_line(attributes: &JobAttributes, iteration: u32) -> String {
    match attributes.job_state {
        JobState::Pending => "⏳ Pending".to_string(),
        JobState::PendingHeld => "⏳⏸ Pending held".to_string(),
        JobState::Processing => {
            format!("{} Processing", THROBBER[(iteration as usize) % THROBBER.len()])
        }
        JobState::ProcessingStopped => "⏸ Paused".to_string(),
        JobState::Canceled => "❌ Job was cancelled".to_string(),
        JobState::Aborted => "☠️ Job was aborted".to_string(),
        JobState::Completed => "✅ Completed".to_string(),
    }
}

/// The live printing caption: job parameters, state throbber, and the worst
/// printer-state reason when one is flagged.
pub fn printing_message(
    draft: &PrintDraft,
    printer_display: &str,
    attributes: Option<&JobAttributes>,
    iteration: u32,
    cancelled_manually: bool,
    timed_out: bool,
) -> String {
    let ranges_label = draft.page_ranges.clone().unwrap_or_else(|| "all".into());
    let mut caption = format!(
        "🖨 Printing job:\n\
         ⦁ Printer: {printer_display}\n\
         ⦁ Copies: {}\n\
         ⦁ Layout: {}\n\
         ⦁ Pages: {ranges_label} (in document: {})\n\
         ⦁ Print on: {}\n",
        draft.copies,
        draft.number_up.layout_label(),
        draft.pages,
        sides_label(draft.sides),
    );

    if let Some(attributes) = attributes {
        caption.push_str(&job_state_line(attributes, iteration));
        caption.push('\n');

        if let Some(worst) = attributes.worst_printer_reason() {
            let mut notification = match worst.severity {
                ReasonSeverity::Error => {
                    format!("⛔️ Error, requires attention ({})", worst.reason)
                }
                ReasonSeverity::Warning => {
                    format!("⚠️ Warning, still printing ({})", worst.reason)
                }
                ReasonSeverity::Report => {
                    format!("❕ Report, still printing ({})", worst.reason)
                }
                ReasonSeverity::None => String::new(),
            };
            if !notification.is_empty() {
                // Devices spam their sleep announcements through this field.
                if let Some(message) = attributes
                    .printer_state_message
                    .as_deref()
                    .filter(|m| !m.starts_with("Sleep"))
                {
                    notification.push_str(&format!(":\n{message}"));
                }
                caption.push('\n');
                caption.push_str(&notification);
                caption.push('\n');
            }
        }
    }

    if cancelled_manually {
        caption.push_str(
            "\nCancelled on demand\nPress the button on printer panel if it is still printing.",
        );
    }
    if timed_out {
        caption.push_str("\nJob is timed out ☠️\n");
    }
    caption
}

/// Cancel-only keyboard shown while the job is polling.
pub fn printing_keyboard(job_id: i32) -> Keyboard {
    Keyboard::rows(vec![vec![Button::new(
        "✖️ Cancel",
        format!("printing:cancel:{job_id}"),
    )]])
}

pub fn printer_choice_keyboard(printers: &[druckwerk_core::Printer]) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = printers
        .iter()
        .map(|p| {
            vec![Button::new(
                p.display_name.clone(),
                format!("printer:{}", p.cups_name),
            )]
        })
        .collect();
    rows.push(vec![Button::new("↩ Back", "setup:back")]);
    Keyboard::rows(rows)
}

pub fn copies_keyboard() -> Keyboard {
    Keyboard::rows(vec![
        [1u32, 2, 3, 5, 10]
            .iter()
            .map(|n| Button::new(n.to_string(), format!("copies:{n}")))
            .collect(),
        vec![Button::new("↩ Back", "setup:back")],
    ])
}

pub fn copies_prompt() -> String {
    "How many copies? Pick one or type a number.".to_string()
}

pub fn sides_keyboard() -> Keyboard {
    Keyboard::rows(vec![
        vec![
            Button::new("One side", "sides:one-sided"),
            Button::new("Both sides", "sides:two-sided-long-edge"),
        ],
        vec![Button::new("↩ Back", "setup:back")],
    ])
}

pub fn layout_keyboard() -> Keyboard {
    let buttons = [
        NumberUp::One,
        NumberUp::Two,
        NumberUp::Four,
        NumberUp::Six,
        NumberUp::Nine,
        NumberUp::Sixteen,
    ]
    .iter()
    .map(|n| Button::new(n.layout_label(), format!("layout:{}", n.as_u32())))
    .collect();
    Keyboard::rows(vec![buttons, vec![Button::new("↩ Back", "setup:back")]])
}

pub fn pages_prompt() -> String {
    "Which pages should I print? Type ranges like 1-4,7 or press All.".to_string()
}

pub fn pages_keyboard() -> Keyboard {
    Keyboard::rows(vec![vec![
        Button::new("All pages", "pages:all"),
        Button::new("↩ Back", "setup:back"),
    ]])
}

pub fn pages_suggestion(normalized: &str) -> (String, Keyboard) {
    (
        format!("Did you mean {normalized}?"),
        Keyboard::rows(vec![vec![
            Button::new("✅ Yes", format!("pages:apply:{normalized}")),
            Button::new("↩ Back", "setup:back"),
        ]]),
    )
}

pub fn pages_invalid() -> String {
    "I could not read that as page ranges. Try something like 1-4,7.".to_string()
}

pub fn print_cancelled_note(caption_base: &str) -> String {
    format!("{caption_base}\n\nYou've cancelled this print work 🤷")
}

// ---------------------------------------------------------------------------
// Scan flow
// ---------------------------------------------------------------------------

fn mode_label(mode: Option<ScanMode>) -> &'static str {
    match mode {
        Some(ScanMode::Manual) => "Manual (glass, page by page)",
        Some(ScanMode::Auto) => "Auto (document feeder)",
        None => "—",
    }
}

fn quality_label(quality: ScanQuality) -> String {
    format!("{} DPI", quality.dpi())
}

/// The scan settings caption plus its keyboard.
pub fn scan_menu(draft: &ScanDraft, scanner_display: Option<&str>) -> (String, Keyboard) {
    let caption = format!(
        "Ready to scan\n🖨 {}\n",
        scanner_display.unwrap_or("—"),
    );
    let duplex = if draft.duplex { "Both sides" } else { "One side" };
    let crop = if draft.crop { "On" } else { "Off" };
    let name = draft.name.clone().unwrap_or_else(|| "scan".into());

    let keyboard = Keyboard::rows(vec![
        vec![
            Button::new("Mode", "scanmenu:mode"),
            Button::new(format!("✏️ {}", mode_label(draft.mode)), "scanmenu:mode"),
        ],
        vec![
            Button::new("Scanner", "scanmenu:scanner"),
            Button::new(
                format!("✏️ {}", scanner_display.unwrap_or("—")),
                "scanmenu:scanner",
            ),
        ],
        vec![
            Button::new("Quality", "scanmenu:quality"),
            Button::new(format!("✏️ {}", quality_label(draft.quality)), "scanmenu:quality"),
        ],
        vec![
            Button::new("Scan on", "scanmenu:sides"),
            Button::new(format!("✏️ {duplex}"), "scanmenu:sides"),
        ],
        vec![
            Button::new("Auto-crop", "scanmenu:crop"),
            Button::new(format!("✏️ {crop}"), "scanmenu:crop"),
        ],
        vec![
            Button::new("Name", "scanmenu:name"),
            Button::new(format!("✏️ {name}"), "scanmenu:name"),
        ],
        vec![
            Button::new("✖️ Cancel", "scan:cancel"),
            Button::new("▶️ Start", "scan:start"),
        ],
    ]);

    (caption, keyboard)
}

/// Caption while an acquisition is running on the device.
pub fn scanning_message(scanner_display: Option<&str>, phase: &str) -> String {
    match phase {
        "starting" => format!("Starting the scanner {}…", scanner_display.unwrap_or("—")),
        "scanning" => format!("Scanning on {}… put the page on the glass", scanner_display.unwrap_or("—")),
        "cancelled" => "Scanning cancelled".to_string(),
        _ => "Scanning…".to_string(),
    }
}

/// Caption and keyboard between acquisitions.
pub fn scan_paused(session: &ScanSession, is_finished: bool) -> (String, Option<Keyboard>) {
    let pages = session.page_count;
    let caption = if is_finished {
        format!("Scanned document, {pages} page(s). Done ✅")
    } else {
        format!("Scanned {pages} page(s) so far. Scan more or finish.")
    };
    if is_finished {
        return (caption, None);
    }
    let keyboard = Keyboard::rows(vec![
        vec![
            Button::new("➕ Scan more", "pause:more"),
            Button::new("🆕 Scan new", "pause:new"),
        ],
        vec![Button::new("↩️ Remove last page", "pause:undo")],
        vec![
            Button::new("✖️ Cancel", "pause:cancel"),
            Button::new("✅ Finish", "pause:finish"),
        ],
    ]);
    (caption, Some(keyboard))
}

pub fn scanner_busy() -> String {
    "Scanner is busy. Try pressing Cancel button on the device and try again.".to_string()
}

pub fn scanner_choice_keyboard(scanners: &[druckwerk_core::Scanner]) -> Keyboard {
    let mut rows: Vec<Vec<Button>> = scanners
        .iter()
        .map(|s| vec![Button::new(s.display_name.clone(), format!("scanner:{}", s.name))])
        .collect();
    rows.push(vec![Button::new("↩ Back", "setup:back")]);
    Keyboard::rows(rows)
}

pub fn scan_mode_keyboard() -> Keyboard {
    Keyboard::rows(vec![
        vec![
            Button::new("Manual (glass)", "scanmode:manual"),
            Button::new("Auto (feeder)", "scanmode:auto"),
        ],
        vec![Button::new("↩ Back", "setup:back")],
    ])
}

pub fn scan_quality_keyboard() -> Keyboard {
    Keyboard::rows(vec![
        [200u32, 300, 400, 600]
            .iter()
            .map(|dpi| Button::new(format!("{dpi} DPI"), format!("quality:{dpi}")))
            .collect(),
        vec![Button::new("↩ Back", "setup:back")],
    ])
}

pub fn scan_sides_keyboard() -> Keyboard {
    Keyboard::rows(vec![
        vec![
            Button::new("One side", "scansides:false"),
            Button::new("Both sides", "scansides:true"),
        ],
        vec![Button::new("↩ Back", "setup:back")],
    ])
}

pub fn scan_crop_keyboard() -> Keyboard {
    Keyboard::rows(vec![
        vec![
            Button::new("Auto-crop on", "crop:on"),
            Button::new("Auto-crop off", "crop:off"),
        ],
        vec![Button::new("↩ Back", "setup:back")],
    ])
}

pub fn scan_name_prompt() -> String {
    "What should the scanned document be called? Type a name.".to_string()
}

/// Download name for the finished artifact.
pub fn scan_file_name(session: &ScanSession) -> String {
    let base = session
        .draft
        .name
        .clone()
        .unwrap_or_else(|| "scan".to_string());
    format!("{base}.pdf")
}

#[cfg(test)]
mod tests {
    use druckwerk_core::{FileHandle, Printer, StateReason};

    use super::*;

    fn draft() -> PrintDraft {
        PrintDraft {
            printer: Some("office".into()),
            pages: 10,
            file_handle: FileHandle::from("abc"),
            copies: 2,
            page_ranges: Some("1-4".into()),
            sides: Sides::OneSided,
            number_up: NumberUp::Four,
            confirmation_message_id: 1,
            job_settings_message_id: None,
        }
    }

    fn attrs(state: JobState) -> JobAttributes {
        JobAttributes {
            job_state: state,
            job_state_reasons: vec![],
            job_state_message: None,
            printer_state_reasons: vec![],
            printer_state_message: None,
        }
    }

    #[test]
    fn throbber_rotates_while_processing() {
        let frames: Vec<String> = (0..4)
            .map(|i| printing_message(&draft(), "Office", Some(&attrs(JobState::Processing)), i, false, false))
            .collect();
        for pair in frames.windows(2) {
            assert_ne!(pair[0], pair[1], "consecutive frames must differ");
        }
        // One full rotation returns to the first glyph.
        let again = printing_message(&draft(), "Office", Some(&attrs(JobState::Processing)), 4, false, false);
        assert_eq!(frames[0], again);
    }

    #[test]
    fn terminal_states_have_fixed_glyphs() {
        for (state, needle) in [
            (JobState::Completed, "✅ Completed"),
            (JobState::Canceled, "❌ Job was cancelled"),
            (JobState::Aborted, "☠️ Job was aborted"),
        ] {
            let caption = printing_message(&draft(), "Office", Some(&attrs(state)), 9, false, false);
            assert!(caption.contains(needle), "missing '{needle}' in: {caption}");
        }
    }

    #[test]
    fn error_reason_is_surfaced() {
        let mut attributes = attrs(JobState::Processing);
        attributes.printer_state_reasons = vec![StateReason::parse("media-empty-error")];
        let caption = printing_message(&draft(), "Office", Some(&attributes), 0, false, false);
        assert!(caption.contains("⛔️ Error, requires attention (media-empty)"));
    }

    #[test]
    fn sleep_messages_are_suppressed() {
        let mut attributes = attrs(JobState::Processing);
        attributes.printer_state_reasons = vec![StateReason::parse("media-needed-warning")];
        attributes.printer_state_message = Some("Sleeping deeply".into());
        let caption = printing_message(&draft(), "Office", Some(&attributes), 0, false, false);
        assert!(!caption.contains("Sleeping deeply"));
    }

    #[test]
    fn timed_out_and_cancelled_marks() {
        let cancelled = printing_message(&draft(), "Office", None, 0, true, false);
        assert!(cancelled.contains("Cancelled on demand"));
        let timed_out = printing_message(&draft(), "Office", None, 0, false, true);
        assert!(timed_out.contains("Job is timed out"));
    }

    #[test]
    fn status_line_variants() {
        let printer = Printer {
            display_name: "Office".into(),
            cups_name: "office".into(),
            ipp: "http://10.0.0.10:631/".into(),
        };
        let offline = PrinterStatus {
            printer: printer.clone(),
            offline: true,
            toner_pct: Some(10),
            paper_pct: Some(20),
        };
        assert!(printer_status_line(Some(&offline)).contains("Offline"));

        let healthy = PrinterStatus {
            printer,
            offline: false,
            toner_pct: Some(33),
            paper_pct: Some(44),
        };
        let line = printer_status_line(Some(&healthy));
        assert!(line.contains("33%") && line.contains("44%"));
        assert_eq!(printer_status_line(None), "—");
    }

    #[test]
    fn menus_carry_their_callback_data() {
        let (_, keyboard) = print_menu(&draft(), None, 4, None);
        let data: Vec<&str> = keyboard
            .rows
            .iter()
            .flatten()
            .map(|b| b.data.as_str())
            .collect();
        for expected in [
            "menu:printer",
            "menu:copies",
            "menu:layout",
            "menu:pages",
            "menu:sides",
            "menu:cancel",
            "menu:confirm",
        ] {
            assert!(data.contains(&expected), "missing {expected}");
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print-flow handlers: document intake, the settings sub-menus, dispatch,
// and the live poll that animates the confirmation message.

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::{NumberUp, OwnerId, PrintOptions, PrinterStatus, Sides};
use druckwerk_print::{PollEnd, PrintOrchestrator, RangeCheck, count_of_papers_to_print,
    normalize_page_ranges};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::presenter;
use crate::state::{ChatRow, ChatState, PrintDraft, PrintingJob};
use crate::transport::{ChatId, Keyboard};

use super::ChatFlow;

/// Uploads past this size are turned away before download.
const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;

impl ChatFlow {
    // -- Document intake -------------------------------------------------------

    /// A document arrived: download, prepare, and open the print menu.
    pub(crate) async fn on_document(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        file_ref: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<()> {
        if file_size > MAX_UPLOAD_BYTES {
            self.inner
                .transport
                .send_message(chat, &presenter::file_too_large(), None)
                .await?;
            return Ok(());
        }

        let message = self
            .inner
            .transport
            .send_message(chat, "Downloading…", None)
            .await?;

        let bytes = self.inner.transport.download(file_ref).await?;
        self.inner
            .transport
            .edit_message(chat, message, "Converting document to PDF…", None)
            .await?;

        let prepared = match self.inner.print.prepare(owner, file_name, bytes).await {
            Ok(prepared) => prepared,
            Err(DruckwerkError::UnsupportedFormat(detail)) => {
                self.inner
                    .transport
                    .edit_message(
                        chat,
                        message,
                        &format!(
                            "Unfortunately, we cannot print this file yet because of {detail}.\n\
                             Please send a file of a supported type (pdf, doc, docx, png, txt, \
                             jpg, md, bmp, xlsx, xls, odt, ods) or convert it to PDF manually."
                        ),
                        None,
                    )
                    .await?;
                return Ok(());
            }
            Err(e) => {
                warn!(%e, "document preparation failed");
                self.inner
                    .transport
                    .edit_message(
                        chat,
                        message,
                        "An error occurred while converting the file. It may be corrupted or \
                         too large. Please convert it to PDF manually and try again.",
                        None,
                    )
                    .await?;
                return Ok(());
            }
        };

        // A remembered printer is only trusted while it is still configured.
        let printer = row
            .preferred_printer
            .clone()
            .filter(|name| self.inner.settings.find_printer(name).is_some());

        let mut draft = PrintDraft {
            printer,
            pages: prepared.pages,
            file_handle: prepared.file_handle,
            copies: 1,
            page_ranges: None,
            sides: Sides::OneSided,
            number_up: NumberUp::One,
            confirmation_message_id: message,
            job_settings_message_id: None,
        };

        let caption = self.render_print_menu(chat, &draft, None).await?;
        self.inner
            .expiry
            .arm(chat, message, format!("{caption}{}", presenter::EXPIRED_SUFFIX));

        if draft.printer.is_none() {
            self.open_printer_setup(chat, &mut draft).await?;
            row.state = ChatState::SetupPrinter(draft);
        } else {
            row.state = ChatState::PrintSettingsMenu(draft);
        }
        Ok(())
    }

    /// Compute papers + printer status and redraw the confirmation menu.
    ///
    /// The keyboard only appears once a printer has been chosen.
    async fn render_print_menu(
        &self,
        chat: ChatId,
        draft: &PrintDraft,
        headline: Option<&str>,
    ) -> Result<String> {
        let papers = count_of_papers_to_print(
            draft.pages as i64,
            draft.page_ranges.as_deref(),
            draft.number_up.as_u32(),
            draft.sides,
            draft.copies,
        )
        .unwrap_or(0);

        let status = self.printer_status_of(draft.printer.as_deref()).await;
        let (caption, keyboard) = presenter::print_menu(draft, status.as_ref(), papers, headline);
        let keyboard = draft.printer.as_ref().map(|_| keyboard);
        self.inner
            .transport
            .edit_message(chat, draft.confirmation_message_id, &caption, keyboard)
            .await?;
        Ok(caption)
    }

    async fn printer_status_of(&self, cups_name: Option<&str>) -> Option<PrinterStatus> {
        let printer = self.inner.settings.find_printer(cups_name?)?;
        Some(self.inner.status.status(printer).await)
    }

    // -- Sub-menus -------------------------------------------------------------

    async fn open_settings_message(
        &self,
        chat: ChatId,
        draft: &mut PrintDraft,
        prompt: &str,
        keyboard: Keyboard,
    ) -> Result<()> {
        self.discard_settings_message(chat, draft.job_settings_message_id)
            .await;
        let message = self
            .inner
            .transport
            .send_message(chat, prompt, Some(keyboard))
            .await?;
        draft.job_settings_message_id = Some(message);
        Ok(())
    }

    async fn open_printer_setup(&self, chat: ChatId, draft: &mut PrintDraft) -> Result<()> {
        let keyboard = presenter::printer_choice_keyboard(&self.inner.settings.printers);
        self.open_settings_message(chat, draft, "Which printer?", keyboard)
            .await
    }

    /// Apply a draft mutation and fall back to the settings menu.
    pub(crate) async fn back_to_print_menu(
        &self,
        _owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut draft: PrintDraft,
    ) -> Result<()> {
        self.discard_settings_message(chat, draft.job_settings_message_id)
            .await;
        draft.job_settings_message_id = None;
        self.render_print_menu(chat, &draft, None).await?;
        row.state = ChatState::PrintSettingsMenu(draft);
        Ok(())
    }

    // -- Callback routing ------------------------------------------------------

    pub(crate) async fn on_print_callback(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        data: &str,
    ) -> Result<()> {
        match (row.state.clone(), data) {
            // Open sub-menus from the settings menu (or hop between them).
            (
                ChatState::PrintSettingsMenu(mut draft)
                | ChatState::SetupPrinter(mut draft)
                | ChatState::SetupCopies(mut draft)
                | ChatState::SetupPages(mut draft)
                | ChatState::SetupSides(mut draft)
                | ChatState::SetupLayout(mut draft),
                "menu:printer",
            ) => {
                self.open_printer_setup(chat, &mut draft).await?;
                row.state = ChatState::SetupPrinter(draft);
                Ok(())
            }
            (
                ChatState::PrintSettingsMenu(mut draft)
                | ChatState::SetupPrinter(mut draft)
                | ChatState::SetupCopies(mut draft)
                | ChatState::SetupPages(mut draft)
                | ChatState::SetupSides(mut draft)
                | ChatState::SetupLayout(mut draft),
                "menu:copies",
            ) => {
                self.open_settings_message(
                    chat,
                    &mut draft,
                    &presenter::copies_prompt(),
                    presenter::copies_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupCopies(draft);
                Ok(())
            }
            (
                ChatState::PrintSettingsMenu(mut draft)
                | ChatState::SetupPrinter(mut draft)
                | ChatState::SetupCopies(mut draft)
                | ChatState::SetupPages(mut draft)
                | ChatState::SetupSides(mut draft)
                | ChatState::SetupLayout(mut draft),
                "menu:pages",
            ) => {
                self.open_settings_message(
                    chat,
                    &mut draft,
                    &presenter::pages_prompt(),
                    presenter::pages_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupPages(draft);
                Ok(())
            }
            (
                ChatState::PrintSettingsMenu(mut draft)
                | ChatState::SetupPrinter(mut draft)
                | ChatState::SetupCopies(mut draft)
                | ChatState::SetupPages(mut draft)
                | ChatState::SetupSides(mut draft)
                | ChatState::SetupLayout(mut draft),
                "menu:sides",
            ) => {
                self.open_settings_message(
                    chat,
                    &mut draft,
                    "Print on one side or both?",
                    presenter::sides_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupSides(draft);
                Ok(())
            }
            (
                ChatState::PrintSettingsMenu(mut draft)
                | ChatState::SetupPrinter(mut draft)
                | ChatState::SetupCopies(mut draft)
                | ChatState::SetupPages(mut draft)
                | ChatState::SetupSides(mut draft)
                | ChatState::SetupLayout(mut draft),
                "menu:layout",
            ) => {
                self.open_settings_message(
                    chat,
                    &mut draft,
                    "How many pages per side?",
                    presenter::layout_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupLayout(draft);
                Ok(())
            }

            // Cancel the whole configuration.
            (
                ChatState::PrintSettingsMenu(draft)
                | ChatState::SetupPrinter(draft)
                | ChatState::SetupCopies(draft)
                | ChatState::SetupPages(draft)
                | ChatState::SetupSides(draft)
                | ChatState::SetupLayout(draft),
                "menu:cancel",
            ) => self.cancel_print_configuration(owner, chat, row, draft).await,

            // Dispatch.
            (ChatState::PrintSettingsMenu(draft), "menu:confirm") => {
                self.confirm_print(owner, chat, row, draft).await
            }

            // Sub-menu value selections.
            (ChatState::SetupPrinter(mut draft), _) if data.starts_with("printer:") => {
                let cups_name = &data["printer:".len()..];
                if self.inner.settings.find_printer(cups_name).is_some() {
                    draft.printer = Some(cups_name.to_string());
                    row.preferred_printer = Some(cups_name.to_string());
                }
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupCopies(mut draft), _) if data.starts_with("copies:") => {
                if let Ok(copies) = data["copies:".len()..].parse::<u32>()
                    && (1..=1000).contains(&copies)
                {
                    draft.copies = copies;
                }
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupPages(mut draft), "pages:all") => {
                draft.page_ranges = None;
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupPages(mut draft), _) if data.starts_with("pages:apply:") => {
                draft.page_ranges = Some(data["pages:apply:".len()..].to_string());
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupSides(mut draft), "sides:one-sided") => {
                draft.sides = Sides::OneSided;
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupSides(mut draft), "sides:two-sided-long-edge") => {
                draft.sides = Sides::TwoSidedLongEdge;
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupLayout(mut draft), _) if data.starts_with("layout:") => {
                if let Ok(value) = data["layout:".len()..].parse::<u32>()
                    && let Some(number_up) = NumberUp::from_u32(value)
                {
                    draft.number_up = number_up;
                }
                self.back_to_print_menu(owner, chat, row, draft).await
            }

            // Cancel a running job.
            (ChatState::Printing(job), _) if data.starts_with("printing:cancel:") => {
                debug!(job_id = job.job_id, "user cancelled mid-print");
                if let Some(token) = self
                    .inner
                    .poll_cancels
                    .get(&(owner.clone(), job.job_id))
                {
                    token.cancel();
                }
                Ok(())
            }

            (state, _) => {
                debug!(?state, data, "print callback does not apply");
                Ok(())
            }
        }
    }

    // -- Typed input -----------------------------------------------------------

    pub(crate) async fn on_copies_text(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut draft: PrintDraft,
        text: &str,
    ) -> Result<()> {
        match text.trim().parse::<u32>() {
            Ok(copies) if (1..=1000).contains(&copies) => {
                draft.copies = copies;
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            _ => {
                self.inner
                    .transport
                    .send_message(chat, "Please send a number of copies between 1 and 1000.", None)
                    .await?;
                Ok(())
            }
        }
    }

    /// Typed page ranges: apply when canonical, offer the repaired form
    /// back when normalization changed anything.
    pub(crate) async fn on_pages_text(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut draft: PrintDraft,
        text: &str,
    ) -> Result<()> {
        if text.trim().eq_ignore_ascii_case("all") {
            draft.page_ranges = None;
            return self.back_to_print_menu(owner, chat, row, draft).await;
        }

        match normalize_page_ranges(text) {
            Ok(RangeCheck::Valid(ranges)) => {
                draft.page_ranges = Some(ranges);
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            Ok(RangeCheck::Suggestion(normalized)) => {
                let (prompt, keyboard) = presenter::pages_suggestion(&normalized);
                self.open_settings_message(chat, &mut draft, &prompt, keyboard)
                    .await?;
                row.state = ChatState::SetupPages(draft);
                Ok(())
            }
            Err(_) => {
                self.inner
                    .transport
                    .send_message(chat, &presenter::pages_invalid(), None)
                    .await?;
                Ok(())
            }
        }
    }

    // -- Cancel / confirm ------------------------------------------------------

    async fn cancel_print_configuration(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        draft: PrintDraft,
    ) -> Result<()> {
        self.discard_settings_message(chat, draft.job_settings_message_id)
            .await;
        if let Err(e) = self
            .inner
            .print
            .cancel_preparation(owner, &draft.file_handle)
            .await
        {
            warn!(%e, "could not drop prepared artifact");
        }
        self.inner.expiry.disarm(chat, draft.confirmation_message_id);

        let caption = presenter::print_cancelled_note("Print configuration closed.");
        self.inner
            .transport
            .edit_message(chat, draft.confirmation_message_id, &caption, None)
            .await?;
        row.state = ChatState::Default;
        Ok(())
    }

    async fn confirm_print(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut draft: PrintDraft,
    ) -> Result<()> {
        let Some(printer) = draft.printer.clone() else {
            // The keyboard is hidden until a printer is chosen, so this is
            // a stale click.
            return Ok(());
        };
        self.discard_settings_message(chat, draft.job_settings_message_id)
            .await;
        draft.job_settings_message_id = None;
        self.inner.expiry.disarm(chat, draft.confirmation_message_id);

        let options = PrintOptions {
            copies: draft.copies,
            page_ranges: draft.page_ranges.clone(),
            sides: draft.sides,
            number_up: draft.number_up,
        };
        let job_id = match self
            .inner
            .print
            .dispatch(owner, &draft.file_handle, &printer, &options)
            .await
        {
            Ok(job_id) => job_id,
            Err(e) => {
                warn!(%e, "dispatch failed");
                self.inner
                    .transport
                    .edit_message(
                        chat,
                        draft.confirmation_message_id,
                        "The job could not be started. The document was consumed; please send \
                         it again to retry.",
                        None,
                    )
                    .await?;
                row.state = ChatState::Default;
                return Ok(());
            }
        };

        let papers = count_of_papers_to_print(
            draft.pages as i64,
            draft.page_ranges.as_deref(),
            draft.number_up.as_u32(),
            draft.sides,
            draft.copies,
        )
        .unwrap_or(1);

        let display = self.printer_display(&printer);
        let caption = presenter::printing_message(&draft, &display, None, 0, false, false);
        self.inner
            .transport
            .edit_message(
                chat,
                draft.confirmation_message_id,
                &caption,
                Some(presenter::printing_keyboard(job_id)),
            )
            .await?;

        let job = PrintingJob { draft, job_id };
        row.state = ChatState::Printing(job.clone());
        // The spawned poll re-reads the row, so it must be visible first.
        self.inner.store.save(owner, row).await?;

        let token = CancellationToken::new();
        self.inner
            .poll_cancels
            .insert((owner.clone(), job_id), token.clone());

        let flow = self.clone();
        let owner = owner.clone();
        tokio::spawn(async move {
            flow.run_poll(owner, chat, job, papers, token).await;
        });
        Ok(())
    }

    fn printer_display(&self, cups_name: &str) -> String {
        self.inner
            .settings
            .find_printer(cups_name)
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| cups_name.to_string())
    }

    // -- The poll task ---------------------------------------------------------

    /// Animate the confirmation message while the orchestrator polls, then
    /// settle the row and the message on the terminal form.
    async fn run_poll(
        &self,
        owner: OwnerId,
        chat: ChatId,
        job: PrintingJob,
        papers: u64,
        token: CancellationToken,
    ) {
        let budget = PrintOrchestrator::poll_budget(papers);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let poll = {
            let print = self.inner.print.clone();
            let token = token.clone();
            let job_id = job.job_id;
            tokio::spawn(async move { print.poll_job(job_id, budget, token, Some(tx)).await })
        };

        let display = self.printer_display(job.draft.printer.as_deref().unwrap_or("—"));
        while let Some(update) = rx.recv().await {
            // Structural-message check: stop touching the message the
            // moment the row has moved on.
            match self.inner.store.load(&owner).await {
                Ok(current) => match &current.state {
                    ChatState::Printing(j)
                        if j.job_id == job.job_id
                            && j.draft.confirmation_message_id
                                == job.draft.confirmation_message_id => {}
                    _ => {
                        token.cancel();
                        break;
                    }
                },
                Err(_) => break,
            }

            let terminal = update.attributes.job_state.is_terminal();
            let caption = presenter::printing_message(
                &job.draft,
                &display,
                Some(&update.attributes),
                update.iteration,
                false,
                false,
            );
            let keyboard = (!terminal).then(|| presenter::printing_keyboard(job.job_id));
            if let Err(e) = self
                .inner
                .transport
                .edit_message(chat, job.draft.confirmation_message_id, &caption, keyboard)
                .await
            {
                debug!(%e, "live poll edit failed");
            }
        }

        let outcome = match poll.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%e, "poll task panicked");
                return;
            }
        };

        // Settle the row under the owner lock.
        let lock = self.owner_lock(&owner);
        let _guard = lock.lock().await;
        self.inner
            .poll_cancels
            .remove(&(owner.clone(), job.job_id));

        let Ok(mut current) = self.inner.store.load(&owner).await else {
            return;
        };
        let still_ours = matches!(
            &current.state,
            ChatState::Printing(j)
                if j.job_id == job.job_id
                    && j.draft.confirmation_message_id == job.draft.confirmation_message_id
        );
        if !still_ours {
            return;
        }

        current.state = ChatState::Default;
        if let Err(e) = self.inner.store.save(&owner, &current).await {
            warn!(%e, "could not settle row after poll");
        }

        let (cancelled, timed_out) = match outcome.end {
            PollEnd::Terminal(_) => (false, false),
            PollEnd::Cancelled => (true, false),
            PollEnd::TimedOut => (false, true),
        };
        let caption = presenter::printing_message(
            &job.draft,
            &display,
            outcome.last.as_ref(),
            0,
            cancelled,
            timed_out,
        );
        if let Err(e) = self
            .inner
            .transport
            .edit_message(chat, job.draft.confirmation_message_id, &caption, None)
            .await
        {
            debug!(%e, "final poll edit failed");
        }
    }
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scan-flow handlers: the settings menu, acquisition cycles with the
// growing artifact, undo, and session teardown.

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::{OwnerId, ScanQuality};
use tracing::{debug, warn};

use crate::presenter;
use crate::state::{ChatRow, ChatState, ScanDraft, ScanMode, ScanSession};
use crate::transport::{Button, ChatId, Keyboard};

use super::ChatFlow;

impl ChatFlow {
    // -- /scan -----------------------------------------------------------------

    /// Open a fresh scan settings menu.
    ///
    /// The first `/scan` ever asks for the mode; later ones default to
    /// manual. A remembered scanner is kept while it is still configured.
    pub(crate) async fn on_scan_command(
        &self,
        _owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
    ) -> Result<()> {
        let mode = if row.scanned_before {
            Some(ScanMode::Manual)
        } else {
            None
        };
        row.scanned_before = true;

        let scanner = row
            .preferred_scanner
            .clone()
            .filter(|name| self.inner.settings.find_scanner(name).is_some());

        let mut draft = ScanDraft {
            mode,
            scanner,
            quality: ScanQuality::Dpi300,
            duplex: false,
            crop: false,
            name: None,
            confirmation_message_id: 0,
            job_settings_message_id: None,
        };

        let (caption, keyboard) =
            presenter::scan_menu(&draft, self.scanner_display(draft.scanner.as_deref()).as_deref());
        let message = self
            .inner
            .transport
            .send_message(chat, &caption, Some(keyboard))
            .await?;
        draft.confirmation_message_id = message;
        self.inner
            .expiry
            .arm(chat, message, format!("{caption}{}", presenter::EXPIRED_SUFFIX));

        if draft.scanner.is_none() {
            self.open_scanner_setup(chat, &mut draft).await?;
            row.state = ChatState::SetupScanner(draft);
        } else if draft.mode.is_none() {
            self.open_scan_mode_setup(chat, &mut draft).await?;
            row.state = ChatState::SetupScanMode(draft);
        } else {
            row.state = ChatState::ScanSettingsMenu(draft);
        }
        Ok(())
    }

    fn scanner_display(&self, name: Option<&str>) -> Option<String> {
        Some(
            self.inner
                .settings
                .find_scanner(name?)?
                .display_name
                .clone(),
        )
    }

    // -- Sub-menus -------------------------------------------------------------

    async fn open_scan_settings_message(
        &self,
        chat: ChatId,
        draft: &mut ScanDraft,
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

    async fn open_scanner_setup(&self, chat: ChatId, draft: &mut ScanDraft) -> Result<()> {
        let keyboard = presenter::scanner_choice_keyboard(&self.inner.settings.scanners);
        self.open_scan_settings_message(chat, draft, "Which scanner?", keyboard)
            .await
    }

    async fn open_scan_mode_setup(&self, chat: ChatId, draft: &mut ScanDraft) -> Result<()> {
        self.open_scan_settings_message(
            chat,
            draft,
            "Scan page by page from the glass, or the whole stack from the feeder?",
            presenter::scan_mode_keyboard(),
        )
        .await
    }

    /// Apply a draft mutation and fall back to the scan settings menu.
    pub(crate) async fn back_to_scan_menu(
        &self,
        _owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut draft: ScanDraft,
    ) -> Result<()> {
        self.discard_settings_message(chat, draft.job_settings_message_id)
            .await;
        draft.job_settings_message_id = None;

        let (caption, keyboard) =
            presenter::scan_menu(&draft, self.scanner_display(draft.scanner.as_deref()).as_deref());
        self.inner
            .transport
            .edit_message(chat, draft.confirmation_message_id, &caption, Some(keyboard))
            .await?;
        row.state = ChatState::ScanSettingsMenu(draft);
        Ok(())
    }

    // -- Callback routing ------------------------------------------------------

    pub(crate) async fn on_scan_callback(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        data: &str,
    ) -> Result<()> {
        match (row.state.clone(), data) {
            // Open sub-menus.
            (
                ChatState::ScanSettingsMenu(mut draft)
                | ChatState::SetupScanMode(mut draft)
                | ChatState::SetupScanner(mut draft)
                | ChatState::SetupScanQuality(mut draft)
                | ChatState::SetupScanSides(mut draft)
                | ChatState::SetupScanCrop(mut draft)
                | ChatState::SetupScanName(mut draft),
                "scanmenu:mode",
            ) => {
                self.open_scan_mode_setup(chat, &mut draft).await?;
                row.state = ChatState::SetupScanMode(draft);
                Ok(())
            }
            (
                ChatState::ScanSettingsMenu(mut draft)
                | ChatState::SetupScanMode(mut draft)
                | ChatState::SetupScanner(mut draft)
                | ChatState::SetupScanQuality(mut draft)
                | ChatState::SetupScanSides(mut draft)
                | ChatState::SetupScanCrop(mut draft)
                | ChatState::SetupScanName(mut draft),
                "scanmenu:scanner",
            ) => {
                self.open_scanner_setup(chat, &mut draft).await?;
                row.state = ChatState::SetupScanner(draft);
                Ok(())
            }
            (
                ChatState::ScanSettingsMenu(mut draft)
                | ChatState::SetupScanMode(mut draft)
                | ChatState::SetupScanner(mut draft)
                | ChatState::SetupScanQuality(mut draft)
                | ChatState::SetupScanSides(mut draft)
                | ChatState::SetupScanCrop(mut draft)
                | ChatState::SetupScanName(mut draft),
                "scanmenu:quality",
            ) => {
                self.open_scan_settings_message(
                    chat,
                    &mut draft,
                    "Scan quality?",
                    presenter::scan_quality_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupScanQuality(draft);
                Ok(())
            }
            (
                ChatState::ScanSettingsMenu(mut draft)
                | ChatState::SetupScanMode(mut draft)
                | ChatState::SetupScanner(mut draft)
                | ChatState::SetupScanQuality(mut draft)
                | ChatState::SetupScanSides(mut draft)
                | ChatState::SetupScanCrop(mut draft)
                | ChatState::SetupScanName(mut draft),
                "scanmenu:sides",
            ) => {
                self.open_scan_settings_message(
                    chat,
                    &mut draft,
                    "Scan one side or both? (Both sides needs the feeder.)",
                    presenter::scan_sides_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupScanSides(draft);
                Ok(())
            }
            (
                ChatState::ScanSettingsMenu(mut draft)
                | ChatState::SetupScanMode(mut draft)
                | ChatState::SetupScanner(mut draft)
                | ChatState::SetupScanQuality(mut draft)
                | ChatState::SetupScanSides(mut draft)
                | ChatState::SetupScanCrop(mut draft)
                | ChatState::SetupScanName(mut draft),
                "scanmenu:crop",
            ) => {
                self.open_scan_settings_message(
                    chat,
                    &mut draft,
                    "Straighten and crop each page automatically?",
                    presenter::scan_crop_keyboard(),
                )
                .await?;
                row.state = ChatState::SetupScanCrop(draft);
                Ok(())
            }
            (
                ChatState::ScanSettingsMenu(mut draft)
                | ChatState::SetupScanMode(mut draft)
                | ChatState::SetupScanner(mut draft)
                | ChatState::SetupScanQuality(mut draft)
                | ChatState::SetupScanSides(mut draft)
                | ChatState::SetupScanCrop(mut draft)
                | ChatState::SetupScanName(mut draft),
                "scanmenu:name",
            ) => {
                self.open_scan_settings_message(
                    chat,
                    &mut draft,
                    &presenter::scan_name_prompt(),
                    Keyboard::rows(vec![vec![Button::new("↩ Back", "setup:back")]]),
                )
                .await?;
                row.state = ChatState::SetupScanName(draft);
                Ok(())
            }

            // Sub-menu value selections.
            (ChatState::SetupScanMode(mut draft), "scanmode:manual") => {
                draft.mode = Some(ScanMode::Manual);
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupScanMode(mut draft), "scanmode:auto") => {
                draft.mode = Some(ScanMode::Auto);
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupScanner(mut draft), _) if data.starts_with("scanner:") => {
                let name = &data["scanner:".len()..];
                if self.inner.settings.find_scanner(name).is_some() {
                    draft.scanner = Some(name.to_string());
                    row.preferred_scanner = Some(name.to_string());
                }
                // A scanner choice may still need the mode question.
                if draft.mode.is_none() {
                    self.open_scan_mode_setup(chat, &mut draft).await?;
                    row.state = ChatState::SetupScanMode(draft);
                    Ok(())
                } else {
                    self.back_to_scan_menu(owner, chat, row, draft).await
                }
            }
            (ChatState::SetupScanQuality(mut draft), _) if data.starts_with("quality:") => {
                draft.quality = match &data["quality:".len()..] {
                    "200" => ScanQuality::Dpi200,
                    "400" => ScanQuality::Dpi400,
                    "600" => ScanQuality::Dpi600,
                    _ => ScanQuality::Dpi300,
                };
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupScanSides(mut draft), "scansides:false") => {
                draft.duplex = false;
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupScanSides(mut draft), "scansides:true") => {
                draft.duplex = true;
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupScanCrop(mut draft), "crop:on") => {
                draft.crop = true;
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            (ChatState::SetupScanCrop(mut draft), "crop:off") => {
                draft.crop = false;
                self.back_to_scan_menu(owner, chat, row, draft).await
            }

            // Leave the flow.
            (
                ChatState::ScanSettingsMenu(draft)
                | ChatState::SetupScanMode(draft)
                | ChatState::SetupScanner(draft)
                | ChatState::SetupScanQuality(draft)
                | ChatState::SetupScanSides(draft)
                | ChatState::SetupScanCrop(draft)
                | ChatState::SetupScanName(draft),
                "scan:cancel",
            ) => {
                self.discard_settings_message(chat, draft.job_settings_message_id)
                    .await;
                self.inner.expiry.disarm(chat, draft.confirmation_message_id);
                self.inner
                    .transport
                    .edit_message(
                        chat,
                        draft.confirmation_message_id,
                        "Scan configuration closed.",
                        None,
                    )
                    .await?;
                row.state = ChatState::Default;
                Ok(())
            }

            // First acquisition.
            (ChatState::ScanSettingsMenu(mut draft), "scan:start") => {
                self.discard_settings_message(chat, draft.job_settings_message_id)
                    .await;
                draft.job_settings_message_id = None;
                row.preferred_scanner = draft.scanner.clone().or(row.preferred_scanner.clone());
                let session = ScanSession {
                    draft,
                    artifact: None,
                    page_count: 0,
                    scan_job_id: None,
                };
                self.start_acquisition(owner, chat, row, session).await
            }

            // Another acquisition into the same artifact.
            (ChatState::ScanPauseMenu(mut session), "pause:more") => {
                session.scan_job_id = None;
                self.start_acquisition(owner, chat, row, session).await
            }

            // Close this document and start a fresh one.
            (ChatState::ScanPauseMenu(mut session), "pause:new") => {
                if let Some(handle) = session.artifact.take() {
                    if let Err(e) = self.inner.scan.delete_file(owner, &handle).await {
                        warn!(%e, "could not drop finished scan artifact");
                    }
                }
                let (caption, _) = presenter::scan_paused(&session, true);
                self.inner.expiry.disarm(chat, session.draft.confirmation_message_id);
                let _ = self
                    .inner
                    .transport
                    .edit_message(chat, session.draft.confirmation_message_id, &caption, None)
                    .await;

                let message = self
                    .inner
                    .transport
                    .send_message(
                        chat,
                        &presenter::scanning_message(
                            self.scanner_display(session.draft.scanner.as_deref()).as_deref(),
                            "starting",
                        ),
                        None,
                    )
                    .await?;
                session.draft.confirmation_message_id = message;
                session.page_count = 0;
                session.scan_job_id = None;
                self.start_acquisition(owner, chat, row, session).await
            }

            (ChatState::ScanPauseMenu(session), "pause:undo") => {
                self.undo_last_page(owner, chat, row, session).await
            }

            (ChatState::ScanPauseMenu(session), "pause:finish") => {
                let (caption, _) = presenter::scan_paused(&session, true);
                self.inner.expiry.disarm(chat, session.draft.confirmation_message_id);
                self.inner
                    .transport
                    .edit_message(chat, session.draft.confirmation_message_id, &caption, None)
                    .await?;
                if let Some(handle) = &session.artifact
                    && let Err(e) = self.inner.scan.delete_file(owner, handle).await
                {
                    warn!(%e, "could not drop finished scan artifact");
                }
                row.state = ChatState::Default;
                Ok(())
            }

            (ChatState::ScanPauseMenu(session), "pause:cancel")
            | (ChatState::Scanning(session), "scanning:cancel") => {
                self.cancel_scan_session(owner, chat, row, session).await
            }

            (state, _) => {
                debug!(?state, data, "scan callback does not apply");
                Ok(())
            }
        }
    }

    pub(crate) async fn on_scan_name_text(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut draft: ScanDraft,
        text: &str,
    ) -> Result<()> {
        let name: String = text
            .trim()
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
            .take(64)
            .collect();
        if !name.is_empty() {
            draft.name = Some(name);
        }
        self.back_to_scan_menu(owner, chat, row, draft).await
    }

    // -- Acquisition cycle -----------------------------------------------------

    /// Kick one acquisition off and hand the wait to a background task.
    ///
    /// On `Busy` the state returns to where the user was: the pause menu
    /// when pages already exist, the settings menu otherwise. No job id is
    /// stored in that case.
    async fn start_acquisition(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut session: ScanSession,
    ) -> Result<()> {
        let Some(scanner) = session.draft.scanner.clone() else {
            return Ok(());
        };
        let display = self.scanner_display(Some(&scanner));
        let confirmation = session.draft.confirmation_message_id;

        let _ = self
            .inner
            .transport
            .edit_message(
                chat,
                confirmation,
                &presenter::scanning_message(display.as_deref(), "starting"),
                None,
            )
            .await;

        let job_id = match self
            .inner
            .scan
            .start(&scanner, &session.draft.scan_options())
            .await
        {
            Ok(job_id) => job_id,
            Err(DruckwerkError::Busy(_)) => {
                self.inner
                    .transport
                    .send_message(chat, &presenter::scanner_busy(), None)
                    .await?;
                return self.settle_after_failed_start(chat, row, session).await;
            }
            Err(e) => {
                warn!(%e, "scan start failed");
                self.inner
                    .transport
                    .send_message(chat, "The scanner did not answer. Try again in a moment.", None)
                    .await?;
                return self.settle_after_failed_start(chat, row, session).await;
            }
        };

        session.scan_job_id = Some(job_id);
        row.state = ChatState::Scanning(session.clone());
        // The fetch task re-reads the row, so it must be visible first.
        self.inner.store.save(owner, row).await?;

        let _ = self
            .inner
            .transport
            .edit_message(
                chat,
                confirmation,
                &presenter::scanning_message(display.as_deref(), "scanning"),
                Some(Keyboard::rows(vec![vec![Button::new(
                    "✖️ Cancel",
                    "scanning:cancel",
                )]])),
            )
            .await;

        let flow = self.clone();
        let owner = owner.clone();
        tokio::spawn(async move {
            flow.run_fetch(owner, chat, scanner, session).await;
        });
        Ok(())
    }

    /// Put the user back where they were before a start that went nowhere.
    async fn settle_after_failed_start(
        &self,
        chat: ChatId,
        row: &mut ChatRow,
        mut session: ScanSession,
    ) -> Result<()> {
        session.scan_job_id = None;
        if session.artifact.is_some() {
            let (caption, keyboard) = presenter::scan_paused(&session, false);
            let _ = self
                .inner
                .transport
                .edit_message(chat, session.draft.confirmation_message_id, &caption, keyboard)
                .await;
            row.state = ChatState::ScanPauseMenu(session);
        } else {
            let draft = session.draft;
            let (caption, keyboard) = presenter::scan_menu(
                &draft,
                self.scanner_display(draft.scanner.as_deref()).as_deref(),
            );
            let _ = self
                .inner
                .transport
                .edit_message(chat, draft.confirmation_message_id, &caption, Some(keyboard))
                .await;
            row.state = ChatState::ScanSettingsMenu(draft);
        }
        Ok(())
    }

    /// Await the device, merge the acquisition, and publish the result.
    async fn run_fetch(&self, owner: OwnerId, chat: ChatId, scanner: String, session: ScanSession) {
        let Some(job_id) = session.scan_job_id.clone() else {
            return;
        };
        let merged = self
            .inner
            .scan
            .wait_and_merge(
                &owner,
                &scanner,
                &job_id,
                session.artifact.as_ref(),
                session.draft.crop,
            )
            .await;

        let lock = self.owner_lock(&owner);
        let _guard = lock.lock().await;
        let Ok(mut row) = self.inner.store.load(&owner).await else {
            return;
        };

        let still_ours = matches!(
            &row.state,
            ChatState::Scanning(s)
                if s.scan_job_id.as_deref() == Some(job_id.as_str())
                    && s.draft.confirmation_message_id == session.draft.confirmation_message_id
        );
        if !still_ours {
            // The session was cancelled or superseded while we waited;
            // whatever we produced is orphaned.
            if let Ok(outcome) = merged
                && let Err(e) = self.inner.scan.delete_file(&owner, &outcome.file_handle).await
            {
                warn!(%e, "orphaned scan artifact cleanup failed");
            }
            return;
        }

        let mut session = session;
        match merged {
            Ok(outcome) => {
                session.artifact = Some(outcome.file_handle.clone());
                session.page_count = outcome.page_count;
                session.scan_job_id = None;

                let bytes = match self.inner.artifacts.read(&owner, &outcome.file_handle).await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(%e, "merged artifact unreadable");
                        return;
                    }
                };

                let (caption, keyboard) = presenter::scan_paused(&session, false);
                let old_confirmation = session.draft.confirmation_message_id;
                match self
                    .inner
                    .transport
                    .send_document(
                        chat,
                        &presenter::scan_file_name(&session),
                        bytes,
                        &caption,
                        keyboard,
                    )
                    .await
                {
                    Ok(new_message) => {
                        self.inner.expiry.disarm(chat, old_confirmation);
                        let _ = self.inner.transport.delete_message(chat, old_confirmation).await;
                        session.draft.confirmation_message_id = new_message;
                        self.inner.expiry.arm(
                            chat,
                            new_message,
                            format!("{caption}{}", presenter::EXPIRED_SUFFIX),
                        );
                    }
                    Err(e) => {
                        warn!(%e, "could not publish scanned document");
                    }
                }

                row.state = ChatState::ScanPauseMenu(session);
            }
            Err(e) => {
                warn!(%e, "scan fetch failed");
                let _ = self
                    .inner
                    .transport
                    .edit_message(
                        chat,
                        session.draft.confirmation_message_id,
                        "Scanning failed. Check the device and try again.",
                        None,
                    )
                    .await;
                session.scan_job_id = None;
                row.state = if session.artifact.is_some() {
                    let (caption, keyboard) = presenter::scan_paused(&session, false);
                    let _ = self
                        .inner
                        .transport
                        .edit_message(chat, session.draft.confirmation_message_id, &caption, keyboard)
                        .await;
                    ChatState::ScanPauseMenu(session)
                } else {
                    ChatState::ScanSettingsMenu(session.draft)
                };
            }
        }

        if let Err(e) = self.inner.store.save(&owner, &row).await {
            warn!(%e, "could not settle row after fetch");
        }
    }

    // -- Undo / teardown -------------------------------------------------------

    async fn undo_last_page(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        mut session: ScanSession,
    ) -> Result<()> {
        let Some(handle) = session.artifact.clone() else {
            return Ok(());
        };
        match self.inner.scan.remove_last_page(owner, &handle).await {
            Ok(outcome) => {
                session.artifact = Some(outcome.file_handle);
                session.page_count = outcome.page_count;
            }
            Err(e) => {
                warn!(%e, "remove-last-page failed");
            }
        }
        let (caption, keyboard) = presenter::scan_paused(&session, false);
        let _ = self
            .inner
            .transport
            .edit_message(chat, session.draft.confirmation_message_id, &caption, keyboard)
            .await;
        row.state = ChatState::ScanPauseMenu(session);
        Ok(())
    }

    async fn cancel_scan_session(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        session: ScanSession,
    ) -> Result<()> {
        if let Some(scanner) = &session.draft.scanner {
            if let Err(e) = self
                .inner
                .scan
                .cancel(
                    owner,
                    scanner,
                    session.scan_job_id.as_deref(),
                    session.artifact.as_ref(),
                )
                .await
            {
                warn!(%e, "scan session cancel failed");
            }
        } else if let Some(handle) = &session.artifact
            && let Err(e) = self.inner.scan.delete_file(owner, handle).await
        {
            warn!(%e, "scan artifact cleanup failed");
        }

        self.inner.expiry.disarm(chat, session.draft.confirmation_message_id);
        self.inner
            .transport
            .edit_message(
                chat,
                session.draft.confirmation_message_id,
                &presenter::scanning_message(None, "cancelled"),
                None,
            )
            .await?;
        row.state = ChatState::Default;
        Ok(())
    }
}

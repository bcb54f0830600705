// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The conversation engine.
//
// One `handle` call per incoming event. All state mutation for an owner
// happens under that owner's lock; long-running work (print polling, scan
// fetching) runs in spawned tasks that re-acquire the lock and re-check
// the row before touching anything — the structural-message check that
// keeps the poll loop and user actions from racing each other.

mod print;
mod scan;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use druckwerk_core::OwnerId;
use druckwerk_core::config::Settings;
use druckwerk_core::error::Result;
use druckwerk_print::{PrintOrchestrator, StatusAggregator};
use druckwerk_scan::ScanOrchestrator;
use druckwerk_store::ArtifactStore;

use crate::expiry::ExpiryTimers;
use crate::presenter;
use crate::state::{ChatRow, ChatState};
use crate::store::StateStore;
use crate::transport::{ChatEvent, ChatId, ChatTransport, MessageId};

struct FlowInner {
    transport: Arc<dyn ChatTransport>,
    store: Arc<dyn StateStore>,
    artifacts: Arc<ArtifactStore>,
    print: Arc<PrintOrchestrator>,
    scan: Arc<ScanOrchestrator>,
    status: Arc<StatusAggregator>,
    settings: Arc<Settings>,
    owner_locks: DashMap<OwnerId, Arc<Mutex<()>>>,
    /// One cancellation token per live poll, keyed by owner and job id so
    /// a finished poll can never tear down a newer job's token.
    poll_cancels: DashMap<(OwnerId, i32), CancellationToken>,
    expiry: Arc<ExpiryTimers>,
}

/// The per-user conversational state machine.
#[derive(Clone)]
pub struct ChatFlow {
    inner: Arc<FlowInner>,
}

impl ChatFlow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn StateStore>,
        artifacts: Arc<ArtifactStore>,
        print: Arc<PrintOrchestrator>,
        scan: Arc<ScanOrchestrator>,
        status: Arc<StatusAggregator>,
        settings: Arc<Settings>,
    ) -> Self {
        let expiry = Arc::new(ExpiryTimers::new(transport.clone()));
        Self {
            inner: Arc::new(FlowInner {
                transport,
                store,
                artifacts,
                print,
                scan,
                status,
                settings,
                owner_locks: DashMap::new(),
                poll_cancels: DashMap::new(),
                expiry,
            }),
        }
    }

    fn owner_lock(&self, owner: &OwnerId) -> Arc<Mutex<()>> {
        self.inner
            .owner_locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one event for one owner.
    ///
    /// All row mutation is serialized per owner; events for different
    /// owners never contend.
    #[instrument(skip(self, event), fields(owner = %owner, chat))]
    pub async fn handle(&self, owner: &OwnerId, chat: ChatId, event: ChatEvent) -> Result<()> {
        let lock = self.owner_lock(owner);
        let _guard = lock.lock().await;

        let mut row = self.inner.store.load(owner).await?;

        match event {
            ChatEvent::Command { name } => match name.as_str() {
                "/scan" => {
                    self.interrupt(owner, chat, &mut row).await;
                    self.on_scan_command(owner, chat, &mut row).await?;
                }
                _ => {
                    // /start, /help, and anything unknown all reset to the
                    // default state after cleaning up.
                    self.interrupt(owner, chat, &mut row).await;
                    self.inner
                        .transport
                        .send_message(chat, &presenter::help_text(), None)
                        .await?;
                }
            },
            ChatEvent::Document {
                file_ref,
                file_name,
                file_size,
            } => {
                self.interrupt(owner, chat, &mut row).await;
                self.on_document(owner, chat, &mut row, &file_ref, &file_name, file_size)
                    .await?;
            }
            ChatEvent::MediaGroup { .. } => {
                self.inner
                    .transport
                    .send_message(chat, &presenter::albums_unsupported(), None)
                    .await?;
            }
            ChatEvent::Text { text } => {
                self.on_text(owner, chat, &mut row, &text).await?;
            }
            ChatEvent::Callback {
                id,
                message_id,
                data,
            } => {
                self.inner.transport.answer_callback(&id, None).await?;
                if !callback_is_current(&row.state, &data, message_id) {
                    debug!(message_id, data, "stale callback rejected");
                    return Ok(());
                }
                self.on_callback(owner, chat, &mut row, &data).await?;
            }
        }

        self.inner.store.save(owner, &row).await
    }

    /// `handle`, but with the adapter-facing error policy applied: any
    /// uncaught error becomes a generic hint for the user while the real
    /// error goes to the operator logs.
    pub async fn handle_safely(&self, owner: &OwnerId, chat: ChatId, event: ChatEvent) {
        if let Err(e) = self.handle(owner, chat, event).await {
            tracing::error!(%owner, %e, "chat event handling failed");
            let _ = self
                .inner
                .transport
                .send_message(chat, "Something went wrong. Try /start", None)
                .await;
        }
    }

    /// Typed text only matters in the setup states that ask for it.
    async fn on_text(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        text: &str,
    ) -> Result<()> {
        match row.state.clone() {
            ChatState::SetupCopies(draft) => {
                self.on_copies_text(owner, chat, row, draft, text).await
            }
            ChatState::SetupPages(draft) => self.on_pages_text(owner, chat, row, draft, text).await,
            ChatState::SetupScanName(draft) => {
                self.on_scan_name_text(owner, chat, row, draft, text).await
            }
            _ => Ok(()),
        }
    }

    /// Route an already-guarded callback to its flow.
    async fn on_callback(
        &self,
        owner: &OwnerId,
        chat: ChatId,
        row: &mut ChatRow,
        data: &str,
    ) -> Result<()> {
        let (prefix, _) = data.split_once(':').unwrap_or((data, ""));
        match prefix {
            "menu" | "printer" | "copies" | "pages" | "sides" | "layout" | "printing" => {
                self.on_print_callback(owner, chat, row, data).await
            }
            "scan" | "scanmenu" | "scanmode" | "scanner" | "quality" | "scansides" | "crop"
            | "pause" | "scanning" => self.on_scan_callback(owner, chat, row, data).await,
            "setup" => self.on_setup_back(owner, chat, row).await,
            _ => {
                debug!(data, "unroutable callback ignored");
                Ok(())
            }
        }
    }

    /// `↩ Back` from any sub-menu: return to the parent settings menu
    /// without applying anything.
    async fn on_setup_back(&self, owner: &OwnerId, chat: ChatId, row: &mut ChatRow) -> Result<()> {
        match row.state.clone() {
            ChatState::SetupPrinter(draft)
            | ChatState::SetupCopies(draft)
            | ChatState::SetupPages(draft)
            | ChatState::SetupSides(draft)
            | ChatState::SetupLayout(draft) => {
                self.back_to_print_menu(owner, chat, row, draft).await
            }
            ChatState::SetupScanMode(draft)
            | ChatState::SetupScanner(draft)
            | ChatState::SetupScanQuality(draft)
            | ChatState::SetupScanSides(draft)
            | ChatState::SetupScanCrop(draft)
            | ChatState::SetupScanName(draft) => {
                self.back_to_scan_menu(owner, chat, row, draft).await
            }
            _ => Ok(()),
        }
    }

    /// Gracious interruption: whatever was in flight is cancelled and its
    /// confirmation message retired before the new intent proceeds.
    ///
    /// Idempotent and tolerant of backends that already forgot the job.
    pub(crate) async fn interrupt(&self, owner: &OwnerId, chat: ChatId, row: &mut ChatRow) {
        let state = std::mem::take(&mut row.state);
        match state {
            ChatState::Default => {}

            ChatState::PrintSettingsMenu(draft)
            | ChatState::SetupPrinter(draft)
            | ChatState::SetupCopies(draft)
            | ChatState::SetupPages(draft)
            | ChatState::SetupSides(draft)
            | ChatState::SetupLayout(draft) => {
                self.discard_settings_message(chat, draft.job_settings_message_id)
                    .await;
                if let Err(e) = self
                    .inner
                    .print
                    .cancel_preparation(owner, &draft.file_handle)
                    .await
                {
                    warn!(%e, "dangling artifact cleanup failed");
                }
                self.retire_confirmation(chat, draft.confirmation_message_id)
                    .await;
            }

            ChatState::Printing(job) => {
                if let Some((_, token)) = self
                    .inner
                    .poll_cancels
                    .remove(&(owner.clone(), job.job_id))
                {
                    token.cancel();
                }
                if let Err(e) = self.inner.print.cancel_job(job.job_id).await {
                    warn!(job_id = job.job_id, %e, "job cancel during interruption failed");
                }
                self.retire_confirmation(chat, job.draft.confirmation_message_id)
                    .await;
            }

            ChatState::ScanSettingsMenu(draft)
            | ChatState::SetupScanMode(draft)
            | ChatState::SetupScanner(draft)
            | ChatState::SetupScanQuality(draft)
            | ChatState::SetupScanSides(draft)
            | ChatState::SetupScanCrop(draft)
            | ChatState::SetupScanName(draft) => {
                self.discard_settings_message(chat, draft.job_settings_message_id)
                    .await;
                self.retire_confirmation(chat, draft.confirmation_message_id)
                    .await;
            }

            ChatState::Scanning(session) | ChatState::ScanPauseMenu(session) => {
                let cleanup = match &session.draft.scanner {
                    Some(scanner) => {
                        self.inner
                            .scan
                            .cancel(
                                owner,
                                scanner,
                                session.scan_job_id.as_deref(),
                                session.artifact.as_ref(),
                            )
                            .await
                    }
                    None => match &session.artifact {
                        Some(handle) => self.inner.scan.delete_file(owner, handle).await,
                        None => Ok(()),
                    },
                };
                if let Err(e) = cleanup {
                    warn!(%e, "scan cleanup during interruption failed");
                }
                self.retire_confirmation(chat, session.draft.confirmation_message_id)
                    .await;
            }
        }
    }

    /// Rewrite an abandoned confirmation message to its expired form and
    /// drop its timer.
    async fn retire_confirmation(&self, chat: ChatId, message: MessageId) {
        self.inner.expiry.disarm(chat, message);
        if let Err(e) = self
            .inner
            .transport
            .edit_message(
                chat,
                message,
                &format!("This job was superseded.{}", presenter::EXPIRED_SUFFIX),
                None,
            )
            .await
        {
            debug!(message, %e, "could not retire confirmation message");
        }
    }

    /// Delete the transient sub-menu message, if one is open.
    async fn discard_settings_message(&self, chat: ChatId, message: Option<MessageId>) {
        if let Some(message) = message
            && let Err(e) = self.inner.transport.delete_message(chat, message).await
        {
            debug!(message, %e, "could not delete settings message");
        }
    }
}

/// The confirmation-message guard.
///
/// Callback routing only proceeds when the pressed button lives on the
/// message the row currently points at: flow-level buttons must sit on the
/// confirmation message, sub-menu buttons on the open settings message.
fn callback_is_current(state: &ChatState, data: &str, message_id: MessageId) -> bool {
    let (prefix, _) = data.split_once(':').unwrap_or((data, ""));
    let expected = match prefix {
        "menu" | "printing" | "scan" | "scanmenu" | "pause" | "scanning" => {
            state.confirmation_message_id()
        }
        _ => state.job_settings_message_id(),
    };
    expected == Some(message_id)
}

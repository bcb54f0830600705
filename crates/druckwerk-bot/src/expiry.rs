// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Expiry timers for confirmation messages.
//
// Every active confirmation message gets a timer; on expiry the message is
// rewritten to its terminal form and the keyboard is dropped, so stale
// buttons can no longer originate callbacks. Cancelling is idempotent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::transport::{ChatId, ChatTransport, MessageId};

/// How long a confirmation message stays interactive.
const MESSAGE_EXPIRY: Duration = Duration::from_secs(5 * 60 * 60);

/// Tracks one pending expiry per (chat, message).
pub struct ExpiryTimers {
    transport: Arc<dyn ChatTransport>,
    tasks: DashMap<(ChatId, MessageId), JoinHandle<()>>,
}

impl ExpiryTimers {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            tasks: DashMap::new(),
        }
    }

    /// Arm the timer; `expired_text` is what the message becomes.
    pub fn arm(self: &Arc<Self>, chat: ChatId, message: MessageId, expired_text: String) {
        let timers = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(MESSAGE_EXPIRY).await;
            debug!(chat, message, "confirmation message expired");
            if let Err(e) = timers
                .transport
                .edit_message(chat, message, &expired_text, None)
                .await
            {
                warn!(chat, message, %e, "could not rewrite expired message");
            }
            timers.tasks.remove(&(chat, message));
        });

        if let Some(previous) = self.tasks.insert((chat, message), handle) {
            previous.abort();
        }
    }

    /// Disarm the timer, if armed.
    pub fn disarm(&self, chat: ChatId, message: MessageId) {
        if let Some((_, handle)) = self.tasks.remove(&(chat, message)) {
            handle.abort();
        }
    }
}

impl Drop for ExpiryTimers {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::recording::{Outbound, RecordingTransport};

    #[tokio::test(start_paused = true)]
    async fn expiry_rewrites_the_message() {
        let transport = Arc::new(RecordingTransport::new());
        let timers = Arc::new(ExpiryTimers::new(transport.clone()));

        timers.arm(1, 42, "old caption\nThis job has expired 🕒".into());
        // Let the timer task run to completion under the paused clock.
        tokio::time::sleep(MESSAGE_EXPIRY + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        let log = transport.log();
        assert!(log.iter().any(|o| matches!(
            o,
            Outbound::Edited { message_id: 42, keyboard: None, text, .. }
            if text.contains("expired")
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_prevents_the_rewrite() {
        let transport = Arc::new(RecordingTransport::new());
        let timers = Arc::new(ExpiryTimers::new(transport.clone()));

        timers.arm(1, 42, "expired".into());
        timers.disarm(1, 42);
        tokio::time::sleep(MESSAGE_EXPIRY + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(transport.log().is_empty());
        // Disarming again is harmless.
        timers.disarm(1, 42);
    }
}

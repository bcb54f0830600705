// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The chat transport port.
//
// Messages, inline keyboards, and file transfer are abstracted here; the
// concrete chat SDK plugs in behind `ChatTransport`. The flow engine only
// ever sees `ChatEvent`s and message ids.

use async_trait::async_trait;

use druckwerk_core::error::Result;

pub type ChatId = i64;
pub type MessageId = i64;

/// One inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    /// Opaque payload echoed back in `ChatEvent::Callback`.
    pub data: String,
}

impl Button {
    pub fn new(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            data: data.into(),
        }
    }
}

/// An inline keyboard attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn rows(rows: Vec<Vec<Button>>) -> Self {
        Self { rows }
    }
}

/// An incoming chat event, already scoped to one owner and chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A slash command such as `/start` or `/scan`.
    Command { name: String },
    /// Free text, consumed by the setup states that expect typed input.
    Text { text: String },
    /// A document (or photo) upload.
    Document {
        /// Transport-side reference used to download the bytes.
        file_ref: String,
        file_name: String,
        file_size: u64,
    },
    /// Several files sent as one album; rejected with a hint.
    MediaGroup { count: usize },
    /// An inline-button press.
    Callback {
        /// Transport-side id to acknowledge.
        id: String,
        /// The message the button lives on.
        message_id: MessageId,
        data: String,
    },
}

/// Outbound surface of the chat SDK.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId>;

    async fn edit_message(
        &self,
        chat: ChatId,
        message: MessageId,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<()>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()>;

    /// Send a document with a caption; returns the new message id.
    async fn send_document(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<MessageId>;

    /// Acknowledge a callback, optionally with a toast.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    /// Download an uploaded file by its transport reference.
    async fn download(&self, file_ref: &str) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
// Recording transport for tests
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-support"))]
pub mod recording {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    use druckwerk_core::error::DruckwerkError;

    use super::*;

    /// What a recorded outbound action looked like.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Outbound {
        Sent {
            chat: ChatId,
            message_id: MessageId,
            text: String,
            keyboard: Option<Keyboard>,
        },
        Edited {
            chat: ChatId,
            message_id: MessageId,
            text: String,
            keyboard: Option<Keyboard>,
        },
        Deleted {
            chat: ChatId,
            message_id: MessageId,
        },
        Document {
            chat: ChatId,
            message_id: MessageId,
            file_name: String,
            caption: String,
        },
    }

    /// In-memory transport that records every action.
    #[derive(Default)]
    pub struct RecordingTransport {
        next_id: AtomicI64,
        pub outbound: Mutex<Vec<Outbound>>,
        /// file_ref → bytes served by `download`.
        pub files: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self {
                next_id: AtomicI64::new(1),
                ..Default::default()
            }
        }

        pub fn stage_file(&self, file_ref: &str, bytes: Vec<u8>) {
            self.files.lock().unwrap().insert(file_ref.to_string(), bytes);
        }

        pub fn log(&self) -> Vec<Outbound> {
            self.outbound.lock().unwrap().clone()
        }

        /// Latest text associated with a message (sent, edited, or caption).
        pub fn message_text(&self, message_id: MessageId) -> Option<String> {
            self.log().iter().rev().find_map(|o| match o {
                Outbound::Sent {
                    message_id: id,
                    text,
                    ..
                }
                | Outbound::Edited {
                    message_id: id,
                    text,
                    ..
                } if *id == message_id => Some(text.clone()),
                Outbound::Document {
                    message_id: id,
                    caption,
                    ..
                } if *id == message_id => Some(caption.clone()),
                _ => None,
            })
        }

        fn allocate(&self) -> MessageId {
            self.next_id.fetch_add(1, Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_message(
            &self,
            chat: ChatId,
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> Result<MessageId> {
            let message_id = self.allocate();
            self.outbound.lock().unwrap().push(Outbound::Sent {
                chat,
                message_id,
                text: text.to_string(),
                keyboard,
            });
            Ok(message_id)
        }

        async fn edit_message(
            &self,
            chat: ChatId,
            message: MessageId,
            text: &str,
            keyboard: Option<Keyboard>,
        ) -> Result<()> {
            self.outbound.lock().unwrap().push(Outbound::Edited {
                chat,
                message_id: message,
                text: text.to_string(),
                keyboard,
            });
            Ok(())
        }

        async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<()> {
            self.outbound.lock().unwrap().push(Outbound::Deleted {
                chat,
                message_id: message,
            });
            Ok(())
        }

        async fn send_document(
            &self,
            chat: ChatId,
            file_name: &str,
            _bytes: Vec<u8>,
            caption: &str,
            _keyboard: Option<Keyboard>,
        ) -> Result<MessageId> {
            let message_id = self.allocate();
            self.outbound.lock().unwrap().push(Outbound::Document {
                chat,
                message_id,
                file_name: file_name.to_string(),
                caption: caption.to_string(),
            });
            Ok(message_id)
        }

        async fn answer_callback(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn download(&self, file_ref: &str) -> Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(file_ref)
                .cloned()
                .ok_or_else(|| DruckwerkError::NotFound(format!("no staged file '{file_ref}'")))
        }
    }
}

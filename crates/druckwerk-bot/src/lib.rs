// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Bot — the per-user conversational state machine.
//
// One row per owner, a tagged state with exactly the context its state
// needs, and two mutually exclusive flows (print, scan) driven through the
// chat transport port. The actual chat SDK lives behind `ChatTransport`;
// persistence lives behind `StateStore`.

pub mod expiry;
pub mod flow;
pub mod presenter;
pub mod state;
pub mod store;
pub mod transport;

pub use flow::ChatFlow;
pub use state::{ChatRow, ChatState, PrintDraft, PrintingJob, ScanDraft, ScanMode, ScanSession};
pub use store::{MemoryStateStore, SqliteStateStore, StateStore};
pub use transport::{Button, ChatEvent, ChatId, ChatTransport, Keyboard, MessageId};

#[cfg(any(test, feature = "test-support"))]
pub use transport::recording::RecordingTransport;

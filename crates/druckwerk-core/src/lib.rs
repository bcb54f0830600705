// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk — Core types, error definitions, and settings shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::DruckwerkError;
pub use types::*;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Auth — resolves bearer credentials to verified owner ids.
//
// Two credential shapes are accepted: user JWTs signed by the identity
// provider, and bot-composite tokens of the form `<telegramId>:<botSecret>`
// where the secret equals the configured bot token.

pub mod accounts;
pub mod gate;

pub use accounts::{AccountsClient, IdentityProvider};
pub use gate::AuthGate;

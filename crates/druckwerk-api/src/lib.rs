// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk API — the authenticated HTTP surface over the orchestration
// core. The chat front-end consumes the same core through `druckwerk-bot`;
// this crate only speaks HTTP.

pub mod app;
pub mod error;
pub mod extract;
pub mod routes;

pub use app::{AppContext, router};
pub use error::ApiError;

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// User endpoints.

use axum::Json;

use crate::extract::Authed;

/// The verified owner id behind the presented credential.
pub async fn my_id(Authed(owner): Authed) -> Json<String> {
    Json(owner.0)
}

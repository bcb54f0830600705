// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bearer extraction: every route takes `Authed` and gets a verified owner.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use druckwerk_core::OwnerId;

use crate::app::AppContext;
use crate::error::ApiError;

/// The verified owner behind the request's bearer credential.
#[derive(Debug, Clone)]
pub struct Authed(pub OwnerId);

#[async_trait]
impl FromRequestParts<Arc<AppContext>> for Authed {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppContext>,
    ) -> Result<Self, Self::Rejection> {
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        let owner = state.gate.verify(credential).await?;
        Ok(Authed(owner))
    }
}

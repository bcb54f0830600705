// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The auth gate: bearer credential → verified owner id.
//
// Shape A is a user JWT (RS256, exp and iat both checked). Shape B is the
// bot-composite `<telegramId>:<botSecret>`; the secret is compared in
// constant time against the configured bot token so a probing client
// learns nothing from response timing.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use ring::constant_time::verify_slices_are_equal;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use druckwerk_core::OwnerId;
use druckwerk_core::error::{DruckwerkError, Result};

use crate::accounts::IdentityProvider;

#[derive(Debug, Deserialize)]
struct Claims {
    uid: Option<String>,
    #[allow(dead_code)]
    exp: usize,
    iat: Option<i64>,
}

/// Verifies bearer credentials of both shapes.
pub struct AuthGate {
    provider: Arc<dyn IdentityProvider>,
    bot_token: String,
}

impl AuthGate {
    pub fn new(provider: Arc<dyn IdentityProvider>, bot_token: impl Into<String>) -> Self {
        Self {
            provider,
            bot_token: bot_token.into(),
        }
    }

    /// Resolve a credential to its owner.
    ///
    /// `None` (no header at all) is reported distinctly so clients can
    /// prompt for login instead of showing a rejection.
    #[instrument(skip_all)]
    pub async fn verify(&self, credential: Option<&str>) -> Result<OwnerId> {
        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            return Err(DruckwerkError::no_credentials());
        };

        if let Some((id_part, secret)) = credential.rsplit_once(':')
            && !id_part.is_empty()
            && id_part.chars().all(|c| c.is_ascii_digit())
        {
            return self.verify_bot_composite(id_part, secret).await;
        }
        self.verify_user_jwt(credential).await
    }

    /// Shape B: numeric chat id plus the shared bot secret.
    async fn verify_bot_composite(&self, id_part: &str, secret: &str) -> Result<OwnerId> {
        if verify_slices_are_equal(secret.as_bytes(), self.bot_token.as_bytes()).is_err() {
            warn!("bot-composite token with wrong secret");
            return Err(DruckwerkError::unauthorized());
        }
        let telegram_id: i64 = id_part
            .parse()
            .map_err(|_| DruckwerkError::unauthorized())?;

        match self.provider.resolve_telegram_id(telegram_id).await {
            Ok(Some(owner)) => {
                debug!(telegram_id, "bot-composite token verified");
                Ok(OwnerId(owner))
            }
            Ok(None) => Err(DruckwerkError::unauthorized()),
            Err(e) => {
                warn!(%e, "identity provider unavailable during bot verification");
                Err(DruckwerkError::unauthorized())
            }
        }
    }

    /// Shape A: a JWT signed by the identity provider.
    ///
    /// On signature failure the key is refreshed once and the token
    /// retried, so key rotation does not strand fresh tokens.
    async fn verify_user_jwt(&self, token: &str) -> Result<OwnerId> {
        match self.decode_with_current_key(token, false).await {
            Ok(owner) => Ok(owner),
            Err(_) => self.decode_with_current_key(token, true).await,
        }
    }

    async fn decode_with_current_key(&self, token: &str, force_refresh: bool) -> Result<OwnerId> {
        let pem = self
            .provider
            .public_key_pem(force_refresh)
            .await
            .map_err(|e| {
                warn!(%e, "no verification key available");
                DruckwerkError::unauthorized()
            })?;
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|_| DruckwerkError::unauthorized())?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;

        let data =
            decode::<Claims>(token, &key, &validation).map_err(|_| DruckwerkError::unauthorized())?;

        // jsonwebtoken does not check issued-at; tokens from the future are
        // as suspect as expired ones.
        if let Some(iat) = data.claims.iat
            && iat > chrono::Utc::now().timestamp()
        {
            return Err(DruckwerkError::unauthorized());
        }

        let uid = data.claims.uid.ok_or_else(DruckwerkError::unauthorized)?;
        debug!("user JWT verified");
        Ok(OwnerId(uid))
    }
}

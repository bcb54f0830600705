// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Client for the accounts service (the identity provider).
//
// Supplies the rotating JWT public key and resolves chat-platform numeric
// ids to account ids. The service JWT from the settings authenticates
// Druckwerk itself against the accounts API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use druckwerk_core::error::{DruckwerkError, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// What the auth gate needs from the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current JWT verification key, PEM-encoded.
    ///
    /// `force_refresh` bypasses the cache after a verification failure, so
    /// key rotation converges within one request.
    async fn public_key_pem(&self, force_refresh: bool) -> Result<String>;

    /// Resolve a chat-platform numeric id to an account id, if registered.
    async fn resolve_telegram_id(&self, telegram_id: i64) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    id: String,
}

/// HTTP implementation against the accounts API.
pub struct AccountsClient {
    client: reqwest::Client,
    base_url: String,
    cached_key: RwLock<Option<String>>,
}

impl AccountsClient {
    pub fn new(base_url: impl Into<String>, service_jwt: &str) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        let mut auth = reqwest::header::HeaderValue::from_str(&format!("Bearer {service_jwt}"))
            .map_err(|_| DruckwerkError::InvalidArgument("bad accounts service token".into()))?;
        auth.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| DruckwerkError::Backend(format!("accounts client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cached_key: RwLock::new(None),
        })
    }
}

#[async_trait]
impl IdentityProvider for AccountsClient {
    #[instrument(skip(self))]
    async fn public_key_pem(&self, force_refresh: bool) -> Result<String> {
        if !force_refresh
            && let Some(cached) = self.cached_key.read().await.clone()
        {
            return Ok(cached);
        }

        debug!("fetching JWT public key");
        let response = self
            .client
            .get(format!("{}/.well-known/jwt-public-key", self.base_url))
            .send()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("public key fetch: {e}")))?;
        if !response.status().is_success() {
            return Err(DruckwerkError::Backend(format!(
                "public key fetch returned {}",
                response.status()
            )));
        }
        let pem = response
            .text()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("public key body: {e}")))?;

        *self.cached_key.write().await = Some(pem.clone());
        info!("JWT public key refreshed");
        Ok(pem)
    }

    #[instrument(skip(self))]
    async fn resolve_telegram_id(&self, telegram_id: i64) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!(
                "{}/users/by-telegram-id/{telegram_id}",
                self.base_url
            ))
            .send()
            .await
            .map_err(|e| DruckwerkError::Backend(format!("user lookup: {e}")))?;

        match response.status() {
            s if s.is_success() => {
                let user: UserRecord = response
                    .json()
                    .await
                    .map_err(|e| DruckwerkError::Backend(format!("user lookup body: {e}")))?;
                Ok(Some(user.id))
            }
            reqwest::StatusCode::NOT_FOUND => {
                warn!(telegram_id, "unknown telegram id");
                Ok(None)
            }
            s => Err(DruckwerkError::Backend(format!(
                "user lookup returned {s}"
            ))),
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity-provider integration: silent credential renewal.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credential::{inspect, StoredCredential};
use crate::session::SessionContext;

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Silent renewal against the identity provider.
///
/// Interactive login is not part of this trait: it is a navigation to the
/// re-authentication entry point, owned by the redirect coordinator.
pub trait IdentityProvider: Send + Sync {
    /// Renew the credential if it expires within `lead_secs`.
    ///
    /// Resolves to whether the stored credential actually changed.
    fn refresh(&self, lead_secs: u64) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>>;
}

const INVALID_GRANT: &str = "invalid_grant";
const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Refresh-token grant against an OAuth2 token endpoint.
pub struct OAuthRefresher {
    ctx: Arc<SessionContext>,
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    max_retries: u32,
}

impl OAuthRefresher {
    pub fn new(ctx: Arc<SessionContext>, token_url: String, client_id: String) -> Self {
        crate::transport::ensure_crypto();
        Self {
            ctx,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            token_url,
            client_id,
            max_retries: 2,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn refresh_stored(&self, lead_secs: u64) -> anyhow::Result<bool> {
        let slot = self.ctx.credentials();
        let Some(current) = slot.load() else {
            anyhow::bail!("no credential to refresh");
        };
        if !inspect::expires_within(Some(&current.access_token), lead_secs, self.ctx.now_ms()) {
            return Ok(false);
        }
        let Some(refresh_token) = current.refresh_token.clone() else {
            anyhow::bail!("credential has no refresh token");
        };

        let token = self.grant_with_retries(&refresh_token).await?;

        let renewed = StoredCredential {
            access_token: token.access_token,
            token_type: token.token_type.unwrap_or(current.token_type),
            refresh_token: token.refresh_token.or(current.refresh_token),
            expires_in: Some(token.expires_in),
            stored_at_ms: self.ctx.now_ms(),
        };
        slot.store(&renewed)?;
        tracing::info!("credential refreshed");
        Ok(true)
    }

    /// Refresh-token grant with exponential backoff between attempts.
    ///
    /// A rejected refresh token is final and returned at once.
    async fn grant_with_retries(&self, refresh_token: &str) -> Result<TokenResponse, GrantError> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 0;
        loop {
            match self.request_grant(refresh_token).await {
                Ok(token) => return Ok(token),
                Err(e) if e.is_final() || attempt >= self.max_retries => return Err(e),
                Err(e) => {
                    tracing::debug!(attempt, err = %e, "refresh attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }

    /// One POST to the token endpoint.
    async fn request_grant(&self, refresh_token: &str) -> Result<TokenResponse, GrantError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| GrantError::Failed(e.into()))?;

        let status = resp.status();
        if status.is_success() {
            return resp.json::<TokenResponse>().await.map_err(|e| {
                GrantError::Failed(anyhow::Error::new(e).context("unreadable token response"))
            });
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<OAuthErrorBody>(&text) {
            Ok(body) if body.error == INVALID_GRANT => {
                Err(GrantError::Rejected { description: body.error_description })
            }
            Ok(body) => Err(GrantError::Failed(anyhow::anyhow!(
                "token endpoint returned {status}: {}{}",
                body.error,
                body.error_description.map(|d| format!(" ({d})")).unwrap_or_default(),
            ))),
            Err(_) => Err(GrantError::Failed(anyhow::anyhow!("token endpoint returned {status}: {text}"))),
        }
    }
}

impl IdentityProvider for OAuthRefresher {
    fn refresh(&self, lead_secs: u64) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        Box::pin(self.refresh_stored(lead_secs))
    }
}

/// OAuth2 error response body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Why a refresh-token grant failed.
#[derive(Debug)]
pub enum GrantError {
    /// The provider answered `invalid_grant`: the refresh token is dead.
    Rejected { description: Option<String> },
    /// Network failure, another OAuth error, or an unreadable response.
    Failed(anyhow::Error),
}

impl GrantError {
    /// Retrying cannot change the outcome.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

impl std::fmt::Display for GrantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected { description: Some(d) } => write!(f, "refresh token rejected ({INVALID_GRANT}): {d}"),
            Self::Rejected { description: None } => write!(f, "refresh token rejected ({INVALID_GRANT})"),
            Self::Failed(e) => write!(f, "refresh failed: {e:#}"),
        }
    }
}

impl std::error::Error for GrantError {}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;

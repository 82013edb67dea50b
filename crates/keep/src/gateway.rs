// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request gateway: the single path every outbound call takes.
//!
//! Pre-flight validates the stored credential locally, post-flight watches for
//! a 401. Either failure queues the request for replay and starts a reauth
//! cycle; the caller gets [`CallError::ReauthRequired`]. Anything else, success
//! or not, goes back to the caller exactly as the transport produced it.
//!
//! The only awaits are the optional proactive refresh and the network call.
//! Refreshes are single-flight: callers that find the credential expiring
//! queue on one gate and re-check it once they hold it.
//! The check-then-queue-then-redirect sequences on either side of them never
//! await, so concurrent calls cannot interleave inside them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::credential::inspect;
use crate::credential::refresh::IdentityProvider;
use crate::error::{AuthFailure, CallError};
use crate::queue::{Enqueued, PendingRequest, PendingStore};
use crate::redirect::RedirectCoordinator;
use crate::session::SessionContext;

/// Status a resource endpoint answers with for a rejected credential.
pub const UNAUTHORIZED: u16 = 401;

/// Default lead time for proactive refresh.
pub const DEFAULT_REFRESH_LEAD_SECS: u64 = 30;

/// Target fragment that never needs a credential by default.
pub const DEFAULT_PUBLIC_PATH: &str = "/user/login";

/// A call as issued by application code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub target: String,
    pub method: String,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: &str, target: impl Into<String>) -> Self {
        Self { target: target.into(), method: method.to_ascii_uppercase(), body: None }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new("GET", target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new("POST", target).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

impl From<PendingRequest> for ApiRequest {
    fn from(record: PendingRequest) -> Self {
        Self { target: record.target, method: record.method, body: record.body }
    }
}

/// A call as handed to the transport, with the credential attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub target: String,
    pub method: String,
    pub body: Option<Bytes>,
    /// Full `Authorization` header value, if any.
    pub authorization: Option<String>,
}

/// Response from a resource endpoint, opaque to the gateway apart from status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, headers: Vec::new(), body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Request/response channel to resource endpoints.
///
/// Object-safe for use as `Arc<dyn Transport>`.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: OutgoingRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>>;
}

/// Gateway tuning.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    /// Targets containing any of these fragments skip authorization.
    pub public_paths: Vec<String>,
    /// Refresh proactively when the credential expires within this many seconds.
    pub refresh_lead_secs: u64,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            public_paths: vec![DEFAULT_PUBLIC_PATH.to_owned()],
            refresh_lead_secs: DEFAULT_REFRESH_LEAD_SECS,
        }
    }
}

pub struct Gateway {
    ctx: Arc<SessionContext>,
    store: Arc<PendingStore>,
    redirect: Arc<RedirectCoordinator>,
    transport: Arc<dyn Transport>,
    identity: Option<Arc<dyn IdentityProvider>>,
    options: GatewayOptions,
    /// Held across every identity refresh so concurrent callers share one grant.
    refresh_gate: tokio::sync::Mutex<()>,
}

impl Gateway {
    pub fn new(
        ctx: Arc<SessionContext>,
        store: Arc<PendingStore>,
        redirect: Arc<RedirectCoordinator>,
        transport: Arc<dyn Transport>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            ctx,
            store,
            redirect,
            transport,
            identity: None,
            options,
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Attach an identity provider for proactive and in-place refresh.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    pub fn requires_auth(&self, target: &str) -> bool {
        !self.options.public_paths.iter().any(|p| !p.is_empty() && target.contains(p.as_str()))
    }

    /// Issue `request`, attaching the credential when the target needs one.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, CallError> {
        let protected = self.requires_auth(&request.target);

        let authorization = if protected {
            self.refresh_if_expiring().await;
            match self.preflight() {
                Ok(value) => Some(value),
                Err(failure) => return Err(self.defer(&request, failure)),
            }
        } else {
            None
        };

        let outgoing = OutgoingRequest {
            target: request.target.clone(),
            method: request.method.clone(),
            body: request.body.clone(),
            authorization,
        };
        let response = self.transport.send(outgoing).await.map_err(CallError::Transport)?;

        if protected && response.status == UNAUTHORIZED {
            return Err(self.defer(&request, AuthFailure::AuthorizationRejected));
        }
        Ok(response)
    }

    /// Silently renew the credential now.
    ///
    /// Returns whether the credential changed. On failure, if the current
    /// credential is no longer usable, a reauth cycle is started.
    pub async fn refresh_in_place(&self) -> anyhow::Result<bool> {
        let Some(identity) = self.identity.as_ref() else {
            anyhow::bail!("no identity provider configured");
        };
        let _gate = self.refresh_gate.lock().await;
        match identity.refresh(self.options.refresh_lead_secs).await {
            Ok(changed) => {
                if changed {
                    self.notify_refreshed();
                }
                Ok(changed)
            }
            Err(e) => {
                if !self.ctx.credential_valid() {
                    let location = self.redirect.navigator().current_location();
                    self.redirect.request_reauth(&location);
                }
                Err(e)
            }
        }
    }

    /// Authorization header value for a valid stored credential.
    fn preflight(&self) -> Result<String, AuthFailure> {
        let credential = self.ctx.credentials().load().ok_or(AuthFailure::NoCredential)?;
        if !inspect::is_valid(Some(&credential.access_token), self.ctx.now_ms()) {
            return Err(AuthFailure::CredentialExpired);
        }
        Ok(credential.authorization_value())
    }

    /// Queue `request` for replay and start (or join) the reauth cycle.
    fn defer(&self, request: &ApiRequest, failure: AuthFailure) -> CallError {
        let record = PendingRequest::new(
            request.target.clone(),
            &request.method,
            request.body.clone(),
            self.ctx.now_ms(),
        );
        let outcome = self.store.enqueue(record);
        let location = self.redirect.navigator().current_location();
        let redirected = self.redirect.request_reauth(&location);
        info!(
            target_url = %request.target,
            method = %request.method,
            failure = %failure,
            queued = (outcome == Enqueued::Added),
            redirected,
            "call deferred until re-authentication",
        );
        CallError::ReauthRequired(failure)
    }

    async fn refresh_if_expiring(&self) {
        let Some(identity) = self.identity.as_ref() else {
            return;
        };
        let lead = self.options.refresh_lead_secs;
        if !self.credential_expiring(lead) {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        // Another caller may have refreshed while this one waited.
        if !self.credential_expiring(lead) {
            return;
        }
        match identity.refresh(lead).await {
            Ok(true) => {
                debug!("credential refreshed before call");
                self.notify_refreshed();
            }
            Ok(false) => {}
            Err(e) => warn!(err = %e, "proactive refresh failed, using current credential"),
        }
    }

    /// Valid, but expiring within `lead` seconds.
    fn credential_expiring(&self, lead: u64) -> bool {
        let token = self.ctx.credentials().access_token();
        let now = self.ctx.now_ms();
        inspect::is_valid(token.as_deref(), now)
            && inspect::expires_within(token.as_deref(), lead, now)
    }

    fn notify_refreshed(&self) {
        let token = self.ctx.credentials().access_token();
        self.redirect.subscribers().notify(token);
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;

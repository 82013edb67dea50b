// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line host. Each invocation is one page load: the redirect flag
//! starts cleared, while the credential, queue and return marker come from
//! the state directory.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::KeepConfig;
use crate::credential::inspect::{self, UserProfile};
use crate::credential::refresh::OAuthRefresher;
use crate::credential::watch::spawn_expiry_watch;
use crate::credential::{CredentialEvent, StoredCredential};
use crate::gateway::ApiRequest;
use crate::navigate::ConsoleNavigator;
use crate::session::SessionContext;
use crate::storage::{FileStore, RETURN_URL_KEY};
use crate::transport::HttpTransport;
use crate::SessionKeeper;

/// Exit code when a call was deferred until re-authentication.
pub const EXIT_REAUTH: i32 = 3;

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Issue a call through the gateway.
    Call {
        /// HTTP method.
        method: String,
        /// Target path (relative to the base URL) or absolute URL.
        target: String,
        /// JSON request body.
        #[arg(long)]
        body: Option<String>,
        /// Location the call is made from; becomes the return location on redirect.
        #[arg(long, default_value = "/")]
        location: String,
    },
    /// Store a freshly issued credential and replay pending calls.
    Login {
        /// Access token.
        #[arg(long, env = "AUTHKEEP_TOKEN")]
        token: String,
        /// Refresh token issued alongside the access token.
        #[arg(long)]
        refresh_token: Option<String>,
        /// Declared lifetime in seconds.
        #[arg(long)]
        expires_in: Option<u64>,
    },
    /// Forget the credential, the pending queue and the return location.
    Logout,
    /// Silently renew the credential now.
    Refresh,
    /// Print credential, queue and marker state as JSON.
    Status,
    /// Keep the credential fresh until interrupted, printing credential events.
    Watch,
}

/// Result of one command: exit code plus the JSON document for stdout.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub code: i32,
    pub output: Value,
}

impl Outcome {
    fn ok(output: Value) -> Self {
        Self { code: 0, output }
    }
}

/// Wired components for one invocation.
pub struct Page {
    pub keeper: SessionKeeper,
    pub navigator: Arc<ConsoleNavigator>,
}

impl Page {
    /// Load the page at `location` from the configured state directory.
    pub fn open(config: &KeepConfig, location: &str) -> anyhow::Result<Self> {
        Self::open_with_clock(config, location, Arc::new(SystemClock))
    }

    /// Like [`Page::open`], reading time from `clock`.
    pub fn open_with_clock(
        config: &KeepConfig,
        location: &str,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let state_dir = config.state_dir();
        let durable = FileStore::durable(&state_dir)?;
        let session = FileStore::session(&state_dir, &config.session)?;
        let ctx = SessionContext::new(Arc::new(durable), Arc::new(session), clock);

        let navigator = Arc::new(ConsoleNavigator::new(location, config.base_url.clone()));
        let transport = Arc::new(HttpTransport::new(config.base_url.clone(), config.timeout()));

        let mut builder = SessionKeeper::builder(Arc::clone(&ctx), transport, navigator.clone())
            .login_path(config.login_path.clone())
            .public_paths(config.public_paths())
            .refresh_lead_secs(config.refresh_lead_secs);
        if let Some((token_url, client_id)) = config.oauth() {
            builder = builder.identity(Arc::new(OAuthRefresher::new(
                Arc::clone(&ctx),
                token_url.to_owned(),
                client_id.to_owned(),
            )));
        }
        Ok(Self { keeper: builder.build(), navigator })
    }
}

/// Run `command`, returning the exit code and printed document.
pub async fn execute(config: &KeepConfig, command: Command) -> anyhow::Result<Outcome> {
    match command {
        Command::Call { method, target, body, location } => {
            let page = Page::open(config, &location)?;
            call(&page, method, target, body).await
        }
        Command::Login { token, refresh_token, expires_in } => {
            let page = Page::open(config, &config.login_path)?;
            login(&page, token, refresh_token, expires_in).await
        }
        Command::Logout => {
            let page = Page::open(config, "/")?;
            page.keeper.replay.on_logout();
            Ok(Outcome::ok(json!({ "logged_out": true })))
        }
        Command::Refresh => {
            let page = Page::open(config, "/")?;
            let refreshed = page.keeper.gateway.refresh_in_place().await?;
            Ok(Outcome::ok(json!({ "refreshed": refreshed })))
        }
        Command::Status => {
            let page = Page::open(config, "/")?;
            Ok(Outcome::ok(status(&page.keeper)))
        }
        Command::Watch => {
            let page = Page::open(config, "/")?;
            let shutdown = CancellationToken::new();
            let sd = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    sd.cancel();
                }
            });
            watch(&page.keeper, config.refresh_lead_secs, shutdown, |event| {
                println!("{}", serde_json::to_string(event).unwrap_or_default());
            })
            .await;
            Ok(Outcome::ok(json!({ "stopped": true })))
        }
    }
}

/// Run `command` and print its document to stdout.
pub async fn run(config: &KeepConfig, command: Command) -> anyhow::Result<i32> {
    let outcome = execute(config, command).await?;
    println!("{}", serde_json::to_string_pretty(&outcome.output)?);
    Ok(outcome.code)
}

async fn call(
    page: &Page,
    method: String,
    target: String,
    body: Option<String>,
) -> anyhow::Result<Outcome> {
    let mut request = ApiRequest::new(&method, target);
    if let Some(body) = body {
        request = request.with_body(body);
    }

    match page.keeper.gateway.call(request).await {
        Ok(resp) => {
            let body = resp.json::<Value>().unwrap_or_else(|_| Value::String(resp.text()));
            let code = if resp.is_success() { 0 } else { 1 };
            Ok(Outcome { code, output: json!({ "status": resp.status, "body": body }) })
        }
        Err(e) => match e.auth_failure() {
            Some(failure) => Ok(Outcome {
                code: EXIT_REAUTH,
                output: json!({
                    "reauth": failure.as_str(),
                    "message": failure.message(),
                    "navigate": page.navigator.navigated_to(),
                    "pending": page.keeper.store.len(),
                }),
            }),
            None => Err(e.into()),
        },
    }
}

async fn login(
    page: &Page,
    token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
) -> anyhow::Result<Outcome> {
    let keeper = &page.keeper;
    if !inspect::is_valid(Some(&token), keeper.ctx.now_ms()) {
        anyhow::bail!("token is malformed or already expired");
    }
    let credential = StoredCredential {
        access_token: token,
        refresh_token,
        expires_in,
        stored_at_ms: keeper.ctx.now_ms(),
        ..StoredCredential::bearer("")
    };
    keeper.ctx.credentials().store(&credential)?;

    let return_to = keeper.redirect.consume_return_location();
    let report = keeper.replay.on_reauth_success().await;
    info!(replayed = report.replayed, failed = report.failed, "signed in");
    Ok(Outcome::ok(json!({
        "replayed": report.replayed,
        "failed": report.failed,
        "return_to": return_to,
    })))
}

/// Snapshot of credential, queue and marker.
pub fn status(keeper: &SessionKeeper) -> Value {
    let now = keeper.ctx.now_ms();
    let token = keeper.ctx.credentials().access_token();
    let claims = inspect::claims(token.as_deref());
    let return_url = keeper.ctx.session_store().get(RETURN_URL_KEY).unwrap_or_else(|e| {
        warn!(err = %e, "failed to read return location");
        None
    });
    let pending: Vec<Value> = keeper
        .store
        .pending()
        .iter()
        .map(|r| json!({ "url": r.target, "method": r.method, "timestamp": r.enqueued_at }))
        .collect();

    json!({
        "signed_in": token.is_some(),
        "valid": inspect::is_valid(token.as_deref(), now),
        "expires_at": claims.as_ref().and_then(|c| c.exp),
        "user": claims.as_ref().map(UserProfile::from_claims),
        "pending": pending,
        "return_url": return_url,
    })
}

/// Refresh whenever the expiry watch reports the credential is about to
/// expire, until `shutdown` fires. Every event is passed to `on_event`.
pub async fn watch(
    keeper: &SessionKeeper,
    lead_secs: u64,
    shutdown: CancellationToken,
    mut on_event: impl FnMut(&CredentialEvent),
) {
    let (tx, mut rx) = broadcast::channel(16);
    let handle = spawn_expiry_watch(Arc::clone(&keeper.ctx), lead_secs, tx, shutdown.clone());

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = shutdown.cancelled() => break,
        };
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "credential events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        on_event(&event);
        if matches!(event, CredentialEvent::ExpiryImminent { .. }) {
            match keeper.gateway.refresh_in_place().await {
                Ok(true) => on_event(&CredentialEvent::Refreshed),
                Ok(false) => {}
                Err(e) => on_event(&CredentialEvent::RefreshFailed { error: format!("{e:#}") }),
            }
        }
    }
    let _ = handle.await;
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: token fabrication, a scripted transport, and a
//! fully wired in-memory harness.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::clock::{Clock, ManualClock};
use crate::credential::refresh::IdentityProvider;
use crate::credential::StoredCredential;
use crate::gateway::{ApiResponse, OutgoingRequest, Transport};
use crate::navigate::MemoryNavigator;
use crate::session::SessionContext;
use crate::storage::MemoryStore;
use crate::SessionKeeper;

/// Epoch millis every harness clock starts at.
pub const HARNESS_START_MS: u64 = 1_700_000_000_000;

/// Build an unsigned compact token carrying `claims`.
pub fn fake_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signature = URL_SAFE_NO_PAD.encode(b"sig");
    format!("{header}.{payload}.{signature}")
}

/// Token for `user-1` expiring at `exp` (epoch seconds).
pub fn token_expiring_at(exp: u64) -> String {
    fake_jwt(&serde_json::json!({
        "sub": "user-1",
        "exp": exp,
        "preferred_username": "user1",
        "realm_access": { "roles": ["REQUESTER"] },
    }))
}

/// Scripted reply for [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, Bytes),
    Error(String),
    /// Reply after a delay, to make completions arrive out of order.
    Delayed(Duration, u16),
}

/// Transport that records every request and answers from a per-target script.
///
/// Requests are recorded when `send` is called, before the returned future is
/// polled, so [`MockTransport::calls`] reflects initiation order.
#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<OutgoingRequest>>,
    script: Mutex<HashMap<String, VecDeque<MockReply>>>,
    completed: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue `reply` for the next call to `target`. Unscripted calls get 200 `{}`.
    pub fn push(&self, target: &str, reply: MockReply) {
        self.script.lock().entry(target.to_owned()).or_default().push_back(reply);
    }

    pub fn calls(&self) -> Vec<OutgoingRequest> {
        self.calls.lock().clone()
    }

    pub fn call_targets(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.target.clone()).collect()
    }

    /// Targets in the order their responses resolved.
    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().clone()
    }
}

impl Transport for MockTransport {
    fn send(
        &self,
        request: OutgoingRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>> {
        let target = request.target.clone();
        self.calls.lock().push(request);
        let reply = self
            .script
            .lock()
            .get_mut(&target)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| MockReply::Status(200, Bytes::from_static(b"{}")));

        Box::pin(async move {
            let result = match reply {
                MockReply::Status(status, body) => Ok(ApiResponse::new(status, body)),
                MockReply::Error(msg) => Err(anyhow::anyhow!(msg)),
                MockReply::Delayed(delay, status) => {
                    tokio::time::sleep(delay).await;
                    Ok(ApiResponse::new(status, Bytes::from_static(b"{}")))
                }
            };
            self.completed.lock().push(target);
            result
        })
    }
}

/// Identity provider that swaps in a scripted credential.
pub struct MockIdentity {
    ctx: Arc<SessionContext>,
    next: Mutex<VecDeque<anyhow::Result<Option<String>>>>,
    calls: Mutex<Vec<u64>>,
    delay: Mutex<Duration>,
}

impl MockIdentity {
    pub fn new(ctx: Arc<SessionContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            next: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Every refresh waits this long before resolving.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Next refresh stores `token` (`Some`) or reports no change (`None`).
    pub fn push_ok(&self, token: Option<String>) {
        self.next.lock().push_back(Ok(token));
    }

    pub fn push_err(&self, msg: &str) {
        self.next.lock().push_back(Err(anyhow::anyhow!(msg.to_owned())));
    }

    /// Lead times passed to each refresh call.
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().clone()
    }
}

impl IdentityProvider for MockIdentity {
    fn refresh(
        &self,
        lead_secs: u64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        self.calls.lock().push(lead_secs);
        let next = self.next.lock().pop_front().unwrap_or(Ok(None));
        let delay = *self.delay.lock();
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match next? {
                Some(token) => {
                    self.ctx.credentials().store(&StoredCredential::bearer(token))?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }
}

/// In-memory wiring of every component around a manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub durable: Arc<MemoryStore>,
    pub session: Arc<MemoryStore>,
    pub navigator: Arc<MemoryNavigator>,
    pub transport: Arc<MockTransport>,
    pub keeper: SessionKeeper,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(HARNESS_START_MS));
        let durable = Arc::new(MemoryStore::new());
        let session = Arc::new(MemoryStore::new());
        let navigator = Arc::new(MemoryNavigator::new("/rfcs"));
        let transport = MockTransport::new();
        let keeper = Self::wire(&clock, &durable, &session, &navigator, &transport);
        Self { clock, durable, session, navigator, transport, keeper }
    }

    /// Simulate a full page reload: same storage, fresh in-memory state.
    pub fn reload(&self) -> Self {
        let keeper =
            Self::wire(&self.clock, &self.durable, &self.session, &self.navigator, &self.transport);
        Self {
            clock: Arc::clone(&self.clock),
            durable: Arc::clone(&self.durable),
            session: Arc::clone(&self.session),
            navigator: Arc::clone(&self.navigator),
            transport: Arc::clone(&self.transport),
            keeper,
        }
    }

    fn wire(
        clock: &Arc<ManualClock>,
        durable: &Arc<MemoryStore>,
        session: &Arc<MemoryStore>,
        navigator: &Arc<MemoryNavigator>,
        transport: &Arc<MockTransport>,
    ) -> SessionKeeper {
        let ctx = SessionContext::new(durable.clone(), session.clone(), clock.clone());
        SessionKeeper::builder(ctx, transport.clone(), navigator.clone()).build()
    }

    /// Store a credential valid for `secs` more seconds and return its token.
    pub fn sign_in_for(&self, secs: u64) -> anyhow::Result<String> {
        let token = token_expiring_at(self.clock.now_secs() + secs);
        self.keeper.ctx.credentials().store(&StoredCredential::bearer(token.clone()))?;
        Ok(token)
    }

    /// Store a credential that expired a minute ago.
    pub fn sign_in_expired(&self) -> anyhow::Result<String> {
        let token = token_expiring_at(self.clock.now_secs() - 60);
        self.keeper.ctx.credentials().store(&StoredCredential::bearer(token.clone()))?;
        Ok(token)
    }
}

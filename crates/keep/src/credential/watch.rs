// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Expiry watch: tells the host a credential is about to expire so it can
//! refresh in place instead of waiting for a rejected call.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::credential::{inspect, CredentialEvent};
use crate::session::SessionContext;

/// How often the slot is re-read while no expiry is due.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Spawn a task that emits [`CredentialEvent::ExpiryImminent`] once per
/// credential when it comes within `lead_secs` of expiry.
pub fn spawn_expiry_watch(
    ctx: Arc<SessionContext>,
    lead_secs: u64,
    event_tx: broadcast::Sender<CredentialEvent>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut announced: Option<u64> = None;
        loop {
            let wait = match next_expiry(&ctx, lead_secs) {
                Some((exp, due_in)) if due_in.is_zero() => {
                    if announced != Some(exp) {
                        announced = Some(exp);
                        tracing::debug!(expires_at = exp, "credential expiry imminent");
                        let _ = event_tx.send(CredentialEvent::ExpiryImminent { expires_at: exp });
                    }
                    POLL_INTERVAL
                }
                Some((_, due_in)) => due_in.min(POLL_INTERVAL),
                None => POLL_INTERVAL,
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    })
}

/// `(exp, time until exp - lead)` for the stored credential, if it has an expiry.
fn next_expiry(ctx: &SessionContext, lead_secs: u64) -> Option<(u64, Duration)> {
    let token = ctx.credentials().access_token()?;
    let exp_ms = inspect::decode_claims(&token)?.expires_at_ms()?;
    let due_at = exp_ms.saturating_sub(lead_secs.saturating_mul(1000));
    let due_in = due_at.saturating_sub(ctx.now_ms());
    Some((exp_ms / 1000, Duration::from_millis(due_in)))
}

#[cfg(test)]
#[path = "watch_tests.rs"]
mod tests;

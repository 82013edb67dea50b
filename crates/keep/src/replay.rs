// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Replay after re-authentication.
//!
//! Once a fresh credential exists the host calls
//! [`ReplayCoordinator::on_reauth_success`]: in-memory refresh subscribers are
//! notified first, then the pending queue is drained and every surviving
//! request re-issued through the gateway. Replays run concurrently and are
//! started in queue order; one failing never stops the others, and none is
//! retried again automatically.

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::gateway::{ApiRequest, Gateway};
use crate::queue::PendingStore;
use crate::redirect::RedirectCoordinator;
use crate::session::SessionContext;

/// Outcome of one replay batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Requests re-issued.
    pub replayed: usize,
    /// Replays that ended in an error (transport failure or another reauth).
    pub failed: usize,
}

pub struct ReplayCoordinator {
    ctx: Arc<SessionContext>,
    gateway: Arc<Gateway>,
    store: Arc<PendingStore>,
    redirect: Arc<RedirectCoordinator>,
}

impl ReplayCoordinator {
    pub fn new(
        ctx: Arc<SessionContext>,
        gateway: Arc<Gateway>,
        store: Arc<PendingStore>,
        redirect: Arc<RedirectCoordinator>,
    ) -> Self {
        Self { ctx, gateway, store, redirect }
    }

    /// Finish the reauth cycle and replay everything queued during it.
    ///
    /// Resolves once every replay has settled.
    pub async fn on_reauth_success(&self) -> ReplayReport {
        self.redirect.on_reauth_complete();

        let records = self.store.drain();
        if records.is_empty() {
            return ReplayReport::default();
        }
        info!(count = records.len(), "replaying pending requests");

        let replays = records.into_iter().map(|record| {
            let gateway = Arc::clone(&self.gateway);
            async move {
                let target = record.target.clone();
                match gateway.call(ApiRequest::from(record)).await {
                    Ok(resp) => {
                        if !resp.is_success() {
                            warn!(target_url = %target, status = resp.status, "replayed request returned error status");
                        }
                        true
                    }
                    Err(e) => {
                        warn!(target_url = %target, err = %e, "failed to replay request");
                        false
                    }
                }
            }
        });
        let results = join_all(replays).await;

        let report = ReplayReport {
            replayed: results.len(),
            failed: results.iter().filter(|ok| !**ok).count(),
        };
        info!(replayed = report.replayed, failed = report.failed, "replay complete");
        report
    }

    /// Forget everything tied to the signed-in user.
    pub fn on_logout(&self) {
        self.ctx.credentials().invalidate();
        self.store.clear();
        self.redirect.clear_return_location();
        self.redirect.subscribers().clear();
        self.redirect.reset();
        info!("session cleared");
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;

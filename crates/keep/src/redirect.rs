// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Redirect coordination: at most one navigation to re-authentication per
//! reauth cycle, however many calls fail concurrently.
//!
//! State machine: `IDLE -> REDIRECTING` on the first [`RedirectCoordinator::request_reauth`],
//! back to `IDLE` on [`RedirectCoordinator::on_reauth_complete`]. Further
//! `request_reauth` calls while redirecting are no-ops, so neither the
//! navigation nor the return marker is repeated or overwritten.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::navigate::{location_path, Navigator};
use crate::session::SessionContext;
use crate::storage::RETURN_URL_KEY;

/// Default re-authentication entry point.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Fire-once broadcast to callers waiting for a fresh credential.
///
/// Each waiter receives the new access token (or `None` if the slot is empty
/// at notification time) exactly once; the list is then cleared.
#[derive(Debug, Default)]
pub struct RefreshBroadcast {
    waiters: Mutex<Vec<oneshot::Sender<Option<String>>>>,
}

impl RefreshBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> oneshot::Receiver<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().push(tx);
        rx
    }

    /// Deliver `token` to every waiter in registration order and clear the list.
    pub fn notify(&self, token: Option<String>) -> usize {
        let waiters = std::mem::take(&mut *self.waiters.lock());
        let count = waiters.len();
        for tx in waiters {
            let _ = tx.send(token.clone());
        }
        count
    }

    /// Drop every waiter without notifying; receivers observe closure.
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sole writer of the redirect flag and the return-location marker.
pub struct RedirectCoordinator {
    ctx: Arc<SessionContext>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    subscribers: RefreshBroadcast,
    /// Serializes marker reads/writes against each other.
    marker: Mutex<()>,
}

impl RedirectCoordinator {
    pub fn new(
        ctx: Arc<SessionContext>,
        navigator: Arc<dyn Navigator>,
        login_path: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            navigator,
            login_path: login_path.into(),
            subscribers: RefreshBroadcast::new(),
            marker: Mutex::new(()),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub fn subscribers(&self) -> &RefreshBroadcast {
        &self.subscribers
    }

    pub fn is_redirecting(&self) -> bool {
        self.ctx.is_redirecting()
    }

    /// Whether `location` is the re-authentication entry point itself.
    pub fn is_login_location(&self, location: &str) -> bool {
        route_path(location) == route_path(&self.login_path)
    }

    /// Begin a reauth cycle from `current_location`.
    ///
    /// Returns true if this call performed the navigation. No-op when a cycle
    /// is already in progress or the user is already on the entry point.
    /// Everything here is synchronous.
    pub fn request_reauth(&self, current_location: &str) -> bool {
        if self.is_login_location(current_location) {
            debug!(location = %current_location, "already on login page, not redirecting");
            return false;
        }
        if !self.ctx.begin_redirect() {
            debug!(location = %current_location, "redirect already in progress");
            return false;
        }

        self.save_return_location(current_location);
        self.ctx.credentials().invalidate();
        info!(from = %current_location, to = %self.login_path, "redirecting to re-authentication");
        self.navigator.navigate(&self.login_path);
        true
    }

    /// Take the return marker, clearing it.
    pub fn consume_return_location(&self) -> Option<String> {
        let _guard = self.marker.lock();
        let store = self.ctx.session_store();
        let location = match store.get(RETURN_URL_KEY) {
            Ok(location) => location,
            Err(e) => {
                warn!(err = %e, "failed to read return location");
                None
            }
        };
        if let Err(e) = store.remove(RETURN_URL_KEY) {
            warn!(err = %e, "failed to clear return location");
        }
        location.filter(|l| !l.is_empty())
    }

    /// Discard the return marker without reading it.
    pub fn clear_return_location(&self) {
        let _guard = self.marker.lock();
        if let Err(e) = self.ctx.session_store().remove(RETURN_URL_KEY) {
            warn!(err = %e, "failed to clear return location");
        }
    }

    /// End the reauth cycle and notify refresh subscribers.
    pub fn on_reauth_complete(&self) {
        self.ctx.end_redirect();
        let token = self.ctx.credentials().access_token();
        let notified = self.subscribers.notify(token);
        if notified > 0 {
            debug!(notified, "notified refresh subscribers");
        }
    }

    /// Clear the redirect flag without notifying anyone.
    pub fn reset(&self) {
        self.ctx.end_redirect();
    }

    fn save_return_location(&self, location: &str) {
        if location.is_empty() || self.is_login_location(location) {
            return;
        }
        let _guard = self.marker.lock();
        if let Err(e) = self.ctx.session_store().set(RETURN_URL_KEY, location) {
            warn!(err = %e, "failed to save return location");
        }
    }
}

/// Path of `location` without scheme and host, query, fragment or trailing
/// slashes. The site root is `/`.
fn route_path(location: &str) -> &str {
    let path = location_path(location);
    let path = match path.find("://") {
        Some(i) => {
            let rest = &path[i + 3..];
            rest.find('/').map_or("/", |j| &rest[j..])
        }
        None => path,
    };
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

#[cfg(test)]
#[path = "redirect_tests.rs"]
mod tests;

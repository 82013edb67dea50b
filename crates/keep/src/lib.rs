// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authkeep: session continuity for authenticated calls.
//!
//! Every call goes through a [`gateway::Gateway`] that validates the stored
//! credential, queues calls that cannot proceed, redirects to
//! re-authentication at most once per cycle, and replays the queue once a
//! fresh credential exists, including after a full reload.

pub mod clock;
pub mod command;
pub mod config;
pub mod credential;
pub mod error;
pub mod gateway;
pub mod navigate;
pub mod queue;
pub mod redirect;
pub mod replay;
pub mod session;
pub mod storage;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use crate::credential::refresh::IdentityProvider;
use crate::gateway::{Gateway, GatewayOptions, Transport};
use crate::navigate::Navigator;
use crate::queue::{PendingStore, QueueLimits};
use crate::redirect::{RedirectCoordinator, DEFAULT_LOGIN_PATH};
use crate::replay::ReplayCoordinator;
use crate::session::SessionContext;

/// The wired-up set of components for one page load.
pub struct SessionKeeper {
    pub ctx: Arc<SessionContext>,
    pub store: Arc<PendingStore>,
    pub redirect: Arc<RedirectCoordinator>,
    pub gateway: Arc<Gateway>,
    pub replay: ReplayCoordinator,
}

impl SessionKeeper {
    pub fn builder(
        ctx: Arc<SessionContext>,
        transport: Arc<dyn Transport>,
        navigator: Arc<dyn Navigator>,
    ) -> SessionKeeperBuilder {
        SessionKeeperBuilder {
            ctx,
            transport,
            navigator,
            login_path: DEFAULT_LOGIN_PATH.to_owned(),
            options: GatewayOptions::default(),
            limits: QueueLimits::default(),
            identity: None,
        }
    }
}

/// Builder for [`SessionKeeper`] with the stock defaults.
pub struct SessionKeeperBuilder {
    ctx: Arc<SessionContext>,
    transport: Arc<dyn Transport>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    options: GatewayOptions,
    limits: QueueLimits,
    identity: Option<Arc<dyn IdentityProvider>>,
}

impl SessionKeeperBuilder {
    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn public_paths(mut self, paths: Vec<String>) -> Self {
        self.options.public_paths = paths;
        self
    }

    pub fn refresh_lead_secs(mut self, secs: u64) -> Self {
        self.options.refresh_lead_secs = secs;
        self
    }

    pub fn limits(mut self, limits: QueueLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build(self) -> SessionKeeper {
        let ctx = self.ctx;
        let store = Arc::new(PendingStore::new(
            Arc::clone(ctx.session_store()),
            Arc::clone(ctx.clock()),
            self.limits,
        ));
        let redirect =
            Arc::new(RedirectCoordinator::new(Arc::clone(&ctx), self.navigator, self.login_path));
        let mut gateway = Gateway::new(
            Arc::clone(&ctx),
            Arc::clone(&store),
            Arc::clone(&redirect),
            self.transport,
            self.options,
        );
        if let Some(identity) = self.identity {
            gateway = gateway.with_identity(identity);
        }
        let gateway = Arc::new(gateway);
        let replay = ReplayCoordinator::new(
            Arc::clone(&ctx),
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&redirect),
        );
        SessionKeeper { ctx, store, redirect, gateway, replay }
    }
}

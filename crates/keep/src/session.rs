// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared session state, passed explicitly to the gateway and coordinators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::credential::inspect;
use crate::credential::CredentialSlot;
use crate::storage::{KeyValue, MemoryStore};

/// Process-wide state for one browsing session.
///
/// Holds the credential slot (durable scope), the session-scoped store used by
/// the pending queue and the return marker, the clock, and the
/// redirect-in-progress flag. The flag is memory-only: a reload starts with it
/// cleared while queue and marker survive.
pub struct SessionContext {
    credentials: CredentialSlot,
    session_store: Arc<dyn KeyValue>,
    clock: Arc<dyn Clock>,
    redirecting: AtomicBool,
}

impl SessionContext {
    pub fn new(
        durable: Arc<dyn KeyValue>,
        session_store: Arc<dyn KeyValue>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            credentials: CredentialSlot::new(durable),
            session_store,
            clock,
            redirecting: AtomicBool::new(false),
        })
    }

    /// Context backed entirely by memory with the system clock.
    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn credentials(&self) -> &CredentialSlot {
        &self.credentials
    }

    pub fn session_store(&self) -> &Arc<dyn KeyValue> {
        &self.session_store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Whether the stored credential exists and has not expired.
    pub fn credential_valid(&self) -> bool {
        inspect::is_valid(self.credentials.access_token().as_deref(), self.now_ms())
    }

    pub fn is_redirecting(&self) -> bool {
        self.redirecting.load(Ordering::SeqCst)
    }

    /// Flip the flag from clear to set. Returns false if it was already set.
    pub(crate) fn begin_redirect(&self) -> bool {
        self.redirecting.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub(crate) fn end_redirect(&self) {
        self.redirecting.store(false, Ordering::SeqCst);
    }
}

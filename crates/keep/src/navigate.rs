// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Navigation boundary.
//!
//! Redirecting to re-authentication is a full navigation: everything held in
//! memory may be gone afterwards. Hosts implement [`Navigator`] over their
//! page/window abstraction.

use parking_lot::Mutex;

/// The host's current location and its ability to leave it.
pub trait Navigator: Send + Sync {
    /// Path + query + fragment of the page the user is on.
    fn current_location(&self) -> String;

    /// Perform a full navigation to `to`.
    fn navigate(&self, to: &str);
}

/// Navigator that records navigations instead of performing them.
#[derive(Debug)]
pub struct MemoryNavigator {
    location: Mutex<String>,
    history: Mutex<Vec<String>>,
}

impl MemoryNavigator {
    pub fn new(location: impl Into<String>) -> Self {
        Self { location: Mutex::new(location.into()), history: Mutex::new(Vec::new()) }
    }

    pub fn set_location(&self, location: impl Into<String>) {
        *self.location.lock() = location.into();
    }

    /// Every navigation performed so far, oldest first.
    pub fn navigations(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

impl Navigator for MemoryNavigator {
    fn current_location(&self) -> String {
        self.location.lock().clone()
    }

    fn navigate(&self, to: &str) {
        self.history.lock().push(to.to_owned());
        *self.location.lock() = to.to_owned();
    }
}

/// Navigator for the command-line host: the "page" is whatever location the
/// invocation claims to be on, and navigating prints where the user must go.
#[derive(Debug)]
pub struct ConsoleNavigator {
    location: String,
    base_url: String,
    navigated: Mutex<Option<String>>,
}

impl ConsoleNavigator {
    pub fn new(location: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self { location: location.into(), base_url: base_url.into(), navigated: Mutex::new(None) }
    }

    /// Absolute URL navigated to during this invocation, if any.
    pub fn navigated_to(&self) -> Option<String> {
        self.navigated.lock().clone()
    }
}

impl Navigator for ConsoleNavigator {
    fn current_location(&self) -> String {
        self.location.clone()
    }

    fn navigate(&self, to: &str) {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), to);
        tracing::info!(url = %url, "re-authentication required");
        *self.navigated.lock() = Some(url);
    }
}

/// Path component of a location (everything before `?` or `#`).
pub fn location_path(location: &str) -> &str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    &location[..end]
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential slot: the single access credential every call is made with.
//!
//! The slot lives in durable storage so it is still there after a reload.
//! This crate only reads and invalidates it; writing a fresh credential is the
//! identity-provider integration's job (`store` is exposed for that purpose).

pub mod inspect;
pub mod refresh;
pub mod watch;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::storage::{KeyValue, CREDENTIAL_KEY};

fn default_token_type() -> String {
    "Bearer".to_owned()
}

/// Persisted credential plus the secondary fields issued alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Declared lifetime in seconds, as issued.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// When the credential was written, epoch millis.
    #[serde(default)]
    pub stored_at_ms: u64,
}

impl StoredCredential {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: None,
            expires_in: None,
            stored_at_ms: 0,
        }
    }

    /// Value for the `Authorization` header.
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Events about the credential's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CredentialEvent {
    /// The credential expires within the configured lead time.
    ExpiryImminent { expires_at: u64 },
    /// A silent refresh replaced the credential.
    Refreshed,
    /// A silent refresh failed.
    #[serde(rename = "refresh:failed")]
    RefreshFailed { error: String },
}

/// Read/invalidate access to the stored credential.
#[derive(Clone)]
pub struct CredentialSlot {
    store: Arc<dyn KeyValue>,
}

impl CredentialSlot {
    pub fn new(store: Arc<dyn KeyValue>) -> Self {
        Self { store }
    }

    /// Current credential, or `None` if absent or unreadable.
    pub fn load(&self) -> Option<StoredCredential> {
        let raw = match self.store.get(CREDENTIAL_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(err = %e, "failed to read credential slot");
                return None;
            }
        };
        match serde_json::from_str::<StoredCredential>(&raw) {
            Ok(cred) if !cred.access_token.is_empty() => Some(cred),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(err = %e, "credential slot is corrupt");
                None
            }
        }
    }

    /// Current access token only.
    pub fn access_token(&self) -> Option<String> {
        self.load().map(|c| c.access_token)
    }

    pub fn store(&self, credential: &StoredCredential) -> anyhow::Result<()> {
        let json = serde_json::to_string(credential)?;
        self.store.set(CREDENTIAL_KEY, &json)
    }

    /// Drop the access and refresh tokens.
    pub fn invalidate(&self) {
        if let Err(e) = self.store.remove(CREDENTIAL_KEY) {
            tracing::warn!(err = %e, "failed to invalidate credential");
        }
    }
}

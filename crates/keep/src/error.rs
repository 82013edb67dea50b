// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a call could not proceed without a fresh credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthFailure {
    /// No authorization material is present.
    NoCredential,
    /// The credential's `exp` claim is at or before now (detected locally).
    CredentialExpired,
    /// The server answered 401 for an attached credential.
    AuthorizationRejected,
}

impl AuthFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoCredential => "NO_CREDENTIAL",
            Self::CredentialExpired => "CREDENTIAL_EXPIRED",
            Self::AuthorizationRejected => "AUTHORIZATION_REJECTED",
        }
    }

    /// Human-readable message shown alongside the code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NoCredential => "authentication required, redirecting to login",
            Self::CredentialExpired => "credential expired, redirecting to login",
            Self::AuthorizationRejected => "credential rejected, redirecting to login",
        }
    }

    /// True when the failure was detected without a network round-trip.
    pub fn is_preflight(&self) -> bool {
        !matches!(self, Self::AuthorizationRejected)
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`crate::gateway::Gateway::call`].
///
/// Authorization-class failures are folded into `ReauthRequired`: the request
/// has been queued for replay and a redirect initiated, so the caller should
/// abandon the call rather than branch on it. Everything else is the
/// transport's own error, untouched.
#[derive(Debug)]
pub enum CallError {
    ReauthRequired(AuthFailure),
    Transport(anyhow::Error),
}

impl CallError {
    pub fn is_reauth(&self) -> bool {
        matches!(self, Self::ReauthRequired(_))
    }

    pub fn auth_failure(&self) -> Option<AuthFailure> {
        match self {
            Self::ReauthRequired(f) => Some(*f),
            Self::Transport(_) => None,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReauthRequired(failure) => write!(f, "{failure}: {}", failure.message()),
            Self::Transport(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReauthRequired(_) => None,
            Self::Transport(e) => Some(&**e),
        }
    }
}

impl From<anyhow::Error> for CallError {
    fn from(e: anyhow::Error) -> Self {
        Self::Transport(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

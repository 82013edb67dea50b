// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local credential inspection: claim decoding and expiry checks.
//!
//! Runs before every outgoing call, so nothing here does I/O or returns an
//! error. A token that cannot be decoded is simply not valid.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role priority used to pick a user's primary role, highest first.
pub const DEFAULT_ROLE_PRIORITY: &[&str] = &["ADMIN", "CAB_MANAGER", "EXECUTOR", "REQUESTER"];

/// Role assigned when none of the prioritized roles is present.
pub const DEFAULT_ROLE: &str = "REQUESTER";

/// Decoded claims of a compact (three-segment) token.
///
/// Only `exp` is required to be well-typed. Every other claim is read
/// leniently: a value of an unexpected type is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Option<String>,
    /// Issued-at as whole epoch seconds.
    pub iat: Option<u64>,
    /// Expiry as whole epoch seconds.
    pub exp: Option<u64>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub email_verified: bool,
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// Union of `realm_access.roles` and a top-level `roles` array.
    pub roles: Vec<String>,
    /// Expiry with sub-second precision, when decoded from a token.
    #[serde(skip)]
    exp_ms: Option<u64>,
}

impl Claims {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Expiry as epoch millis.
    pub fn expires_at_ms(&self) -> Option<u64> {
        self.exp_ms.or_else(|| self.exp.map(|exp| exp.saturating_mul(1000)))
    }
}

/// Decode the claims segment of `token`. Returns `None` unless it is three
/// segments with a base64url JSON object in the middle.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    let map = value.as_object()?;

    let exp_ms = map.get("exp").and_then(numeric_date_ms);
    let mut roles = string_list(map.get("realm_access").and_then(|r| r.get("roles")));
    for role in string_list(map.get("roles")) {
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    Some(Claims {
        sub: string_claim(map.get("sub")),
        iat: map.get("iat").and_then(numeric_date_ms).map(|ms| ms / 1000),
        exp: exp_ms.map(|ms| ms / 1000),
        preferred_username: string_claim(map.get("preferred_username")),
        email: string_claim(map.get("email")),
        email_verified: bool_claim(map.get("email_verified")),
        name: string_claim(map.get("name")),
        given_name: string_claim(map.get("given_name")),
        family_name: string_claim(map.get("family_name")),
        roles,
        exp_ms,
    })
}

/// NumericDate (possibly fractional seconds) as epoch millis.
fn numeric_date_ms(value: &Value) -> Option<u64> {
    let secs = value.as_f64().filter(|s| s.is_finite())?;
    Some((secs * 1000.0).max(0.0) as u64)
}

/// Strings as-is, numbers in their decimal form, anything else absent.
fn string_claim(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn bool_claim(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default()
}

/// Claims of an optional credential; `None` when absent or malformed.
pub fn claims(token: Option<&str>) -> Option<Claims> {
    token.and_then(decode_claims)
}

/// True when the credential is present, decodes, carries `exp`, and `exp` is
/// strictly after `now_ms`.
pub fn is_valid(token: Option<&str>, now_ms: u64) -> bool {
    match claims(token).and_then(|c| c.expires_at_ms()) {
        Some(exp_ms) => exp_ms > now_ms,
        None => false,
    }
}

/// True when the credential expires within `lead_secs` of `now_ms`.
///
/// Absent or malformed credentials always need renewal, so they report true.
pub fn expires_within(token: Option<&str>, lead_secs: u64, now_ms: u64) -> bool {
    match claims(token).and_then(|c| c.expires_at_ms()) {
        Some(exp_ms) => exp_ms.saturating_sub(lead_secs.saturating_mul(1000)) <= now_ms,
        None => true,
    }
}

/// User identity derived from claims, for callers making authorization
/// decisions in the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Option<String>,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub name: String,
    pub email: String,
    pub email_verified: bool,
    /// Highest-priority role held, or [`DEFAULT_ROLE`].
    pub role: String,
    pub roles: Vec<String>,
}

impl UserProfile {
    pub fn from_claims(claims: &Claims) -> Self {
        Self::with_priority(claims, DEFAULT_ROLE_PRIORITY)
    }

    pub fn with_priority(claims: &Claims, priority: &[&str]) -> Self {
        let role = priority
            .iter()
            .find(|r| claims.has_role(r))
            .map(|r| (*r).to_owned())
            .unwrap_or_else(|| DEFAULT_ROLE.to_owned());
        Self {
            id: claims.sub.clone(),
            username: claims.preferred_username.clone().unwrap_or_default(),
            first_name: claims.given_name.clone().unwrap_or_default(),
            last_name: claims.family_name.clone().unwrap_or_default(),
            name: claims.name.clone().unwrap_or_default(),
            email: claims.email.clone().unwrap_or_default(),
            email_verified: claims.email_verified,
            role,
            roles: claims.roles.clone(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("ADMIN")
    }
}

#[cfg(test)]
#[path = "inspect_tests.rs"]
mod tests;

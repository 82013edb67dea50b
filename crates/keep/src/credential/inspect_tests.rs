// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{fake_jwt, token_expiring_at};

const NOW_MS: u64 = 1_700_000_000_000;
const NOW_SECS: u64 = NOW_MS / 1000;

#[test]
fn valid_when_exp_in_future() {
    let token = token_expiring_at(NOW_SECS + 60);
    assert!(is_valid(Some(&token), NOW_MS));
}

#[test]
fn invalid_when_exp_at_now() {
    let token = token_expiring_at(NOW_SECS);
    assert!(!is_valid(Some(&token), NOW_MS));
}

#[test]
fn invalid_when_exp_in_past() {
    let token = token_expiring_at(NOW_SECS - 1);
    assert!(!is_valid(Some(&token), NOW_MS));
}

#[test]
fn invalid_when_absent() {
    assert!(!is_valid(None, NOW_MS));
    assert!(claims(None).is_none());
}

#[test]
fn invalid_without_exp_claim() {
    let token = fake_jwt(&serde_json::json!({ "sub": "u1" }));
    assert!(!is_valid(Some(&token), NOW_MS));
    assert_eq!(claims(Some(&token)).and_then(|c| c.sub), Some("u1".to_owned()));
}

#[yare::parameterized(
    empty = { "" },
    one_segment = { "abc" },
    two_segments = { "abc.def" },
    four_segments = { "a.b.c.d" },
    bad_base64 = { "a.!!!.c" },
    not_json = { "a.bm90IGpzb24.c" },
    not_an_object = { "a.WzEsMl0.c" },
)]
fn malformed_tokens_are_invalid_without_panicking(token: &str) {
    assert!(!is_valid(Some(token), NOW_MS));
    assert!(decode_claims(token).is_none());
    assert!(expires_within(Some(token), 30, NOW_MS));
}

#[test]
fn non_numeric_exp_is_invalid_but_other_claims_decode() {
    let token = fake_jwt(&serde_json::json!({ "sub": "u1", "exp": "soon" }));
    assert!(!is_valid(Some(&token), NOW_MS));
    assert!(expires_within(Some(&token), 30, NOW_MS));
    let claims = decode_claims(&token);
    assert_eq!(claims.as_ref().and_then(|c| c.sub.as_deref()), Some("u1"));
    assert_eq!(claims.and_then(|c| c.exp), None);
}

#[yare::parameterized(
    fractional_iat = { serde_json::json!({ "iat": 1_700_000_000.5 }) },
    string_email_verified = { serde_json::json!({ "email_verified": "true" }) },
    numeric_sub = { serde_json::json!({ "sub": 42 }) },
    object_name = { serde_json::json!({ "name": { "first": "Jane" } }) },
    roles_not_a_list = { serde_json::json!({ "roles": "ADMIN", "realm_access": true }) },
)]
fn odd_optional_claims_do_not_invalidate(extra: serde_json::Value) {
    let mut payload = serde_json::json!({ "exp": 2_000_000_000u64 });
    if let (Some(map), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        map.extend(extra.clone());
    }
    let token = fake_jwt(&payload);
    assert!(is_valid(Some(&token), NOW_MS));
    assert!(!expires_within(Some(&token), 30, NOW_MS));
}

#[test]
fn lenient_claims_keep_usable_values() -> anyhow::Result<()> {
    let token = fake_jwt(&serde_json::json!({
        "sub": 42,
        "iat": 1_700_000_000.5,
        "exp": NOW_SECS + 60,
        "email_verified": "TRUE",
        "roles": ["ADMIN", 7],
    }));
    let claims = decode_claims(&token).ok_or_else(|| anyhow::anyhow!("no claims"))?;
    assert_eq!(claims.sub.as_deref(), Some("42"));
    assert_eq!(claims.iat, Some(1_700_000_000));
    assert!(claims.email_verified);
    assert_eq!(claims.roles, vec!["ADMIN"]);
    Ok(())
}

#[test]
fn fractional_exp_keeps_millisecond_precision() {
    let token = fake_jwt(&serde_json::json!({ "exp": NOW_SECS as f64 + 0.5 }));
    assert_eq!(decode_claims(&token).and_then(|c| c.expires_at_ms()), Some(NOW_MS + 500));
    assert!(is_valid(Some(&token), NOW_MS + 499));
    assert!(!is_valid(Some(&token), NOW_MS + 500));
}

#[test]
fn padded_payload_is_accepted() {
    let token = token_expiring_at(NOW_SECS + 60);
    let mut parts: Vec<String> = token.split('.').map(str::to_owned).collect();
    parts[1].push_str("==");
    let padded = parts.join(".");
    assert!(is_valid(Some(&padded), NOW_MS));
}

#[test]
fn expires_within_lead_time() {
    let token = token_expiring_at(NOW_SECS + 20);
    assert!(expires_within(Some(&token), 30, NOW_MS));
    assert!(!expires_within(Some(&token), 10, NOW_MS));
    // Boundary: exactly `lead` seconds left counts as expiring.
    assert!(expires_within(Some(&token), 20, NOW_MS));
}

#[test]
fn expires_within_treats_absent_as_expiring() {
    assert!(expires_within(None, 30, NOW_MS));
}

#[test]
fn claims_merge_realm_and_top_level_roles() -> anyhow::Result<()> {
    let token = fake_jwt(&serde_json::json!({
        "sub": "user-1",
        "exp": NOW_SECS + 60,
        "realm_access": { "roles": ["EXECUTOR", "offline_access"] },
        "roles": ["EXECUTOR", "CAB_MANAGER"],
    }));
    let claims = claims(Some(&token)).ok_or_else(|| anyhow::anyhow!("no claims"))?;
    assert_eq!(claims.roles, vec!["EXECUTOR", "offline_access", "CAB_MANAGER"]);
    assert!(claims.has_role("CAB_MANAGER"));
    assert!(!claims.has_role("ADMIN"));
    assert_eq!(claims.expires_at_ms(), Some((NOW_SECS + 60) * 1000));
    Ok(())
}

#[test]
fn profile_picks_highest_priority_role() -> anyhow::Result<()> {
    let token = fake_jwt(&serde_json::json!({
        "sub": "user-1",
        "preferred_username": "jdoe",
        "given_name": "Jane",
        "family_name": "Doe",
        "email": "jane@example.com",
        "email_verified": true,
        "realm_access": { "roles": ["REQUESTER", "CAB_MANAGER", "EXECUTOR"] },
    }));
    let claims = decode_claims(&token).ok_or_else(|| anyhow::anyhow!("no claims"))?;
    let profile = UserProfile::from_claims(&claims);
    assert_eq!(profile.id.as_deref(), Some("user-1"));
    assert_eq!(profile.username, "jdoe");
    assert_eq!(profile.first_name, "Jane");
    assert_eq!(profile.role, "CAB_MANAGER");
    assert!(profile.email_verified);
    assert!(profile.has_any_role(&["ADMIN", "EXECUTOR"]));
    assert!(!profile.is_admin());
    Ok(())
}

#[test]
fn profile_defaults_to_requester() -> anyhow::Result<()> {
    let token = fake_jwt(&serde_json::json!({ "sub": "user-2" }));
    let claims = decode_claims(&token).ok_or_else(|| anyhow::anyhow!("no claims"))?;
    let profile = UserProfile::from_claims(&claims);
    assert_eq!(profile.role, DEFAULT_ROLE);
    assert!(profile.roles.is_empty());
    assert_eq!(profile.username, "");
    Ok(())
}

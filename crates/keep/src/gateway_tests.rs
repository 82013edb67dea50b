// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_support::{Harness, MockIdentity, MockReply, token_expiring_at};
use crate::clock::Clock;
use crate::SessionKeeper;
use futures_util::future::join_all;
use std::time::Duration;

#[tokio::test]
async fn valid_credential_is_attached_as_bearer() -> anyhow::Result<()> {
    let h = Harness::new();
    let token = h.sign_in_for(300)?;

    let resp = h.keeper.gateway.call(ApiRequest::get("/api/rfcs/7")).await?;
    assert_eq!(resp.status, 200);

    let calls = h.transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].authorization.as_deref(), Some(format!("Bearer {token}").as_str()));
    assert!(h.keeper.store.is_empty());
    assert!(h.navigator.navigations().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_credential_queues_and_redirects_without_network() {
    let h = Harness::new();
    h.navigator.set_location("/rfcs/7");

    let err = h.keeper.gateway.call(ApiRequest::get("/api/rfcs/7")).await.err();
    assert_eq!(err.and_then(|e| e.auth_failure()), Some(AuthFailure::NoCredential));

    assert!(h.transport.calls().is_empty());
    let pending = h.keeper.store.pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].target, "/api/rfcs/7");
    assert_eq!(pending[0].method, "GET");
    assert_eq!(h.navigator.navigations(), vec!["/login"]);
    assert_eq!(h.keeper.redirect.consume_return_location().as_deref(), Some("/rfcs/7"));
}

#[tokio::test]
async fn expired_credential_is_caught_locally() -> anyhow::Result<()> {
    let h = Harness::new();
    h.sign_in_expired()?;

    let err = h.keeper.gateway.call(ApiRequest::post("/api/rfcs", "{\"title\":\"x\"}")).await.err();
    assert_eq!(err.and_then(|e| e.auth_failure()), Some(AuthFailure::CredentialExpired));
    assert!(h.transport.calls().is_empty());

    let pending = h.keeper.store.pending();
    assert_eq!(pending[0].body.as_deref(), Some(&b"{\"title\":\"x\"}"[..]));
    assert!(h.keeper.ctx.credentials().load().is_none());
    Ok(())
}

#[tokio::test]
async fn malformed_credential_counts_as_expired() -> anyhow::Result<()> {
    let h = Harness::new();
    h.keeper
        .ctx
        .credentials()
        .store(&crate::credential::StoredCredential::bearer("not-a-token"))?;

    let err = h.keeper.gateway.call(ApiRequest::get("/api/rfcs")).await.err();
    assert_eq!(err.and_then(|e| e.auth_failure()), Some(AuthFailure::CredentialExpired));
    Ok(())
}

#[tokio::test]
async fn server_rejection_queues_and_redirects_regardless_of_body() -> anyhow::Result<()> {
    let h = Harness::new();
    h.sign_in_for(300)?;
    h.transport.push(
        "/api/rfcs/7",
        MockReply::Status(401, bytes::Bytes::from_static(b"{\"error\":\"revoked\"}")),
    );

    let err = h.keeper.gateway.call(ApiRequest::get("/api/rfcs/7")).await.err();
    assert_eq!(err.and_then(|e| e.auth_failure()), Some(AuthFailure::AuthorizationRejected));
    assert_eq!(h.transport.calls().len(), 1);
    assert_eq!(h.keeper.store.len(), 1);
    assert_eq!(h.navigator.navigations(), vec!["/login"]);
    Ok(())
}

#[tokio::test]
async fn non_auth_statuses_pass_through_untouched() -> anyhow::Result<()> {
    for status in [403, 404, 422, 500, 503] {
        let h = Harness::new();
        h.sign_in_for(300)?;
        h.transport.push(
            "/api/rfcs",
            MockReply::Status(status, bytes::Bytes::from_static(b"{\"errors\":[{\"message\":\"nope\"}]}")),
        );

        let resp = h.keeper.gateway.call(ApiRequest::get("/api/rfcs")).await?;
        assert_eq!(resp.status, status);
        assert_eq!(resp.text(), "{\"errors\":[{\"message\":\"nope\"}]}");
        assert!(h.keeper.store.is_empty(), "status {status} should not queue");
        assert!(h.navigator.navigations().is_empty(), "status {status} should not redirect");
    }
    Ok(())
}

#[tokio::test]
async fn transport_errors_pass_through_and_are_not_queued() -> anyhow::Result<()> {
    let h = Harness::new();
    h.sign_in_for(300)?;
    h.transport.push("/api/rfcs", MockReply::Error("timed out".to_owned()));

    match h.keeper.gateway.call(ApiRequest::get("/api/rfcs")).await {
        Err(CallError::Transport(e)) => assert_eq!(e.to_string(), "timed out"),
        other => anyhow::bail!("expected transport error, got {other:?}"),
    }
    assert!(h.keeper.store.is_empty());
    assert!(!h.keeper.redirect.is_redirecting());
    Ok(())
}

#[tokio::test]
async fn public_targets_skip_authorization() -> anyhow::Result<()> {
    let h = Harness::new();
    h.transport.push("/api/user/login", MockReply::Status(401, bytes::Bytes::from_static(b"bad password")));

    // No credential at all, and a 401 back: still handed to the caller.
    let resp = h.keeper.gateway.call(ApiRequest::post("/api/user/login", "{}")).await?;
    assert_eq!(resp.status, 401);
    assert_eq!(h.transport.calls()[0].authorization, None);
    assert!(h.keeper.store.is_empty());
    assert!(h.navigator.navigations().is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_failures_produce_one_redirect() {
    let h = Harness::new();
    h.navigator.set_location("/dashboard");

    let calls = (0..8).map(|i| h.keeper.gateway.call(ApiRequest::get(format!("/api/widgets/{i}"))));
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| matches!(r, Err(e) if e.is_reauth())));
    assert_eq!(h.navigator.navigations(), vec!["/login"]);
    assert_eq!(h.keeper.store.len(), 8);
    assert_eq!(h.keeper.redirect.consume_return_location().as_deref(), Some("/dashboard"));
}

#[tokio::test]
async fn concurrent_rejections_produce_one_redirect() -> anyhow::Result<()> {
    let h = Harness::new();
    h.sign_in_for(300)?;
    for i in 0..5 {
        h.transport.push(&format!("/api/rfcs/{i}"), MockReply::Delayed(Duration::from_millis(10), 401));
    }

    let calls = (0..5).map(|i| h.keeper.gateway.call(ApiRequest::get(format!("/api/rfcs/{i}"))));
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_err()));
    assert_eq!(h.transport.calls().len(), 5);
    assert_eq!(h.navigator.navigations().len(), 1);
    assert_eq!(h.keeper.store.len(), 5);
    Ok(())
}

#[tokio::test]
async fn repeated_failing_render_queues_once() {
    let h = Harness::new();
    for _ in 0..3 {
        let _ = h.keeper.gateway.call(ApiRequest::get("/api/rfcs/stats")).await;
    }
    assert_eq!(h.keeper.store.len(), 1);
}

fn harness_with_identity() -> (Harness, std::sync::Arc<MockIdentity>, SessionKeeper) {
    let h = Harness::new();
    let identity = MockIdentity::new(std::sync::Arc::clone(&h.keeper.ctx));
    let keeper = SessionKeeper::builder(
        std::sync::Arc::clone(&h.keeper.ctx),
        h.transport.clone(),
        h.navigator.clone(),
    )
    .identity(identity.clone())
    .build();
    (h, identity, keeper)
}

#[tokio::test]
async fn expiring_credential_is_refreshed_before_the_call() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    h.sign_in_for(10)?;
    let fresh = token_expiring_at(h.clock.now_secs() + 3600);
    identity.push_ok(Some(fresh.clone()));
    let waiter = keeper.redirect.subscribers().subscribe();

    keeper.gateway.call(ApiRequest::get("/api/rfcs")).await?;

    assert_eq!(identity.calls(), vec![DEFAULT_REFRESH_LEAD_SECS]);
    let calls = h.transport.calls();
    assert_eq!(calls[0].authorization.as_deref(), Some(format!("Bearer {fresh}").as_str()));
    assert_eq!(waiter.await?, Some(fresh));
    Ok(())
}

#[tokio::test]
async fn concurrent_expiring_calls_share_one_refresh() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    h.sign_in_for(10)?;
    let fresh = token_expiring_at(h.clock.now_secs() + 3600);
    identity.set_delay(Duration::from_millis(20));
    identity.push_ok(Some(fresh.clone()));

    let calls = (0..5).map(|i| keeper.gateway.call(ApiRequest::get(format!("/api/rfcs/{i}"))));
    let results = join_all(calls).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(identity.calls().len(), 1);
    let bearer = format!("Bearer {fresh}");
    let sent = h.transport.calls();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|c| c.authorization.as_deref() == Some(bearer.as_str())));
    Ok(())
}

#[tokio::test]
async fn failed_proactive_refresh_uses_current_credential() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    let token = h.sign_in_for(10)?;
    identity.push_err("idp unreachable");

    keeper.gateway.call(ApiRequest::get("/api/rfcs")).await?;
    assert_eq!(h.transport.calls()[0].authorization.as_deref(), Some(format!("Bearer {token}").as_str()));
    assert!(h.navigator.navigations().is_empty());
    Ok(())
}

#[tokio::test]
async fn fresh_credential_is_not_refreshed() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    h.sign_in_for(3600)?;
    keeper.gateway.call(ApiRequest::get("/api/rfcs")).await?;
    assert!(identity.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn refresh_in_place_notifies_on_change() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    h.sign_in_for(10)?;
    let fresh = token_expiring_at(h.clock.now_secs() + 3600);
    identity.push_ok(Some(fresh.clone()));
    let waiter = keeper.redirect.subscribers().subscribe();

    assert!(keeper.gateway.refresh_in_place().await?);
    assert_eq!(waiter.await?, Some(fresh));
    Ok(())
}

#[tokio::test]
async fn refresh_in_place_failure_redirects_when_unusable() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    h.sign_in_expired()?;
    h.navigator.set_location("/rfcs/9");
    identity.push_err("invalid_grant");

    assert!(keeper.gateway.refresh_in_place().await.is_err());
    assert_eq!(h.navigator.navigations(), vec!["/login"]);
    assert_eq!(keeper.redirect.consume_return_location().as_deref(), Some("/rfcs/9"));
    Ok(())
}

#[tokio::test]
async fn refresh_in_place_failure_keeps_still_valid_credential() -> anyhow::Result<()> {
    let (h, identity, keeper) = harness_with_identity();
    h.sign_in_for(20)?;
    identity.push_err("idp unreachable");

    assert!(keeper.gateway.refresh_in_place().await.is_err());
    assert!(h.navigator.navigations().is_empty());
    assert!(keeper.ctx.credential_valid());
    Ok(())
}

#[tokio::test]
async fn refresh_in_place_requires_identity() {
    let h = Harness::new();
    assert!(h.keeper.gateway.refresh_in_place().await.is_err());
}

#[test]
fn requires_auth_uses_allow_list() {
    let h = Harness::new();
    assert!(!h.keeper.gateway.requires_auth("/api/user/login"));
    assert!(!h.keeper.gateway.requires_auth("https://idp.example/user/login?x=1"));
    assert!(h.keeper.gateway.requires_auth("/api/user/me"));
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport for resource endpoints.

use std::future::Future;
use std::pin::Pin;
use std::sync::Once;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method};

use crate::gateway::{ApiResponse, OutgoingRequest, Transport};

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Only the first call has any effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// [`Transport`] over `reqwest`, resolving relative targets against a base URL.
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        ensure_crypto();
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url: base_url.into().trim_end_matches('/').to_owned(), client }
    }

    pub fn url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_owned()
        } else if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }

    async fn execute(&self, request: OutgoingRequest) -> anyhow::Result<ApiResponse> {
        let method = Method::from_bytes(request.method.as_bytes())?;
        let mut builder = self.client.request(method, self.url(&request.target));
        if let Some(value) = request.authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        if let Some(body) = request.body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }

        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_owned(), v.to_owned())))
            .collect();
        let body = resp.bytes().await?;
        Ok(ApiResponse { status, headers, body })
    }
}

impl Transport for HttpTransport {
    fn send(
        &self,
        request: OutgoingRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ApiResponse>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

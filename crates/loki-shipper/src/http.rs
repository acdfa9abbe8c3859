// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push request framing and the client that sends it.

use crate::config::EndpointConfig;
use crate::errors::TransportError;
use async_trait::async_trait;
use core::time::Duration;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::error;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A fully prepared push: target URL, headers and serialized body.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PushRequest {
    pub fn new(endpoint: &EndpointConfig, body: Vec<u8>) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        if let Some(authorization) = endpoint.authorization() {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&authorization)?);
        }

        Ok(PushRequest {
            url: endpoint.url(),
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResponse {
    pub status: StatusCode,
    pub body: String,
}

impl PushResponse {
    /// The push API reports problems in the body, so an empty body is success
    /// whatever the status code.
    pub fn into_result(self) -> Result<StatusCode, TransportError> {
        if self.body.trim().is_empty() {
            Ok(self.status)
        } else {
            Err(TransportError::Rejected {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Sends one push and hands back whatever the server answered.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestPushClient {
    client: reqwest::Client,
}

impl ReqwestPushClient {
    pub fn new(timeout: Duration, https_proxy: Option<&str>) -> Result<Self, TransportError> {
        let client = build_client(https_proxy, timeout)
            .map_err(|e| TransportError::ClientBuild(e.to_string()))?;
        Ok(ReqwestPushClient { client })
    }
}

#[async_trait]
impl PushClient for ReqwestPushClient {
    async fn push(&self, request: PushRequest) -> Result<PushResponse, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .body(request.body)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok(PushResponse { status, body })
    }
}

pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().use_rustls_tls().timeout(timeout);
    if let Some(proxy) = proxy_url {
        match reqwest::Proxy::https(proxy) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => error!("LOKI | Unable to parse proxy configuration: {e}, no proxy will be used"),
        }
    }
    builder.build()
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for endpoint configuration and log delivery.

use reqwest::StatusCode;

/// Reasons an endpoint setting is rejected. Any of these disables shipping for
/// the lifetime of the process.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("endpoint URL is empty")]
    Empty,

    #[error("invalid endpoint URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("endpoint URL has no host")]
    MissingHost,

    #[error("endpoint path must be {expected}, got '{actual}'")]
    InvalidPath {
        expected: &'static str,
        actual: String,
    },
}

/// Failures of a single delivery attempt. These never reach the caller of
/// `send_stdout`/`send_stderr`; they terminate in the log.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{status}: push rejected: {body}")]
    Rejected { status: StatusCode, body: String },
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships the stdout/stderr of a supervised server process to a Loki-compatible
//! push endpoint.
//!
//! ```text
//!   chunk ──> tags::extract_tags ──> payload::build_stream ──> transport (spawned POST)
//!                   │                       │
//!                   └── sanitizer patterns ─┘
//! ```
//!
//! - **[`sanitizer`]**: strips ANSI sequences and tag markers from a line
//! - **[`tags`]**: pulls the first `[script:<name>]` and component tag out of a chunk
//! - **[`payload`]**: labeled stream of `(timestamp, line)` pairs and its JSON form
//! - **[`config`]**: push endpoint parsing and delivery settings
//! - **[`http`]**: the push client seam and its reqwest implementation
//! - **[`transport`]**: fire-and-forget `send_stdout`/`send_stderr`

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod http;
pub mod payload;
pub mod sanitizer;
pub mod tags;
pub mod transport;

pub use config::{EndpointConfig, TransportConfig};
pub use payload::{Payload, Stream, StreamType};
pub use transport::LokiTransport;

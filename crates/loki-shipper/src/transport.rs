// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget shipping of process output chunks.
//!
//! `send_stdout`/`send_stderr` build the payload on the caller's thread, so the
//! timestamp is the time of the call, then spawn the push and return. Nothing
//! that happens during delivery is reported back to the caller: failures end
//! up in the log and the chunk is gone.

use crate::config::{EndpointConfig, TransportConfig};
use crate::errors::TransportError;
use crate::http::{PushClient, PushRequest, PushResponse, ReqwestPushClient};
use crate::payload::{build_payload, Payload, StreamType};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn, Instrument};

#[derive(Clone)]
pub struct LokiTransport {
    // None when no endpoint is configured. Fixed at construction.
    inner: Option<Arc<Shipper>>,
}

struct Shipper {
    endpoint: EndpointConfig,
    client: Arc<dyn PushClient>,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
    tracker: TaskTracker,
}

impl LokiTransport {
    /// A transport that ignores every chunk.
    pub fn disabled() -> Self {
        LokiTransport { inner: None }
    }

    /// Builds a transport backed by reqwest. A client that cannot be built
    /// disables shipping, like a bad endpoint does.
    pub fn new(config: TransportConfig) -> Self {
        if config.endpoint.is_none() {
            debug!("LOKI | No push endpoint configured, log shipping disabled");
            return Self::disabled();
        }
        match ReqwestPushClient::new(config.request_timeout, config.https_proxy.as_deref()) {
            Ok(client) => Self::with_client(config, Arc::new(client)),
            Err(e) => {
                error!("LOKI | {e}, log shipping disabled");
                Self::disabled()
            }
        }
    }

    pub fn with_client(config: TransportConfig, client: Arc<dyn PushClient>) -> Self {
        let Some(endpoint) = config.endpoint else {
            return Self::disabled();
        };

        warn!(
            "LOKI | Shipping server output to {}. This feature is experimental and may change without notice.",
            endpoint.url()
        );
        warn!("LOKI | Log shipping is unsupported and best-effort: lines can be lost, use at your own risk.");

        let max_in_flight = config.max_in_flight.max(1);
        LokiTransport {
            inner: Some(Arc::new(Shipper {
                endpoint,
                client,
                permits: Arc::new(Semaphore::new(max_in_flight)),
                max_in_flight,
                tracker: TaskTracker::new(),
            })),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn send_stdout(&self, chunk: &str) {
        self.send(chunk, StreamType::Log);
    }

    pub fn send_stderr(&self, chunk: &str) {
        self.send(chunk, StreamType::Error);
    }

    pub fn send(&self, chunk: &str, stream_type: StreamType) {
        let Some(shipper) = &self.inner else {
            return;
        };
        if shipper.tracker.is_closed() {
            debug!("LOKI | Transport shut down, dropping {stream_type} chunk");
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            error!("LOKI | No async runtime available, dropping {stream_type} chunk");
            return;
        };
        let Ok(permit) = Arc::clone(&shipper.permits).try_acquire_owned() else {
            warn!(
                "LOKI | {} pushes already in flight, dropping {stream_type} chunk",
                shipper.max_in_flight
            );
            return;
        };

        let payload = build_payload(chunk, stream_type);
        let task_shipper = Arc::clone(shipper);
        shipper.tracker.spawn_on(
            async move {
                task_shipper.deliver(payload).await;
                drop(permit);
            }
            .in_current_span(),
            &runtime,
        );
    }

    /// Pushes currently running.
    pub fn in_flight(&self) -> usize {
        self.inner
            .as_ref()
            .map(|shipper| shipper.tracker.len())
            .unwrap_or(0)
    }

    /// Stops accepting chunks and waits up to `grace` for running pushes.
    /// Returns false if some were still running when the grace ran out.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        let Some(shipper) = &self.inner else {
            return true;
        };
        shipper.tracker.close();
        let drained = tokio::time::timeout(grace, shipper.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                "LOKI | {} pushes still in flight after {} ms, abandoning them",
                shipper.tracker.len(),
                grace.as_millis()
            );
        }
        drained
    }
}

impl std::fmt::Debug for LokiTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(shipper) => f
                .debug_struct("LokiTransport")
                .field("endpoint", &shipper.endpoint)
                .field("max_in_flight", &shipper.max_in_flight)
                .finish(),
            None => write!(f, "LokiTransport(disabled)"),
        }
    }
}

impl Shipper {
    async fn deliver(&self, payload: Payload) {
        let lines = payload.line_count();
        let time = Instant::now();
        match self.push(&payload).await {
            Ok(status) => debug!(
                "LOKI | Pushed {lines} lines in {} ms: {status}",
                time.elapsed().as_millis()
            ),
            Err(e) => error!(
                "LOKI | Failed to push {lines} lines after {} ms: {e}",
                time.elapsed().as_millis()
            ),
        }
    }

    async fn push(&self, payload: &Payload) -> Result<StatusCode, TransportError> {
        let request = PushRequest::new(&self.endpoint, payload.to_json()?)?;
        self.client
            .push(request)
            .await
            .and_then(PushResponse::into_result)
    }
}

// HTTP transport for the comparison backend
//
// The coordinator only depends on the EventStreamTransport trait so tests
// can feed scripted chunks without a network.

use futures_util::future::BoxFuture;
use futures_util::stream::{Stream, StreamExt};
use futures_util::FutureExt;
use reqwest::StatusCode;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::models::{CompareRequest, MetricsSummary};

/// TCP/TLS handshake ceiling; an unreachable backend fails the open
/// instead of hanging until the run ceiling
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Failures at the transport boundary
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(StatusCode),
}

/// Stream of opaque text chunks, arriving at arbitrary boundaries
pub type EventChunkStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Seam between the coordinator and the comparison backend
pub trait EventStreamTransport: Send + Sync + 'static {
    /// Open the long-lived event stream for a comparison run
    fn open_stream(
        &self,
        request: CompareRequest,
    ) -> BoxFuture<'static, Result<EventChunkStream, TransportError>>;

    /// Fetch aggregate historical metrics
    fn fetch_metrics(&self) -> BoxFuture<'static, Result<MetricsSummary, TransportError>>;
}

/// reqwest-backed transport against a comparison server
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to a default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

impl EventStreamTransport for HttpTransport {
    fn open_stream(
        &self,
        request: CompareRequest,
    ) -> BoxFuture<'static, Result<EventChunkStream, TransportError>> {
        let client = self.client.clone();
        let url = self.endpoint("/api/compare");

        async move {
            let response = client
                .post(&url)
                .header("Accept", "text/event-stream")
                .json(&request)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status));
            }

            // Chunk boundaries are arbitrary; the frame decoder reassembles
            // records, so a lossy conversion of a split multi-byte character
            // at worst garbles one frame, which the interpreter drops
            let stream = response.bytes_stream().map(|chunk| {
                chunk
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .map_err(TransportError::from)
            });

            Ok(Box::pin(stream) as EventChunkStream)
        }
        .boxed()
    }

    fn fetch_metrics(&self) -> BoxFuture<'static, Result<MetricsSummary, TransportError>> {
        let client = self.client.clone();
        let url = self.endpoint("/api/compare/summary");

        async move {
            let response = client.get(&url).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status));
            }

            Ok(response.json::<MetricsSummary>().await?)
        }
        .boxed()
    }
}

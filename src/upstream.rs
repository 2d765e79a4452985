//! Upstream client for fetching objects from origin workers

use crate::error::{GatewayError, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("audio-gateway/", env!("CARGO_PKG_VERSION"));

/// Response from an origin worker, body not yet consumed
pub struct UpstreamResponse {
    /// Origin status, passed through unchanged
    pub status: StatusCode,
    /// Origin response headers
    pub headers: HeaderMap,
    /// Incremental body stream
    pub body: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// UpstreamClient issues proxied GET requests to origin workers
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    /// Create a new UpstreamClient
    ///
    /// # Arguments
    /// * `connect_timeout` - Bound on establishing the TCP/TLS connection
    /// * `request_timeout` - Bound on waiting for response headers and on each body read
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                GatewayError::InternalError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(UpstreamClient {
            client,
            request_timeout,
        })
    }

    /// Fetch an object from its worker
    ///
    /// The client's `Range` header is forwarded verbatim when present. Any status
    /// the origin returns, redirects included, is handed back unchanged. Only
    /// network-level failures (refused, DNS, timeout) become `UpstreamUnreachable`.
    ///
    /// # Arguments
    /// * `url` - Upstream URL from the routing decision
    /// * `range` - Raw `Range` header value of the client request, if any
    pub async fn fetch(&self, url: &str, range: Option<&str>) -> Result<UpstreamResponse> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            debug!("Forwarding Range header: {}", range);
            request = request.header(http::header::RANGE, range);
        }

        let response = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| {
                warn!("Upstream timed out after {:?}: {}", self.request_timeout, url);
                GatewayError::UpstreamUnreachable(format!(
                    "timed out after {:?}",
                    self.request_timeout
                ))
            })?
            .map_err(|e| {
                warn!("Upstream request failed for {}: {}", url, e);
                GatewayError::UpstreamUnreachable(e.to_string())
            })?;

        let status = response.status();
        let headers = response.headers().clone();

        info!("Upstream response: {} {}", status.as_u16(), url);

        Ok(UpstreamResponse {
            status,
            headers,
            body: response.bytes_stream().boxed(),
        })
    }
}

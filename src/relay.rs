//! Stream relay from an origin worker to the client
//!
//! [`RelayStream`] forwards upstream chunks as they arrive and, when the
//! response is eligible for admission, keeps a copy of the body. Once the
//! upstream body ends the copy is handed to the cache on a background task.
//!
//! Memory per relay is bounded by the chunk size plus the admission buffer,
//! which is abandoned as soon as it would exceed `max_cacheable_bytes`.

use crate::cache::{AdmitOutcome, ContentCache};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::models::{CacheEntry, CacheKey};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, Stream, StreamExt};
use http::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, ETAG, LAST_MODIFIED,
};
use hyper::body::Frame;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error, info, warn};

/// Content type used when the origin does not send one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Diagnostic header describing the cache decision
pub const X_CACHE: &str = "x-cache";

/// Origin headers relayed to the client and stored with cache entries
const PROPAGATED_HEADERS: [HeaderName; 5] =
    [CONTENT_TYPE, CONTENT_RANGE, CONTENT_LENGTH, ETAG, LAST_MODIFIED];

/// Value of the `X-Cache` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Served from the edge cache
    Hit,
    /// Fetched from the origin
    Miss,
    /// Cache skipped because the request carried `Range`
    Bypass,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

/// Extract the relayed header subset from an origin response
///
/// Headers whose values are not visible ASCII are skipped. A missing
/// `Content-Type` is replaced by `application/octet-stream`.
pub fn propagated_headers(upstream: &HeaderMap) -> Vec<(String, String)> {
    let mut headers = Vec::with_capacity(PROPAGATED_HEADERS.len());

    for name in PROPAGATED_HEADERS.iter() {
        if let Some(value) = upstream.get(name).and_then(|v| v.to_str().ok()) {
            headers.push((name.as_str().to_string(), value.to_string()));
        }
    }

    if headers.iter().all(|(k, _)| k != "content-type") {
        headers.insert(0, ("content-type".to_string(), DEFAULT_CONTENT_TYPE.to_string()));
    }

    headers
}

/// Build the client response headers from a relayed header subset
///
/// Always sets `Accept-Ranges: bytes`, `Cache-Control: public, max-age=<n>`
/// and `X-Cache`.
pub fn response_headers(
    propagated: &[(String, String)],
    client_max_age: u64,
    cache_status: CacheStatus,
) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(propagated.len() + 3);

    for (name, value) in propagated {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!("Dropping unrepresentable header {}", name),
        }
    }

    headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", client_max_age)) {
        headers.insert(CACHE_CONTROL, value);
    }
    headers.insert(
        HeaderName::from_static(X_CACHE),
        HeaderValue::from_static(cache_status.as_str()),
    );

    headers
}

/// Everything needed to offer a completed body to the cache
pub struct Admission {
    cache: Arc<dyn ContentCache>,
    key: CacheKey,
    status: u16,
    headers: Vec<(String, String)>,
    max_cacheable_bytes: usize,
}

impl Admission {
    /// Create an admission ticket for a 200 response to a non-range GET
    ///
    /// # Arguments
    /// * `cache` - Cache receiving the entry
    /// * `key` - Key of the complete object
    /// * `headers` - Relayed header subset stored with the entry
    /// * `max_cacheable_bytes` - Largest body that is kept for admission
    pub fn new(
        cache: Arc<dyn ContentCache>,
        key: CacheKey,
        headers: Vec<(String, String)>,
        max_cacheable_bytes: usize,
    ) -> Self {
        Admission {
            cache,
            key,
            status: 200,
            headers,
            max_cacheable_bytes,
        }
    }

    /// Whether an advertised `Content-Length` already rules admission out
    fn exceeds_limit(&self, content_length: Option<u64>) -> bool {
        matches!(content_length, Some(len) if len > self.max_cacheable_bytes as u64)
    }
}

/// Body stream relaying origin chunks to the client
///
/// Yields hyper frames so it can back an HTTP response body directly.
/// Dropping the stream before the upstream body ends releases the upstream
/// connection and discards the admission buffer.
pub struct RelayStream {
    inner: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
    label: String,
    metrics: Arc<GatewayMetrics>,
    admission: Option<Admission>,
    buffer: BytesMut,
    bytes_relayed: u64,
    finished: bool,
}

impl RelayStream {
    /// Create a relay over an upstream body
    ///
    /// # Arguments
    /// * `inner` - Upstream body stream
    /// * `label` - Identifier used in log lines
    /// * `metrics` - Shared metrics collector
    /// * `admission` - Admission ticket when the response is cache-eligible
    /// * `content_length` - Length advertised by the origin, if any
    pub fn new(
        inner: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
        label: impl Into<String>,
        metrics: Arc<GatewayMetrics>,
        admission: Option<Admission>,
        content_length: Option<u64>,
    ) -> Self {
        let label = label.into();
        let admission = match admission {
            Some(a) if a.exceeds_limit(content_length) => {
                debug!(
                    "Not buffering {}: Content-Length {:?} exceeds {} bytes",
                    label, content_length, a.max_cacheable_bytes
                );
                metrics.record_admission_ignored();
                None
            }
            other => other,
        };

        RelayStream {
            inner,
            label,
            metrics,
            admission,
            buffer: BytesMut::new(),
            bytes_relayed: 0,
            finished: false,
        }
    }

    /// Bytes forwarded to the client so far
    pub fn bytes_relayed(&self) -> u64 {
        self.bytes_relayed
    }

    /// Whether a copy of the body is still being kept for admission
    pub fn is_buffering(&self) -> bool {
        self.admission.is_some()
    }

    fn on_chunk(&mut self, chunk: &Bytes) {
        let len = chunk.len() as u64;
        self.bytes_relayed += len;
        self.metrics.record_bytes_from_origin(len);
        self.metrics.record_bytes_to_client(len);

        if let Some(admission) = &self.admission {
            if self.buffer.len() + chunk.len() > admission.max_cacheable_bytes {
                debug!(
                    "Abandoning admission buffer for {} after {} bytes",
                    self.label, self.bytes_relayed
                );
                self.admission = None;
                self.buffer = BytesMut::new();
                self.metrics.record_admission_ignored();
            } else {
                self.buffer.extend_from_slice(chunk);
            }
        }
    }

    fn on_complete(&mut self) {
        self.finished = true;
        info!("Relay complete: {} ({} bytes)", self.label, self.bytes_relayed);

        if let Some(admission) = self.admission.take() {
            let body = std::mem::take(&mut self.buffer).freeze();
            let entry = CacheEntry::new(admission.status, admission.headers, body);
            spawn_admission(admission.cache, admission.key, entry, self.metrics.clone());
        }
    }

    fn on_error(&mut self, e: reqwest::Error) -> GatewayError {
        self.finished = true;
        self.admission = None;
        self.buffer = BytesMut::new();
        self.metrics.record_interrupted_relay();
        error!(
            "Upstream body failed for {} after {} bytes: {}",
            self.label, self.bytes_relayed, e
        );
        GatewayError::RelayError(e.to_string())
    }
}

impl Stream for RelayStream {
    type Item = std::result::Result<Frame<Bytes>, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(Ok(chunk))) => {
                this.on_chunk(&chunk);
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(this.on_error(e)))),
            Poll::Ready(None) => {
                this.on_complete();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if !self.finished {
            let interrupted = GatewayError::RelayInterrupted {
                bytes: self.bytes_relayed,
            };
            debug!("{} for {}", interrupted, self.label);
            self.metrics.record_interrupted_relay();
        }
    }
}

/// Offer a completed entry to the cache without blocking the response
fn spawn_admission(
    cache: Arc<dyn ContentCache>,
    key: CacheKey,
    entry: CacheEntry,
    metrics: Arc<GatewayMetrics>,
) {
    tokio::spawn(async move {
        let size = entry.body.len();
        match cache.admit(&key, entry).await {
            Ok(AdmitOutcome::Stored) => {
                debug!("Admitted {} ({} bytes)", key, size);
                metrics.record_admission_stored();
            }
            Ok(AdmitOutcome::Ignored) => {
                debug!("Cache declined {} ({} bytes)", key, size);
                metrics.record_admission_ignored();
            }
            Err(e) => {
                warn!("Cache admission failed for {}: {}", key, e);
                metrics.record_admission_failed();
            }
        }
    });
}

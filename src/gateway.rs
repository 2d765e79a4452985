//! Gateway orchestrator
//!
//! Drives a request through the pipeline:
//!
//! ```text
//! Received -> Normalized -> CacheCheck -> Routed -> Fetching -> Relaying -> Done
//! ```
//!
//! `CacheCheck` is skipped for requests carrying `Range`. A cache hit ends the
//! request without contacting the origin. Errors leave the pipeline as JSON
//! `{"message": ...}` responses with the status given by
//! [`GatewayError::to_http_status`].

use crate::cache::{ContentCache, MemoryCache, NoopCache};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::GatewayMetrics;
use crate::models::{CacheEntry, CacheKey};
use crate::normalizer::IdentifierNormalizer;
use crate::relay::{propagated_headers, response_headers, Admission, CacheStatus, RelayStream};
use crate::router::{PlacementRouter, WorkerPool};
use crate::tiered_cache::{L2Config, TieredCache};
use crate::upstream::UpstreamClient;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use http::request::Parts;
use http::{Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Response body produced by the gateway
pub type GatewayBody = UnsyncBoxBody<Bytes, GatewayError>;

/// Pipeline stage reached by a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Normalized,
    CacheCheck,
    Routed,
    Fetching,
    Relaying,
    Done,
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestState::Received => "received",
            RequestState::Normalized => "normalized",
            RequestState::CacheCheck => "cache_check",
            RequestState::Routed => "routed",
            RequestState::Fetching => "fetching",
            RequestState::Relaying => "relaying",
            RequestState::Done => "done",
        };
        f.write_str(name)
    }
}

/// Per-request context carried through the pipeline
#[derive(Debug)]
pub struct RequestContext {
    state: RequestState,
    identifier: Option<String>,
    worker_index: Option<usize>,
    cache_status: Option<CacheStatus>,
}

impl RequestContext {
    pub fn new() -> Self {
        RequestContext {
            state: RequestState::Received,
            identifier: None,
            worker_index: None,
            cache_status: None,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    fn advance(&mut self, state: RequestState) {
        debug!("Request state: {} -> {}", self.state, state);
        self.state = state;
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn worker_index(&self) -> Option<usize> {
        self.worker_index
    }

    pub fn cache_status(&self) -> Option<CacheStatus> {
        self.cache_status
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Audio gateway request handler
///
/// Cheap to share behind an `Arc`; all per-request state lives in
/// [`RequestContext`].
pub struct Gateway {
    normalizer: IdentifierNormalizer,
    router: PlacementRouter,
    upstream: UpstreamClient,
    cache: Arc<dyn ContentCache>,
    metrics: Arc<GatewayMetrics>,
    caching: bool,
    client_max_age: u64,
    max_cacheable_bytes: usize,
}

impl Gateway {
    /// Create a gateway with an explicit cache implementation
    pub fn new(config: &GatewayConfig, cache: Arc<dyn ContentCache>) -> Result<Self> {
        let pool = WorkerPool::new(config.workers.iter().cloned())?;
        let metrics = Arc::new(GatewayMetrics::new(pool.len()));
        let upstream = UpstreamClient::new(config.connect_timeout(), config.request_timeout())?;

        Ok(Gateway {
            normalizer: IdentifierNormalizer::new(config.path_prefix.clone()),
            router: PlacementRouter::new(pool),
            upstream,
            cache,
            metrics,
            caching: config.enable_cache,
            client_max_age: config.client_max_age,
            max_cacheable_bytes: config.max_cacheable_bytes,
        })
    }

    /// Create a gateway with the cache described by the configuration
    ///
    /// - `enable_cache: false` -> [`NoopCache`]
    /// - `enable_l2_cache: true` -> [`TieredCache`] (memory + disk)
    /// - otherwise -> [`MemoryCache`]
    pub async fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;

        let cache: Arc<dyn ContentCache> = if !config.enable_cache {
            info!("Edge cache disabled");
            Arc::new(NoopCache)
        } else if config.enable_l2_cache {
            let l2 = L2Config {
                base_path: PathBuf::from(&config.l2_cache_dir),
                max_size_bytes: config.l2_max_size_bytes,
                sweep_interval: config.l2_sweep_interval(),
            };
            Arc::new(
                TieredCache::with_l2_config(config.cache_ttl(), config.l1_cache_size_bytes, l2)
                    .await?,
            )
        } else {
            info!(
                "Memory cache: {}MB, ttl={}s",
                config.l1_cache_size_bytes / 1024 / 1024,
                config.cache_ttl
            );
            Arc::new(MemoryCache::new(
                config.cache_ttl(),
                config.l1_cache_size_bytes,
            ))
        };

        Self::new(config, cache)
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn cache(&self) -> &Arc<dyn ContentCache> {
        &self.cache
    }

    pub fn router(&self) -> &PlacementRouter {
        &self.router
    }

    /// Handle a client request
    ///
    /// Never fails: gateway errors are rendered as JSON responses.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<GatewayBody> {
        let start = Instant::now();
        self.metrics.record_request();

        // The inbound body is never read
        let (parts, _) = req.into_parts();

        let mut ctx = RequestContext::new();
        let response = match self.process(&parts, &mut ctx).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_severe() {
                    error!(
                        "Request failed in state {}: {} {}: {}",
                        ctx.state(),
                        parts.method,
                        parts.uri,
                        e
                    );
                } else {
                    self.metrics.record_bad_request();
                    debug!("Rejected {} {}: {}", parts.method, parts.uri, e);
                }
                error_response(&e)
            }
        };

        self.metrics.record_request_duration(start.elapsed());
        info!(
            "{} {} -> {} (id={}, worker={:?}, cache={}, {:?})",
            parts.method,
            parts.uri,
            response.status().as_u16(),
            ctx.identifier().unwrap_or("-"),
            ctx.worker_index(),
            ctx.cache_status().map(|s| s.as_str()).unwrap_or("-"),
            start.elapsed()
        );

        response
    }

    async fn process(
        &self,
        parts: &Parts,
        ctx: &mut RequestContext,
    ) -> Result<Response<GatewayBody>> {
        let head_only = match parts.method {
            Method::GET => false,
            Method::HEAD => true,
            ref other => return Err(GatewayError::MethodNotAllowed(other.to_string())),
        };

        let id = self.normalizer.normalize(&parts.uri)?;
        ctx.identifier = Some(id.decoded().to_string());
        ctx.advance(RequestState::Normalized);

        let range = parts
            .headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let key = CacheKey::for_identifier(&id);

        let cache_status = if range.is_some() {
            debug!("Range request for {}, bypassing cache", id);
            self.metrics.record_cache_bypass();
            CacheStatus::Bypass
        } else {
            ctx.advance(RequestState::CacheCheck);
            match self.cache.lookup(&key).await {
                Ok(Some(entry)) => {
                    self.metrics.record_cache_hit();
                    ctx.cache_status = Some(CacheStatus::Hit);
                    ctx.advance(RequestState::Done);
                    return Ok(self.cached_response(entry, head_only));
                }
                Ok(None) => {
                    self.metrics.record_cache_miss();
                    CacheStatus::Miss
                }
                Err(e) if e.is_degradable() => {
                    warn!("Cache lookup failed for {}, treating as miss: {}", key, e);
                    self.metrics.record_cache_error();
                    self.metrics.record_cache_miss();
                    CacheStatus::Miss
                }
                Err(e) => return Err(e),
            }
        };
        ctx.cache_status = Some(cache_status);

        let decision = self.router.route(&id);
        ctx.worker_index = Some(decision.worker_index);
        ctx.advance(RequestState::Routed);

        ctx.advance(RequestState::Fetching);
        let upstream = match self
            .upstream
            .fetch(&decision.upstream_url, range.as_deref())
            .await
        {
            Ok(upstream) => {
                self.metrics
                    .record_upstream_request(decision.worker_index, true);
                upstream
            }
            Err(e) => {
                self.metrics
                    .record_upstream_request(decision.worker_index, false);
                return Err(e);
            }
        };

        ctx.advance(RequestState::Relaying);
        let propagated = propagated_headers(&upstream.headers);
        let headers = response_headers(&propagated, self.client_max_age, cache_status);

        let body = if head_only {
            // Dropping the stream releases the upstream connection
            drop(upstream.body);
            empty_body()
        } else {
            let admission = if self.caching && upstream.status == StatusCode::OK && range.is_none()
            {
                Some(Admission::new(
                    self.cache.clone(),
                    key,
                    propagated,
                    self.max_cacheable_bytes,
                ))
            } else {
                debug!(
                    "Not admitting {}: status={} range={}",
                    id,
                    upstream.status.as_u16(),
                    range.is_some()
                );
                None
            };

            let content_length = upstream
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            let relay = RelayStream::new(
                upstream.body,
                id.to_string(),
                self.metrics.clone(),
                admission,
                content_length,
            );
            StreamBody::new(relay).boxed_unsync()
        };

        let mut response = Response::new(body);
        *response.status_mut() = upstream.status;
        *response.headers_mut() = headers;

        ctx.advance(RequestState::Done);
        Ok(response)
    }

    fn cached_response(&self, entry: CacheEntry, head_only: bool) -> Response<GatewayBody> {
        let headers = response_headers(&entry.headers, self.client_max_age, CacheStatus::Hit);
        let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);

        let body = if head_only {
            empty_body()
        } else {
            self.metrics.record_bytes_from_cache(entry.body.len() as u64);
            self.metrics.record_bytes_to_client(entry.body.len() as u64);
            full_body(entry.body)
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }
}

pub(crate) fn full_body(bytes: Bytes) -> GatewayBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

pub(crate) fn empty_body() -> GatewayBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Render a gateway error as `{"message": ...}`
pub fn error_response(err: &GatewayError) -> Response<GatewayBody> {
    json_response(
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        serde_json::json!({ "message": err.client_message() }),
    )
}

pub(crate) fn json_response(status: StatusCode, value: serde_json::Value) -> Response<GatewayBody> {
    let mut response = Response::new(full_body(Bytes::from(value.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

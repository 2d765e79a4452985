//! Metrics HTTP Endpoint
//!
//! Exposes gateway metrics in Prometheus text format. The same rendering backs
//! `/metrics` on the main listener; this endpoint runs it on a separate,
//! usually private, address.

use crate::cache::{CacheStats, ContentCache};
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<GatewayMetrics>,
    cache: Arc<dyn ContentCache>,
    addr: SocketAddr,
}

impl MetricsEndpoint {
    /// Create a new metrics endpoint
    ///
    /// # Arguments
    /// * `metrics` - Shared metrics collector
    /// * `cache` - Cache whose statistics are exported alongside
    /// * `addr` - Address to bind the HTTP server to
    pub fn new(
        metrics: Arc<GatewayMetrics>,
        cache: Arc<dyn ContentCache>,
        addr: SocketAddr,
    ) -> Self {
        Self {
            metrics,
            cache,
            addr,
        }
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Metrics endpoint listening on http://{}/metrics", self.addr);
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Metrics connection from {}", peer);
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);
            let cache = Arc::clone(&self.cache);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    let cache = Arc::clone(&cache);
                    async move { handle_request(req, metrics, cache) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<GatewayMetrics>,
    cache: Arc<dyn ContentCache>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            PROMETHEUS_CONTENT_TYPE,
            format_prometheus_metrics(&metrics.get_stats(), &cache.stats()),
        ),
        "/health" => text_response(
            StatusCode::OK,
            "application/json",
            r#"{"status":"healthy"}"#.to_string(),
        ),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string()),
    };
    Ok(response)
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn write_metric(
    out: &mut String,
    name: &str,
    kind: &str,
    help: &str,
    value: impl std::fmt::Display,
) {
    let _ = writeln!(out, "# HELP audio_gateway_{} {}", name, help);
    let _ = writeln!(out, "# TYPE audio_gateway_{} {}", name, kind);
    let _ = writeln!(out, "audio_gateway_{} {}", name, value);
    out.push('\n');
}

/// Format metrics in Prometheus exposition format
///
/// Each metric carries a HELP and a TYPE line. Per-worker counts use a
/// `worker` label holding the pool index.
pub fn format_prometheus_metrics(snapshot: &MetricsSnapshot, cache: &CacheStats) -> String {
    let mut output = String::new();

    let counters = [
        ("requests_total", "Total number of requests received", snapshot.total_requests),
        ("bad_requests_total", "Requests rejected before routing", snapshot.bad_requests),
        ("cache_hits_total", "Requests served from the edge cache", snapshot.cache_hits),
        ("cache_misses_total", "Cache lookups that found nothing", snapshot.cache_misses),
        (
            "cache_bypasses_total",
            "Range requests that skipped the cache",
            snapshot.cache_bypasses,
        ),
        (
            "cache_errors_total",
            "Cache lookups that failed and degraded to a miss",
            snapshot.cache_errors,
        ),
        (
            "admissions_stored_total",
            "Responses stored in the cache",
            snapshot.admissions_stored,
        ),
        (
            "admissions_ignored_total",
            "Eligible responses the cache declined or that grew too large",
            snapshot.admissions_ignored,
        ),
        (
            "admissions_failed_total",
            "Admissions that returned an error",
            snapshot.admissions_failed,
        ),
        (
            "upstream_requests_total",
            "Fetches sent to origin workers",
            snapshot.upstream_requests,
        ),
        (
            "upstream_failures_total",
            "Fetches that could not reach a worker",
            snapshot.upstream_failures,
        ),
        (
            "interrupted_relays_total",
            "Relays that ended before the body completed",
            snapshot.interrupted_relays,
        ),
        (
            "bytes_from_origin_total",
            "Bytes received from origin workers",
            snapshot.bytes_from_origin,
        ),
        (
            "bytes_from_cache_total",
            "Bytes served from the cache",
            snapshot.bytes_from_cache,
        ),
        ("bytes_to_client_total", "Bytes sent to clients", snapshot.bytes_to_client),
    ];
    for (name, help, value) in counters {
        write_metric(&mut output, name, "counter", help, value);
    }

    let gauges = [
        (
            "request_duration_ms_avg",
            "Average time to response headers in milliseconds",
            format!("{:.2}", snapshot.avg_request_duration_ms()),
        ),
        (
            "cache_hit_rate",
            "Cache hit rate percentage",
            format!("{:.2}", snapshot.cache_hit_rate()),
        ),
        (
            "upstream_failure_rate",
            "Upstream failure rate percentage",
            format!("{:.2}", snapshot.upstream_failure_rate()),
        ),
        (
            "cache_entries",
            "Objects currently held in memory",
            cache.total_entries.to_string(),
        ),
        (
            "cache_bytes",
            "Bytes currently held in memory",
            cache.total_bytes.to_string(),
        ),
    ];
    for (name, help, value) in gauges {
        write_metric(&mut output, name, "gauge", help, value);
    }

    output.push_str("# HELP audio_gateway_worker_requests_total Fetches sent to each worker\n");
    output.push_str("# TYPE audio_gateway_worker_requests_total counter\n");
    for (index, count) in snapshot.worker_requests.iter().enumerate() {
        let _ = writeln!(
            output,
            "audio_gateway_worker_requests_total{{worker=\"{}\"}} {}",
            index, count
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = GatewayMetrics::new(2);

        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_bypass();
        metrics.record_upstream_request(1, true);
        metrics.record_bytes_from_origin(1000);

        let cache = CacheStats {
            total_entries: 3,
            total_bytes: 4096,
            hits: 1,
            misses: 1,
        };
        let output = format_prometheus_metrics(&metrics.get_stats(), &cache);

        assert!(output.contains("audio_gateway_requests_total 2"));
        assert!(output.contains("audio_gateway_cache_hits_total 1"));
        assert!(output.contains("audio_gateway_cache_bypasses_total 1"));
        assert!(output.contains("audio_gateway_cache_hit_rate 50.00"));
        assert!(output.contains("audio_gateway_cache_entries 3"));
        assert!(output.contains("audio_gateway_bytes_from_origin_total 1000"));
        assert!(output.contains("audio_gateway_worker_requests_total{worker=\"0\"} 0"));
        assert!(output.contains("audio_gateway_worker_requests_total{worker=\"1\"} 1"));

        assert!(output.contains("# HELP audio_gateway_requests_total"));
        assert!(output.contains("# TYPE audio_gateway_requests_total counter"));
        assert!(output.contains("# TYPE audio_gateway_cache_hit_rate gauge"));
    }

    #[test]
    fn test_format_prometheus_metrics_empty() {
        let metrics = GatewayMetrics::new(1);
        let output = format_prometheus_metrics(&metrics.get_stats(), &NoopCache.stats());

        assert!(output.contains("audio_gateway_requests_total 0"));
        assert!(output.contains("audio_gateway_cache_hit_rate 0.00"));
        assert!(output.contains("audio_gateway_cache_entries 0"));
    }

    #[test]
    fn test_text_response() {
        let response =
            text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found".to_string());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    }

    #[tokio::test]
    async fn test_endpoint_serves_metrics() {
        let metrics = Arc::new(GatewayMetrics::new(1));
        metrics.record_request();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let endpoint = MetricsEndpoint::new(metrics, Arc::new(NoopCache), addr);
        let server = tokio::spawn(endpoint.serve(listener));

        let response = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            response.headers()["content-type"],
            PROMETHEUS_CONTENT_TYPE
        );
        let body = response.text().await.unwrap();
        assert!(body.contains("audio_gateway_requests_total 1"));

        let response = reqwest::get(format!("http://{}/nope", addr)).await.unwrap();
        assert_eq!(response.status(), 404);

        server.abort();
    }
}

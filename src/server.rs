//! HTTP listener for the gateway
//!
//! One task per connection (hyper http1). `/health` and `/metrics` are
//! answered locally; every other request goes to the [`Gateway`].

use crate::cache::ContentCache;
use crate::gateway::{full_body, json_response, Gateway, GatewayBody};
use crate::metrics_endpoint::{format_prometheus_metrics, PROMETHEUS_CONTENT_TYPE};
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Gateway HTTP server
pub struct GatewayServer {
    gateway: Arc<Gateway>,
}

impl GatewayServer {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        GatewayServer { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Accept connections on `listener` until the task is dropped
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        info!("Gateway listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let gateway = Arc::clone(&self.gateway);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let gateway = Arc::clone(&gateway);
                    async move { Ok::<_, Infallible>(route(&gateway, req).await) }
                });

                // Client disconnects surface here and are routine for media streaming
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection from {} ended: {:?}", peer, err);
                }
            });
        }
    }
}

async fn route<B>(gateway: &Gateway, req: Request<B>) -> Response<GatewayBody> {
    if *req.method() == Method::GET {
        match req.uri().path() {
            "/health" => {
                return json_response(StatusCode::OK, serde_json::json!({"status": "healthy"}))
            }
            "/metrics" => return metrics_response(gateway),
            _ => {}
        }
    }

    gateway.handle(req).await
}

fn metrics_response(gateway: &Gateway) -> Response<GatewayBody> {
    let body = format_prometheus_metrics(&gateway.metrics().get_stats(), &gateway.cache().stats());
    let mut response = Response::new(full_body(Bytes::from(body)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE));
    response
}

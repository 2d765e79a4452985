//! Audio Gateway
//!
//! A stateless content gateway in front of a pool of origin workers that store
//! audio objects. For each request it picks the worker that owns the object,
//! relays the request (including `Range`) to it, streams the response back and
//! keeps complete responses in an edge cache.
//!
//! # Architecture
//!
//! - [`IdentifierNormalizer`]: extracts and canonicalizes the content identifier
//! - [`PlacementRouter`]: maps an identifier to a worker with a stable hash
//! - [`UpstreamClient`]: issues the proxied GET to the worker
//! - [`ContentCache`]: edge cache ([`MemoryCache`], [`TieredCache`], [`NoopCache`])
//! - [`RelayStream`]: streams the origin body to the client and feeds admission
//! - [`Gateway`]: orchestrates the above for one request
//! - [`GatewayServer`]: hyper listener with `/health` and `/metrics`
//! - [`GatewayMetrics`]: runtime counters, exported by [`MetricsEndpoint`]
//!
//! # Configuration
//!
//! ```yaml
//! listen_address: "0.0.0.0:8080"
//! workers:
//!   - "https://worker-0.example.com"
//!   - "https://worker-1.example.com"
//! path_prefix: "/api"
//! enable_cache: true
//! cache_ttl: 950400        # 11 days
//! client_max_age: 864000   # 10 days
//! ```
//!
//! Worker order is part of the placement function; see [`GatewayConfig`].
//!
//! # Example
//!
//! ```rust,no_run
//! use audio_gateway::{Gateway, GatewayConfig, GatewayServer};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_file("audio_gateway.yaml")?;
//! let gateway = Arc::new(Gateway::from_config(&config).await?);
//!
//! let listener = tokio::net::TcpListener::bind(&config.listen_address).await?;
//! GatewayServer::new(gateway).serve(listener).await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod normalizer;
pub mod relay;
pub mod router;
pub mod server;
pub mod tiered_cache;
pub mod upstream;

// Re-export commonly used types
pub use cache::{AdmitOutcome, CacheStats, ContentCache, MemoryCache, NoopCache};
pub use config::{GatewayConfig, MetricsEndpointConfig};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayBody, RequestContext, RequestState};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use metrics_endpoint::MetricsEndpoint;
pub use models::{CacheEntry, CacheKey, CanonicalId, RoutingDecision};
pub use normalizer::{canonicalize, IdentifierNormalizer};
pub use relay::{CacheStatus, RelayStream};
pub use router::{PlacementRouter, WorkerPool};
pub use server::GatewayServer;
pub use tiered_cache::{L2Config, TieredCache, TieredCacheStats};
pub use upstream::{UpstreamClient, UpstreamResponse};

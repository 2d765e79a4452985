//! End-to-end gateway scenarios against mocked origin workers
//!
//! Each test drives `Gateway::handle` directly with wiremock servers standing in
//! for the worker pool.

use audio_gateway::{
    canonicalize, CacheEntry, CacheKey, ContentCache, Gateway, GatewayBody, GatewayConfig,
    MemoryCache,
};
use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn audio_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn gateway_for(workers: &[String], cache: Arc<MemoryCache>) -> Gateway {
    let config = GatewayConfig::with_workers(workers.iter().cloned());
    Gateway::new(&config, cache).unwrap()
}

fn memory_cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new(Duration::from_secs(3600), 16 * 1024 * 1024))
}

async fn body_bytes(response: Response<GatewayBody>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

/// Admission runs on a background task; poll until it lands
async fn wait_for_entry(cache: &MemoryCache, key: &CacheKey) -> Option<CacheEntry> {
    for _ in 0..100 {
        if let Some(entry) = cache.lookup(key).await.unwrap() {
            return Some(entry);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    None
}

#[tokio::test]
async fn test_scenario_a_full_fetch_is_routed_and_admitted() {
    let workers = vec![
        MockServer::start().await,
        MockServer::start().await,
        MockServer::start().await,
    ];
    let uris: Vec<String> = workers.iter().map(|w| w.uri()).collect();
    let cache = memory_cache();
    let gateway = gateway_for(&uris, cache.clone());

    let id = canonicalize("track%201.mp3");
    assert_eq!(id.decoded(), "track 1.mp3");
    assert_eq!(id.encoded(), "track%201.mp3");

    let owner = gateway.router().worker_index(&id);
    let body = audio_bytes(2000);

    Mock::given(method("GET"))
        .and(path("/track%201.mp3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .insert_header("ETag", "\"v1\"")
                .set_body_bytes(body.clone()),
        )
        .expect(1)
        .mount(&workers[owner])
        .await;

    let request = Request::get("/api/track%201.mp3").body(()).unwrap();
    let response = gateway.handle(request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["accept-ranges"], "bytes");
    assert_eq!(response.headers()["cache-control"], "public, max-age=864000");
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert_eq!(response.headers()["etag"], "\"v1\"");
    assert_eq!(response.headers()["x-cache"], "MISS");
    assert_eq!(body_bytes(response).await.as_ref(), body.as_slice());

    let entry = wait_for_entry(&cache, &CacheKey::for_identifier(&id))
        .await
        .expect("full response admitted under the canonical key");
    assert_eq!(entry.status, 200);
    assert_eq!(entry.body.as_ref(), body.as_slice());

    for (index, worker) in workers.iter().enumerate() {
        let received = worker.received_requests().await.unwrap();
        let expected = if index == owner { 1 } else { 0 };
        assert_eq!(received.len(), expected, "worker {} request count", index);
    }

    let stats = gateway.metrics().get_stats();
    assert_eq!(stats.worker_requests[owner], 1);
    assert_eq!(stats.cache_misses, 1);
}

#[tokio::test]
async fn test_scenario_b_second_request_is_served_from_cache() {
    let worker = MockServer::start().await;
    let cache = memory_cache();
    let gateway = gateway_for(&[worker.uri()], cache.clone());
    let body = audio_bytes(1500);

    Mock::given(method("GET"))
        .and(path("/track%201.mp3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .set_body_bytes(body.clone()),
        )
        .expect(1)
        .mount(&worker)
        .await;

    let first = gateway
        .handle(Request::get("/api/track%201.mp3").body(()).unwrap())
        .await;
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = body_bytes(first).await;

    let key = CacheKey::for_identifier(&canonicalize("track 1.mp3"));
    wait_for_entry(&cache, &key).await.expect("entry admitted");

    let second = gateway
        .handle(Request::get("/api/track%201.mp3").body(()).unwrap())
        .await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-cache"], "HIT");
    assert_eq!(second.headers()["content-type"], "audio/mpeg");
    assert_eq!(second.headers()["accept-ranges"], "bytes");
    assert_eq!(body_bytes(second).await, first_body);

    worker.verify().await;
    assert_eq!(gateway.metrics().get_stats().cache_hits, 1);
}

#[tokio::test]
async fn test_scenario_c_range_request_bypasses_cache() {
    let worker = MockServer::start().await;
    let cache = memory_cache();
    let gateway = gateway_for(&[worker.uri()], cache.clone());

    Mock::given(method("GET"))
        .and(path("/track1.mp3"))
        .and(header("range", "bytes=100-199"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Type", "audio/mpeg")
                .insert_header("Content-Range", "bytes 100-199/2000")
                .set_body_bytes(audio_bytes(100)),
        )
        .expect(1)
        .mount(&worker)
        .await;

    let request = Request::get("/api/track1.mp3")
        .header("Range", "bytes=100-199")
        .body(())
        .unwrap();
    let response = gateway.handle(request).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 100-199/2000");
    assert_eq!(response.headers()["x-cache"], "BYPASS");
    assert_eq!(body_bytes(response).await.len(), 100);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let key = CacheKey::for_identifier(&canonicalize("track1.mp3"));
    assert!(cache.lookup(&key).await.unwrap().is_none());
    assert_eq!(cache.stats().total_entries, 0);
}

#[tokio::test]
async fn test_range_request_never_hits_existing_entry() {
    let worker = MockServer::start().await;
    let cache = memory_cache();
    let gateway = gateway_for(&[worker.uri()], cache.clone());

    // A full object is already cached for this identifier
    let key = CacheKey::for_identifier(&canonicalize("track1.mp3"));
    cache
        .admit(
            &key,
            CacheEntry::new(200, Vec::new(), Bytes::from(audio_bytes(2000))),
        )
        .await
        .unwrap();

    Mock::given(method("GET"))
        .and(path("/track1.mp3"))
        .and(header("range", "bytes=0-9"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 0-9/2000")
                .set_body_bytes(audio_bytes(10)),
        )
        .expect(1)
        .mount(&worker)
        .await;

    let request = Request::get("/api/track1.mp3")
        .header("Range", "bytes=0-9")
        .body(())
        .unwrap();
    let response = gateway.handle(request).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["x-cache"], "BYPASS");
    assert_eq!(body_bytes(response).await.len(), 10);

    worker.verify().await;
    assert_eq!(gateway.metrics().get_stats().cache_hits, 0);
}

#[tokio::test]
async fn test_scenario_d_missing_identifier() {
    let worker = MockServer::start().await;
    let gateway = gateway_for(&[worker.uri()], memory_cache());

    let response = gateway
        .handle(Request::get("/api/").body(()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["message"], "Missing audio ID");

    assert!(worker.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scenario_e_unreachable_worker() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = gateway_for(&[format!("http://{}", addr)], memory_cache());
    let response = gateway
        .handle(Request::get("/api/track1.mp3").body(()).unwrap())
        .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.headers()["content-type"], "application/json");
    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, serde_json::json!({"message": "Proxy fetch failed"}));
}

#[tokio::test]
async fn test_query_id_takes_priority_over_path() {
    let worker = MockServer::start().await;
    let gateway = gateway_for(&[worker.uri()], memory_cache());

    Mock::given(method("GET"))
        .and(path("/track%201.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(audio_bytes(10)))
        .expect(1)
        .mount(&worker)
        .await;

    let response = gateway
        .handle(
            Request::get("/api/other.mp3?id=track+1.mp3")
                .body(())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/octet-stream");
    body_bytes(response).await;

    worker.verify().await;
}

#[tokio::test]
async fn test_origin_error_status_passed_through_and_not_cached() {
    let worker = MockServer::start().await;
    let cache = memory_cache();
    let gateway = gateway_for(&[worker.uri()], cache.clone());

    Mock::given(method("GET"))
        .and(path("/gone.mp3"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .expect(1)
        .mount(&worker)
        .await;

    let response = gateway
        .handle(Request::get("/api/gone.mp3").body(()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await.as_ref(), b"not here");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.stats().total_entries, 0);
}

#[tokio::test]
async fn test_head_is_relayed_but_not_admitted() {
    let worker = MockServer::start().await;
    let cache = memory_cache();
    let gateway = gateway_for(&[worker.uri()], cache.clone());

    Mock::given(method("GET"))
        .and(path("/a.mp3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "audio/mpeg")
                .set_body_bytes(audio_bytes(64)),
        )
        .expect(1)
        .mount(&worker)
        .await;

    let response = gateway
        .handle(Request::head("/api/a.mp3").body(()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "audio/mpeg");
    assert!(body_bytes(response).await.is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.stats().total_entries, 0);
}

#[tokio::test]
async fn test_abandoned_response_is_not_admitted() {
    let worker = MockServer::start().await;
    let cache = memory_cache();
    let gateway = gateway_for(&[worker.uri()], cache.clone());

    Mock::given(method("GET"))
        .and(path("/a.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(audio_bytes(4096)))
        .mount(&worker)
        .await;

    let response = gateway
        .handle(Request::get("/api/a.mp3").body(()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    // Client goes away before reading the body
    drop(response);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(cache.stats().total_entries, 0);
    assert_eq!(gateway.metrics().get_stats().interrupted_relays, 1);
}

#[tokio::test]
async fn test_slow_worker_times_out_with_502() {
    let worker = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow.mp3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(audio_bytes(10))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&worker)
        .await;

    let mut config = GatewayConfig::with_workers([worker.uri()]);
    config.request_timeout_ms = 200;
    let gateway = Gateway::new(&config, memory_cache()).unwrap();

    let response = gateway
        .handle(Request::get("/api/slow.mp3").body(()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

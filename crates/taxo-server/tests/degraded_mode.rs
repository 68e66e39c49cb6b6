//! Behavior with an unreachable Redis: fail open when degrading gracefully,
//! refuse to start otherwise.

mod common;

use std::time::{Duration, Instant};

use common::{CountingStore, app, create_tag, header, start_server, tag, test_config};
use serde_json::Value;
use taxo_server::{AppConfig, create_cache_backend};

fn unreachable_redis(degrade_gracefully: bool) -> AppConfig {
    let mut cfg = test_config();
    cfg.redis.enabled = true;
    // Nothing listens on port 1
    cfg.redis.url = "redis://127.0.0.1:1".to_string();
    cfg.redis.timeout_ms = 200;
    cfg.cache.op_timeout_ms = 100;
    cfg.cache.degrade_gracefully = degrade_gracefully;
    cfg.rate_limit.general.max = 1;
    cfg
}

#[tokio::test]
async fn strict_mode_refuses_to_start() {
    let cfg = unreachable_redis(false);
    let result = create_cache_backend(&cfg.redis, &cfg.cache).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn graceful_mode_serves_uncached_and_unlimited() {
    let cfg = unreachable_redis(true);
    let backend = create_cache_backend(&cfg.redis, &cfg.cache)
        .await
        .expect("graceful mode keeps the pool");
    assert_eq!(backend.mode(), "redis");

    let store = CountingStore::new();
    let (base, shutdown, _handle) = start_server(app(cfg, store.clone(), backend)).await;
    let client = reqwest::Client::new();
    create_tag(&client, &base, &tag("Berlin", "geography-timing")).await;

    let url = format!("{base}/api/v1/tags/berlin");
    for _ in 0..3 {
        let started = Instant::now();
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(header(&res, "cache-status"), Some("MISS"));
        // Counting failed, so no quota is reported or enforced
        assert_eq!(header(&res, "ratelimit-remaining"), None);
        assert!(started.elapsed() < Duration::from_secs(2));
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["data"]["tag"]["slug"], "berlin");
    }
    assert_eq!(store.reads(), 3);

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let _ = shutdown.send(());
}

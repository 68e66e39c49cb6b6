//! Fixed-window quotas over HTTP: headers, rejection, window reset, the
//! strict auth limiter and role exemptions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::post;
use common::{app, app_with_auth, header, start_server, test_config, with_roles};
use serde_json::{Value, json};
use taxo_server::CacheBackend;
use taxo_storage::InMemoryStore;

fn limited_config(window_secs: u64, max: u64) -> taxo_server::AppConfig {
    let mut cfg = test_config();
    cfg.rate_limit.general.window_secs = window_secs;
    cfg.rate_limit.general.max = max;
    cfg
}

#[tokio::test]
async fn quota_is_enforced_per_window() {
    let (base, shutdown, _handle) = start_server(app(
        limited_config(1, 5),
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
    ))
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/tags");

    for expected in (0..5).rev() {
        let res = client.get(&url).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(header(&res, "ratelimit-limit"), Some("5"));
        assert_eq!(
            header(&res, "ratelimit-remaining"),
            Some(expected.to_string().as_str())
        );
    }

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 429);
    assert_eq!(header(&res, "ratelimit-remaining"), Some("0"));
    assert!(header(&res, "retry-after").is_some());
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Too many requests, please try again later.");
    assert!(body["retryAfter"].as_str().is_some_and(|s| !s.is_empty()));

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(header(&res, "ratelimit-remaining"), Some("4"));

    let _ = shutdown.send(());
}

#[tokio::test]
async fn callers_are_counted_separately() {
    let (base, shutdown, _handle) = start_server(app(
        limited_config(60, 1),
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
    ))
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/categories");

    let send = |key: &'static str| client.get(&url).header("x-api-key", key).send();
    assert_eq!(send("alpha").await.unwrap().status(), 200);
    assert_eq!(send("alpha").await.unwrap().status(), 429);
    assert_eq!(send("beta").await.unwrap().status(), 200);

    let forwarded = client
        .get(&url)
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .send()
        .await
        .unwrap();
    assert_eq!(forwarded.status(), 200);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn spoofed_forwarded_hops_share_the_proxy_hop_quota() {
    let mut cfg = limited_config(60, 2);
    cfg.server.trust_proxy = true;
    let (base, shutdown, _handle) = start_server(app(
        cfg,
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
    ))
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/categories");

    let mut statuses = Vec::new();
    for i in 0..10 {
        let res = client
            .get(&url)
            .header("x-forwarded-for", format!("1.2.3.{i}, 203.0.113.7"))
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, [200, 200, 429, 429, 429, 429, 429, 429, 429, 429]);

    let res = client
        .get(&url)
        .header("x-forwarded-for", "1.2.3.4, 198.51.100.1")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let _ = shutdown.send(());
}

#[tokio::test]
async fn health_is_outside_the_quota() {
    let (base, shutdown, _handle) = start_server(app(
        limited_config(60, 1),
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
    ))
    .await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client.get(format!("{base}/health")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(header(&res, "ratelimit-limit"), None);
    }

    let _ = shutdown.send(());
}

#[tokio::test]
async fn exempt_roles_bypass_the_counter() {
    let app = with_roles(app(
        limited_config(60, 1),
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
    ));
    let (base, shutdown, _handle) = start_server(app).await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/tags");

    for _ in 0..3 {
        let res = client
            .get(&url)
            .header("x-role", "superadmin")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(header(&res, "ratelimit-remaining"), None);
    }
    let res = client.get(&url).header("x-role", "editor").send().await.unwrap();
    assert_eq!(res.status(), 200);
    let res = client.get(&url).header("x-role", "editor").send().await.unwrap();
    assert_eq!(res.status(), 429);

    let _ = shutdown.send(());
}

async fn login(axum::Json(body): axum::Json<Value>) -> StatusCode {
    if body["password"] == "secret" {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    }
}

#[tokio::test]
async fn auth_limiter_counts_only_failed_attempts() {
    let mut cfg = test_config();
    cfg.rate_limit.auth.max = 2;
    let auth = Router::new().route("/login", post(login));
    let (base, shutdown, _handle) = start_server(app_with_auth(
        cfg,
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
        Some(auth),
    ))
    .await;
    let client = reqwest::Client::new();
    let url = format!("{base}/api/v1/auth/login");
    let attempt = |password: &'static str| {
        client
            .post(&url)
            .json(&json!({ "password": password }))
            .send()
    };

    for _ in 0..4 {
        assert_eq!(attempt("secret").await.unwrap().status(), 200);
    }
    assert_eq!(attempt("wrong").await.unwrap().status(), 401);
    assert_eq!(attempt("wrong").await.unwrap().status(), 401);

    let res = attempt("secret").await.unwrap();
    assert_eq!(res.status(), 429);
    let body: Value = res.json().await.unwrap();
    assert_eq!(
        body["message"],
        "Too many authentication attempts, please try again later."
    );

    let _ = shutdown.send(());
}

#[tokio::test]
async fn disabled_rate_limiting_sends_no_headers() {
    let mut cfg = limited_config(60, 1);
    cfg.rate_limit.enabled = false;
    let (base, shutdown, _handle) = start_server(app(
        cfg,
        Arc::new(InMemoryStore::new()),
        CacheBackend::new_memory(),
    ))
    .await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client
            .get(format!("{base}/api/v1/tags"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(header(&res, "ratelimit-limit"), None);
    }

    let _ = shutdown.send(());
}
